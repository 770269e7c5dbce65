use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Local-disk home of the original uploads.
///
/// Originals are written exactly once by the upload flow and only read
/// afterwards. Paths handed to the store are the full on-disk paths so a
/// row can be served without knowing the directory it was written under.
#[derive(Clone, Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes a new original under a fresh UUID name, keeping `extension`.
    ///
    /// # Arguments
    ///
    /// * `extension` - The lower-cased extension without the dot.
    /// * `bytes` - The file contents.
    ///
    /// # Returns
    ///
    /// The path the file was written to.
    pub async fn save(&self, extension: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.root.join(format!("{}.{}", Uuid::new_v4(), extension));

        // create_new: an original is never overwritten.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| {
                tracing::error!("❌ Failed to create {}: {}", path.display(), e);
                AppError::Io(e)
            })?;

        file.write_all(bytes).await?;
        file.flush().await?;

        tracing::debug!("💾 Stored original {} ({} bytes)", path.display(), bytes.len());

        path.into_os_string()
            .into_string()
            .map_err(|_| AppError::Internal("Upload path is not valid UTF-8".to_string()))
    }

    /// Reads an original. Never modifies it.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| {
            tracing::error!("❌ Failed to read original {}: {}", path, e);
            AppError::Io(e)
        })
    }

    /// Best-effort removal used when an upload is rolled back or the owner
    /// deletes a document.
    pub async fn remove(&self, path: &str) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!("🗑️ Removed original {}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("⚠️ Failed to remove original {}: {}", path, e),
        }
    }
}

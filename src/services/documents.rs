use std::path::Path;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    crypto::link::generate_link_id,
    error::{AppError, Result},
    models::{
        document::{Document, DocumentSummary, NewDocument},
        view_log::ViewLog,
    },
    state::AppState,
    validation::documents::{UploadForm, UploadLimits, check_magic_bytes},
};

/// The file part of an upload.
#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// An upload as received from the owner.
#[derive(Debug)]
pub struct UploadRequest {
    pub file: UploadedFile,
    pub title: Option<String>,
    pub watermark_text: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_views: Option<i32>,
}

/// A stored document and the share URL built for it.
#[derive(Debug)]
pub struct CreatedDocument {
    pub document: Document,
    pub link_url: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validates an upload, writes the original once and creates its row.
///
/// The original is removed again if the row cannot be written.
pub async fn create(state: &AppState, user_id: Uuid, request: UploadRequest) -> Result<CreatedDocument> {
    let UploadRequest {
        file,
        title,
        watermark_text,
        expires_at,
        max_views,
    } = request;

    let extension = Path::new(&file.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| AppError::Validation("Uploaded file has no extension".to_string()))?;

    let form = UploadForm {
        title: non_empty(title).unwrap_or_else(|| file.file_name.clone()),
        watermark_text: non_empty(watermark_text)
            .unwrap_or_else(|| state.config.default_watermark_text.clone()),
        max_views,
        expires_at,
        extension,
        size: file.bytes.len(),
    };

    let now = Utc::now();
    form.check(&UploadLimits {
        max_bytes: state.config.max_upload_bytes,
        now,
    })?;
    check_magic_bytes(&form.extension, &file.bytes)?;

    let file_path = state.files.save(&form.extension, &file.bytes).await?;

    let new = NewDocument {
        id: Uuid::new_v4(),
        user_id,
        link_id: generate_link_id(),
        title: form.title,
        file_path: file_path.clone(),
        watermark_text: form.watermark_text,
        expires_at: form.expires_at,
        max_views: form.max_views,
        created_at: now,
    };

    let document = match state.store.insert_document(&new).await {
        Ok(document) => document,
        Err(e) => {
            tracing::error!("❌ Failed to save document metadata: {}", e);
            state.files.remove(&file_path).await;
            return Err(e);
        }
    };

    tracing::info!(
        "📄 Document {} uploaded by {} (max views: {:?}, expires: {:?})",
        document.id,
        user_id,
        document.max_views,
        document.expires_at
    );

    Ok(CreatedDocument {
        link_url: format!("{}/view/{}", state.config.app_url, document.link_id),
        document,
    })
}

/// Lists an owner's documents, newest first.
pub async fn list(state: &AppState, user_id: Uuid) -> Result<Vec<DocumentSummary>> {
    state.store.list_owned(user_id).await
}

/// The view ledger of one owned document.
pub async fn view_logs(state: &AppState, user_id: Uuid, document_id: Uuid) -> Result<Vec<ViewLog>> {
    let document = state
        .store
        .find_owned(document_id, user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    state.store.list_view_logs(document.id).await
}

/// Burns an owned document. Burning twice is not an error.
pub async fn revoke(state: &AppState, user_id: Uuid, document_id: Uuid) -> Result<()> {
    if !state.store.revoke(document_id, user_id).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!("🔥 Document {} revoked by owner {}", document_id, user_id);
    Ok(())
}

/// Deletes an owned document: the row is hidden and burned, the ledger is
/// kept and the original is removed from disk.
pub async fn delete(state: &AppState, user_id: Uuid, document_id: Uuid) -> Result<()> {
    let document = state
        .store
        .soft_delete(document_id, user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    state.files.remove(&document.file_path).await;
    tracing::info!("🗑️ Document {} deleted by owner {}", document_id, user_id);
    Ok(())
}

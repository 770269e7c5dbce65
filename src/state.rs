use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::repositories::store::{DocumentStore, open_store};
use crate::storage::FileStorage;

/// Bounds how many watermark renders run on the blocking pool at once.
#[derive(Clone)]
pub struct RenderLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl RenderLimiter {
    /// Creates a new `RenderLimiter`.
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a render slot. The permit is owned so it can travel into
    /// a blocking task.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Render limiter closed".to_string()))
    }

    /// Returns the number of available permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Renders currently in flight.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available_permits())
    }
}

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The document store.
    pub store: Arc<dyn DocumentStore>,
    /// The Redis connection manager. Owner routes and rate limits need it.
    pub redis: Option<ConnectionManager>,
    /// The application's configuration.
    pub config: Config,
    /// Where originals live.
    pub files: FileStorage,
    /// The render limiter.
    pub render_limiter: RenderLimiter,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let store = open_store(&config.store).await?;
        tracing::info!("✅ Document store ready");

        let redis = match &config.redis_url {
            Some(url) => {
                let redis_client = redis::Client::open(url.as_str())?;
                let manager = ConnectionManager::new(redis_client).await?;
                tracing::info!("✅ Redis Connection Manager initialized (pooled)");
                Some(manager)
            }
            None => {
                tracing::warn!("⚠️ REDIS_URL not set: owner routes and view rate limits are disabled");
                None
            }
        };

        Ok(Self::with_store(config, store, redis))
    }

    /// Assembles a state around an already opened store.
    pub fn with_store(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        let render_limiter = RenderLimiter::new(config.render_concurrency);
        tracing::info!(
            "✅ Render limiter initialized ({} concurrent renders)",
            config.render_concurrency
        );

        AppState {
            store,
            redis,
            config: config.clone(),
            files: FileStorage::new(config.upload_dir.clone()),
            render_limiter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn render_limiter_counts_in_flight_permits() {
        let limiter = RenderLimiter::new(2);
        assert_eq!(limiter.available_permits(), 2);

        let first = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 1);
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available_permits(), 0);

        drop(first);
        assert_eq!(limiter.in_flight(), 1);
    }

    #[test]
    fn zero_concurrency_still_allows_one_render() {
        assert_eq!(RenderLimiter::new(0).available_permits(), 1);
    }
}

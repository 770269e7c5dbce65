use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::watermark::WatermarkError;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// The link or document does not exist.
    #[error("Document not found")]
    NotFound,

    /// The document reached a terminal state (view limit, revoke or earlier expiry).
    #[error("Document has been burned (view limit reached or expired)")]
    Burned,

    /// The document expired; the burn was materialized by this request.
    #[error("Document has expired")]
    Expired,

    /// A heartbeat carried a delta outside `(0, 60]`.
    #[error("deltaSeconds must be a positive number (<= 60)")]
    InvalidDelta,

    /// A heartbeat carried no session id.
    #[error("sessionId is required")]
    MissingSession,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The stored file has no watermark implementation.
    #[error("Unsupported file type for watermarking: {0}")]
    UnsupportedFormat(String),

    /// The store could not hand out a connection.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A PostgreSQL error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The watermark renderer failed on a supported format.
    #[error("Watermark error: {0}")]
    Watermark(String),

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A multipart error.
    #[error("Multipart error: {0}")]
    Multipart(String),

    /// A rate limit exceeded error.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::StoreUnavailable(e.to_string())
    }
}

impl From<deadpool_postgres::CreatePoolError> for AppError {
    fn from(e: deadpool_postgres::CreatePoolError) -> Self {
        AppError::StoreUnavailable(e.to_string())
    }
}

impl From<WatermarkError> for AppError {
    fn from(e: WatermarkError) -> Self {
        match e {
            WatermarkError::UnsupportedFormat(ext) => AppError::UnsupportedFormat(ext),
            WatermarkError::Io(e) => AppError::Io(e),
            other => AppError::Watermark(other.to_string()),
        }
    }
}

impl AppError {
    /// Stable machine-readable code sent next to the human message.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Burned => "burned",
            AppError::Expired => "expired",
            AppError::InvalidDelta => "invalid_delta",
            AppError::MissingSession => "missing_session",
            AppError::Validation(_) | AppError::Multipart(_) => "validation",
            AppError::UnsupportedFormat(_) => "unsupported_format",
            AppError::StoreUnavailable(_) | AppError::Database(_) | AppError::Sqlite(_) => {
                "store_unavailable"
            }
            AppError::Authentication(_) => "unauthenticated",
            AppError::Unauthorized => "forbidden",
            AppError::RateLimitExceeded(_) => "rate_limited",
            AppError::Redis(_)
            | AppError::Io(_)
            | AppError::Watermark(_)
            | AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            // Terminal policy states are expected outcomes, not server faults.
            AppError::NotFound | AppError::Burned | AppError::Expired => {
                tracing::debug!("Access denied: {}", self);
                let status = match self {
                    AppError::NotFound => StatusCode::NOT_FOUND,
                    _ => StatusCode::GONE,
                };
                (status, self.to_string())
            }

            AppError::InvalidDelta | AppError::MissingSession => {
                tracing::debug!("Heartbeat rejected: {}", self);
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::UnsupportedFormat(ref ext) => {
                tracing::error!("Unsupported format for watermarking: {}", ext);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Unsupported file type for watermarking".to_string(),
                )
            }

            AppError::StoreUnavailable(ref msg) => {
                tracing::error!("Store unavailable: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Sqlite(ref e) => {
                tracing::error!("SQLite error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "File system error".to_string())
            }

            AppError::Watermark(ref msg) => {
                tracing::error!("Watermark error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::Multipart(ref msg) => {
                tracing::debug!("Multipart error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::RateLimitExceeded(ref msg) => {
                tracing::warn!("Rate limit exceeded: {}", msg);
                (StatusCode::TOO_MANY_REQUESTS, msg.clone())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message,
            "reason": self.reason(),
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error","reason":"internal"}"#.to_string());

        (status, [(http::header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

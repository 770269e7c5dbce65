use axum::{http::StatusCode, response::Response};

use crate::{error::Result, handlers::response::json};

/// Liveness probe. Does not touch the store.
pub async fn health() -> Result<Response> {
    json(StatusCode::OK, &sonic_rs::json!({ "status": "ok" }))
}

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{models::session::Session, state::AppState};

use redis::AsyncCommands;

/// Extracts the session token from the request cookies.
///
/// # Arguments
///
/// * `cookies` - The request cookies.
///
/// # Returns
///
/// An `Option` containing the session ID if found.
fn extract_session_token(cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get("session_id")
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// A middleware that requires a valid owner session.
///
/// Sessions are issued by the auth service and stored in Redis as JSON at
/// `session:<id>`. On success the `Session` is inserted as a request
/// extension.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `StatusCode`.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    tracing::debug!("🔐 Checking authentication...");

    let Some(mut redis) = state.redis.clone() else {
        tracing::error!("❌ Owner route reached without Redis");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let session_id = extract_session_token(&cookies).ok_or_else(|| {
        tracing::warn!("❌ No session_id cookie found");
        StatusCode::FORBIDDEN
    })?;

    let session_json: Option<String> = redis
        .get(format!("session:{}", session_id))
        .await
        .map_err(|e| {
            tracing::error!("❌ Redis error while loading session: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    let session_json = session_json.ok_or_else(|| {
        tracing::warn!("❌ Session {} not found", session_id);
        StatusCode::FORBIDDEN
    })?;

    let session: Session = sonic_rs::from_str(&session_json).map_err(|e| {
        tracing::warn!("❌ Invalid session JSON: {}", e);
        StatusCode::FORBIDDEN
    })?;

    if chrono::Utc::now() > session.expires_at {
        tracing::warn!("❌ Session expired for user: {}", session.user_id);

        let _: () = redis
            .del(format!("session:{}", session_id))
            .await
            .unwrap_or(());

        return Err(StatusCode::FORBIDDEN);
    }

    tracing::debug!("✅ User authenticated: {} ({})", session.user_id, session.plan);

    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

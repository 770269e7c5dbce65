use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;
use subtle::ConstantTimeEq;
use tower_cookies::Cookies;

use crate::{error::AppError, state::AppState};

/// Constant-time equality for the double-submit pair.
fn tokens_match(cookie: &str, header: &str) -> bool {
    cookie.len() == header.len() && bool::from(cookie.as_bytes().ct_eq(header.as_bytes()))
}

/// A middleware that verifies the CSRF token on mutating owner requests.
///
/// The `csrf_token` cookie must equal the `X-CSRF-Token` header and be
/// known to Redis at `csrf:<token>`.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `cookies` - The request cookies.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `AppError`.
pub async fn verify_csrf(
    State(state): State<AppState>,
    cookies: Cookies,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() == Method::GET
        || req.method() == Method::HEAD
        || req.method() == Method::OPTIONS
    {
        tracing::debug!("✅ CSRF exemption: {} request", req.method());
        return next.run(req).await;
    }

    let Some(mut redis) = state.redis.clone() else {
        return AppError::Internal("Redis is not configured".to_string()).into_response();
    };

    let csrf_token_cookie = match cookies.get("csrf_token") {
        Some(c) => c.value().to_string(),
        None => {
            tracing::warn!("❌ CSRF: csrf_token cookie missing");
            return AppError::Authentication("Missing CSRF token cookie".to_string())
                .into_response();
        }
    };

    let csrf_token_header = match req.headers().get("x-csrf-token") {
        Some(token) => match token.to_str() {
            Ok(t) => t.to_string(),
            Err(_) => {
                tracing::warn!("❌ CSRF: malformed header");
                return AppError::Authentication("Invalid CSRF token format".to_string())
                    .into_response();
            }
        },
        None => {
            tracing::warn!("❌ CSRF: x-csrf-token header missing");
            return AppError::Authentication("Missing CSRF token header".to_string())
                .into_response();
        }
    };

    if !tokens_match(&csrf_token_cookie, &csrf_token_header) {
        tracing::warn!("❌ CSRF: tokens do not match");
        return AppError::Authentication("CSRF token mismatch".to_string()).into_response();
    }

    let csrf_key = format!("csrf:{}", csrf_token_cookie);

    match redis.get::<_, Option<String>>(&csrf_key).await {
        Ok(Some(_)) => {
            tracing::debug!("✅ CSRF token valid");
            next.run(req).await
        }
        Ok(None) => {
            tracing::warn!("❌ CSRF: token expired or unknown");
            AppError::Authentication("CSRF token expired or invalid".to_string()).into_response()
        }
        Err(e) => {
            tracing::error!("❌ CSRF: Redis error: {}", e);
            AppError::Redis(e).into_response()
        }
    }
}

//! Self-destructing document sharing.
//!
//! Owners upload a PDF or image and receive an unguessable link. Every
//! view of the link consumes one slot of the document's view budget and
//! returns a copy stamped with the viewer's IP and the time. A link whose
//! budget is spent or whose owner revoked it is burned for good. Expired
//! links burn on their next access.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use std::{sync::Arc, time::Duration};
use tower_cookies::CookieManagerLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

pub mod config;
pub mod db;
pub mod error;
pub mod state;
pub mod storage;

pub mod crypto {
    pub mod link;
}

pub mod models {
    pub mod document;
    pub mod session;
    pub mod view_log;
}

pub mod repositories {
    pub mod postgres;
    pub mod sqlite;
    pub mod store;
}

pub mod services {
    pub mod access;
    pub mod documents;
    pub mod heartbeat;
    pub mod sweep;
}

pub mod handlers {
    pub mod documents;
    pub mod health;
    pub mod response;
    pub mod view;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod client;
    pub mod csrf;
    pub mod rate_limit;
}

pub mod validation {
    pub mod documents;
}

pub mod watermark;

use error::{AppError, Result};
use state::AppState;

/// Slack on top of `MAX_UPLOAD_BYTES` for multipart framing and text fields.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Builds the HTTP router.
///
/// The public view routes are always mounted. Owner routes need Redis for
/// sessions and CSRF tokens and are only mounted when it is configured.
///
/// # Arguments
///
/// * `state` - The application state.
///
/// # Returns
///
/// A `Result` containing the `Router`.
pub fn build_router(state: AppState) -> Result<Router> {
    let view_routes = Router::new()
        .route("/view/{link_id}", get(handlers::view::view_document))
        .route(
            "/view/{link_id}/heartbeat",
            post(handlers::view::heartbeat_view),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_view,
        ))
        .with_state(state.clone());

    let mut app = Router::new()
        .route("/health", get(handlers::health::health))
        .merge(view_routes);

    if state.redis.is_some() {
        app = app.merge(owner_routes(state.clone())?);
    } else {
        tracing::warn!("⚠️ Owner routes not mounted (no Redis)");
    }

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .cors_origin
                .parse::<HeaderValue>()
                .map_err(|e| AppError::Internal(format!("Invalid CORS_ORIGIN: {}", e)))?,
        )
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
            header::HeaderName::from_static("x-csrf-token"),
        ])
        .allow_credentials(true)
        .expose_headers([header::HeaderName::from_static(
            handlers::view::VIEW_SESSION_HEADER,
        )])
        .max_age(Duration::from_secs(86400));

    Ok(app
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(
            state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
        ))
        .layer(cors))
}

fn owner_routes(state: AppState) -> Result<Router> {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(100)
            .burst_size(50)
            .use_headers()
            .finish()
            .ok_or_else(|| AppError::Internal("Invalid rate limiter configuration".to_string()))?,
    );

    Ok(Router::new()
        .route(
            "/api/documents/upload",
            post(handlers::documents::upload_document),
        )
        .route("/api/documents", get(handlers::documents::list_documents))
        .route(
            "/api/documents/{id}/views",
            get(handlers::documents::list_views),
        )
        .route(
            "/api/documents/{id}/revoke",
            post(handlers::documents::revoke_document),
        )
        .route(
            "/api/documents/{id}",
            axum::routing::delete(handlers::documents::delete_document),
        )
        .layer(CompressionLayer::new())
        .layer(tower_governor::GovernorLayer::new(governor_conf))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::csrf::verify_csrf,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ))
        .layer(CookieManagerLayer::new())
        .with_state(state))
}

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use sonic_rs::JsonValueTrait;

use crate::{
    error::Result,
    handlers::response::json,
    middleware_layer::client::ClientMeta,
    services::{
        access::{self, ViewRequest},
        heartbeat::{self, Heartbeat},
    },
    state::AppState,
};

/// Header carrying the session id the view was logged under.
pub const VIEW_SESSION_HEADER: &str = "x-view-session";

/// Query string of `GET /view/{link_id}`.
#[derive(Deserialize, Debug)]
pub struct ViewQuery {
    pub sid: Option<String>,
}

/// Serves a watermarked copy of the document behind `link_id`.
pub async fn view_document(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    Query(query): Query<ViewQuery>,
    client: ClientMeta,
) -> Result<Response> {
    tracing::debug!("👁️ View request for link from {}", client.ip);

    let view = access::open_view(
        &state,
        &link_id,
        ViewRequest {
            session_id: query.sid,
            ip_address: client.ip,
            user_agent: client.user_agent,
        },
    )
    .await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(view.content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static("inline"));
    if let Ok(session) = HeaderValue::from_str(&view.session_id) {
        headers.insert(VIEW_SESSION_HEADER, session);
    }

    Ok((StatusCode::OK, headers, view.bytes).into_response())
}

/// Accepts a dwell-time report: `{"sessionId": string, "deltaSeconds": number}`.
///
/// A body that is not JSON is treated like one without fields, so it fails
/// the delta check.
pub async fn heartbeat_view(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    client: ClientMeta,
    body: Bytes,
) -> Result<Response> {
    let payload: sonic_rs::Value = sonic_rs::from_slice(&body).unwrap_or_default();

    let delta_seconds = payload.get("deltaSeconds").and_then(|v| {
        v.as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
    });
    let session_id = payload
        .get("sessionId")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    heartbeat::record(
        state.store.as_ref(),
        &link_id,
        Heartbeat {
            session_id,
            delta_seconds,
            ip_address: client.ip,
            user_agent: client.user_agent,
        },
    )
    .await?;

    json(StatusCode::OK, &sonic_rs::json!({ "ok": true }))
}

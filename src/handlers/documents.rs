use axum::{
    Extension,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::Response,
};
use tokio::time::{Duration, timeout};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    handlers::response::json,
    models::session::Session,
    services::documents::{self as document_service, UploadRequest, UploadedFile},
    state::AppState,
    validation::documents::{parse_expires_at, parse_max_views},
};

const UPLOAD_TIMEOUT: u64 = 120;

/// Uploads a document and issues its share link.
///
/// Multipart fields: `file` (required), `title`, `watermarkText`,
/// `expiresAt`, `maxViews`.
#[axum::debug_handler]
pub async fn upload_document(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    mut multipart: Multipart,
) -> Result<Response> {
    let user_id = session.user_id;
    tracing::info!("📤 Upload from user: {}", user_id);

    let mut file: Option<UploadedFile> = None;
    let mut title: Option<String> = None;
    let mut watermark_text: Option<String> = None;
    let mut expires_at = None;
    let mut max_views = None;

    let timeout_duration = Duration::from_secs(UPLOAD_TIMEOUT);

    loop {
        match timeout(timeout_duration, multipart.next_field()).await {
            Ok(Ok(Some(field))) => {
                let field_name = field.name().unwrap_or("").to_string();
                match field_name.as_str() {
                    "file" => {
                        let file_name = field.file_name().unwrap_or("").to_string();
                        let bytes = field
                            .bytes()
                            .await
                            .map_err(|e| AppError::Multipart(format!("file: {}", e)))?;
                        file = Some(UploadedFile {
                            file_name,
                            bytes: bytes.to_vec(),
                        });
                    }
                    "title" => {
                        title = Some(
                            field
                                .text()
                                .await
                                .map_err(|e| AppError::Multipart(format!("title: {}", e)))?,
                        );
                    }
                    "watermarkText" => {
                        watermark_text = Some(
                            field
                                .text()
                                .await
                                .map_err(|e| AppError::Multipart(format!("watermarkText: {}", e)))?,
                        );
                    }
                    "expiresAt" => {
                        let text = field
                            .text()
                            .await
                            .map_err(|e| AppError::Multipart(format!("expiresAt: {}", e)))?;
                        expires_at = parse_expires_at(&text)?;
                    }
                    "maxViews" => {
                        let text = field
                            .text()
                            .await
                            .map_err(|e| AppError::Multipart(format!("maxViews: {}", e)))?;
                        max_views = parse_max_views(&text)?;
                    }
                    _ => {}
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                return Err(AppError::Multipart(format!("Parse error: {}", e)));
            }
            Err(_) => return Err(AppError::Multipart("Upload timeout exceeded".into())),
        }
    }

    let file = file.ok_or_else(|| AppError::Validation("No file uploaded".into()))?;

    let created = document_service::create(
        &state,
        user_id,
        UploadRequest {
            file,
            title,
            watermark_text,
            expires_at,
            max_views,
        },
    )
    .await?;

    json(
        StatusCode::CREATED,
        &sonic_rs::json!({
            "message": "Document uploaded successfully",
            "documentId": created.document.id.to_string(),
            "linkId": created.document.link_id,
            "linkUrl": created.link_url,
        }),
    )
}

/// Lists the caller's documents with their view counts.
#[axum::debug_handler]
pub async fn list_documents(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Response> {
    let documents = document_service::list(&state, session.user_id).await?;
    json(StatusCode::OK, &documents)
}

/// Lists the view ledger of one of the caller's documents.
#[axum::debug_handler]
pub async fn list_views(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(document_id): Path<Uuid>,
) -> Result<Response> {
    let views = document_service::view_logs(&state, session.user_id, document_id).await?;
    json(StatusCode::OK, &views)
}

/// Burns one of the caller's documents.
#[axum::debug_handler]
pub async fn revoke_document(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(document_id): Path<Uuid>,
) -> Result<Response> {
    document_service::revoke(&state, session.user_id, document_id).await?;
    json(
        StatusCode::OK,
        &sonic_rs::json!({ "message": "Document burned successfully" }),
    )
}

/// Deletes one of the caller's documents.
#[axum::debug_handler]
pub async fn delete_document(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(document_id): Path<Uuid>,
) -> Result<Response> {
    document_service::delete(&state, session.user_id, document_id).await?;
    json(
        StatusCode::OK,
        &sonic_rs::json!({ "message": "Document deleted successfully" }),
    )
}

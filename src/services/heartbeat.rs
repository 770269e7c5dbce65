use chrono::Utc;

use crate::{
    error::{AppError, Result},
    models::view_log::{NewViewLog, ViewLog},
    repositories::store::DocumentStore,
    validation::documents::{validate_delta, validate_session_id},
};

/// A dwell report from an open viewer tab.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub session_id: Option<String>,
    pub delta_seconds: Option<f64>,
    pub ip_address: String,
    pub user_agent: String,
}

/// Adds a heartbeat's whole seconds to its session's dwell time.
///
/// Validation runs before any store access: the delta first, then the
/// session id. Burn and expiry are not checked here; a tab that opened
/// the document before it burned keeps reporting.
pub async fn record(store: &dyn DocumentStore, link_id: &str, beat: Heartbeat) -> Result<ViewLog> {
    let seconds = validate_delta(beat.delta_seconds)?;
    let session_id = validate_session_id(beat.session_id.as_deref())?;

    let document = store
        .find_by_link(link_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let log = store
        .add_dwell(
            &NewViewLog {
                document_id: document.id,
                session_id,
                ip_address: beat.ip_address,
                user_agent: beat.user_agent,
                created_at: Utc::now(),
            },
            seconds,
        )
        .await?;

    tracing::debug!(
        "💓 Heartbeat for document {} session {}: +{}s (total {}s)",
        document.id,
        log.session_id,
        seconds,
        log.duration_seconds
    );

    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::document::NewDocument, repositories::sqlite::SqliteStore};
    use uuid::Uuid;

    async fn burned_store() -> (SqliteStore, String, Uuid) {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = Uuid::new_v4();
        store
            .insert_document(&NewDocument {
                id,
                user_id: Uuid::new_v4(),
                link_id: "hb-link".to_string(),
                title: "slides".to_string(),
                file_path: "uploads/slides.pdf".to_string(),
                watermark_text: "CONFIDENTIAL".to_string(),
                expires_at: None,
                max_views: Some(1),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store.mark_burned(id).await.unwrap();
        (store, "hb-link".to_string(), id)
    }

    fn beat(session: Option<&str>, delta: Option<f64>) -> Heartbeat {
        Heartbeat {
            session_id: session.map(str::to_string),
            delta_seconds: delta,
            ip_address: "198.51.100.4".to_string(),
            user_agent: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn accumulates_even_after_burn() {
        let (store, link, id) = burned_store().await;

        record(&store, &link, beat(Some("tab"), Some(5.0))).await.unwrap();
        let log = record(&store, &link, beat(Some("tab"), Some(7.4))).await.unwrap();
        assert_eq!(log.duration_seconds, 12);

        record(&store, &link, beat(Some("other"), Some(3.0))).await.unwrap();
        let logs = store.list_view_logs(id).await.unwrap();
        assert_eq!(logs.len(), 2);

        let doc = store.find_by_link(&link).await.unwrap().unwrap();
        assert_eq!(doc.current_views, 0, "heartbeats never consume views");
    }

    #[tokio::test]
    async fn delta_is_checked_before_session_and_link() {
        let (store, _, _) = burned_store().await;

        let err = record(&store, "missing", beat(None, Some(0.0))).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidDelta));

        let err = record(&store, "missing", beat(None, Some(5.0))).await.unwrap_err();
        assert!(matches!(err, AppError::MissingSession));

        let err = record(&store, "missing", beat(Some("tab"), Some(5.0))).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }
}

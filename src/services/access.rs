use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::{
    crypto::link,
    error::{AppError, Result},
    models::{document::Document, view_log::NewViewLog},
    repositories::store::DocumentStore,
    state::AppState,
    validation::documents::normalize_session_id,
    watermark::{ContentFamily, WatermarkError},
};

/// Why a link was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotFound,
    Burned,
    Expired,
}

impl From<DenyReason> for AppError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::NotFound => AppError::NotFound,
            DenyReason::Burned => AppError::Burned,
            DenyReason::Expired => AppError::Expired,
        }
    }
}

/// Outcome of resolving a link.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// A view slot was consumed. The snapshot carries the post-increment
    /// counters.
    Allow(Document),
    Deny(DenyReason),
}

/// Who is asking to view.
#[derive(Debug, Clone)]
pub struct ViewRequest {
    /// Session id supplied by the client (`?sid=`), if any.
    pub session_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
}

/// A stamped copy ready to be sent.
#[derive(Debug)]
pub struct RenderedView {
    pub document_id: Uuid,
    pub session_id: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Decides whether `link_id` may be served at `now` and, if so, consumes
/// one view slot.
///
/// The slot is taken with a single guarded update, so no interleaving of
/// concurrent callers can produce more than `max_views` `Allow` outcomes.
/// When the guard refuses the update the row is read again to tell an
/// expiry (burn materialized here) from any other terminal state.
pub async fn resolve(store: &dyn DocumentStore, link_id: &str, now: DateTime<Utc>) -> Result<Decision> {
    if !link::is_well_formed(link_id) {
        return Ok(Decision::Deny(DenyReason::NotFound));
    }

    let Some(document) = store.find_by_link(link_id).await? else {
        return Ok(Decision::Deny(DenyReason::NotFound));
    };

    if document.is_burned {
        return Ok(Decision::Deny(burned(store, &document, now).await?));
    }

    if document.is_expired(now) {
        return Ok(Decision::Deny(expire(store, &document).await?));
    }

    match store.consume_view(document.id, now).await? {
        Some(counters) => {
            if counters.is_burned {
                tracing::info!(
                    "🔥 Document {} burned after view {}",
                    document.id,
                    counters.current_views
                );
            }
            Ok(Decision::Allow(Document {
                current_views: counters.current_views,
                is_burned: counters.is_burned,
                ..document
            }))
        }
        None => {
            // Another request moved the row between our read and the update.
            let reason = match store.find_by_link(link_id).await? {
                None => DenyReason::NotFound,
                Some(fresh) if fresh.is_burned => burned(store, &fresh, now).await?,
                Some(fresh) if fresh.is_expired(now) => expire(store, &fresh).await?,
                Some(fresh) if fresh.is_exhausted() => {
                    store.mark_burned(fresh.id).await?;
                    DenyReason::Burned
                }
                Some(_) => DenyReason::Burned,
            };
            Ok(Decision::Deny(reason))
        }
    }
}

/// A burned row reports `Expired` once if the expiry sweep burned it and
/// nobody has been told yet.
async fn burned(store: &dyn DocumentStore, document: &Document, now: DateTime<Utc>) -> Result<DenyReason> {
    if document.is_expired(now) && store.take_expiry_notice(document.id).await? {
        return Ok(DenyReason::Expired);
    }
    Ok(DenyReason::Burned)
}

async fn expire(store: &dyn DocumentStore, document: &Document) -> Result<DenyReason> {
    // Losing this race to another request or the sweep is fine.
    if store.mark_burned(document.id).await? {
        tracing::info!("⏰ Document {} expired, burn materialized", document.id);
    }
    Ok(DenyReason::Expired)
}

/// The text stamped on every delivered copy.
pub fn stamp_text(ip_address: &str, at: DateTime<Utc>) -> String {
    format!("{} - {}", ip_address, at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Resolves a link, records the view and renders the stamped copy.
///
/// The view slot is committed before rendering starts. A render that fails
/// afterwards surfaces as an error without giving the slot back.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `link_id` - The public link id.
/// * `request` - Viewer identity.
///
/// # Returns
///
/// A `Result` containing the `RenderedView`.
pub async fn open_view(state: &AppState, link_id: &str, request: ViewRequest) -> Result<RenderedView> {
    let now = Utc::now();

    let document = match resolve(state.store.as_ref(), link_id, now).await? {
        Decision::Allow(document) => document,
        Decision::Deny(reason) => return Err(reason.into()),
    };

    let session_id = request
        .session_id
        .as_deref()
        .and_then(normalize_session_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    state
        .store
        .record_view(&NewViewLog {
            document_id: document.id,
            session_id: session_id.clone(),
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent,
            created_at: now,
        })
        .await?;

    let family = ContentFamily::from_path(&document.file_path)?;
    let original = state.files.read(&document.file_path).await?;
    let text = stamp_text(&request.ip_address, now);

    let permit = state.render_limiter.acquire().await?;
    tracing::debug!(
        "🖋️ Stamping document {} ({} bytes, {} renders in flight)",
        document.id,
        original.len(),
        state.render_limiter.in_flight()
    );

    let bytes = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        family.stamp(&original, &text)
    })
    .await
    .map_err(|e| WatermarkError::Join(e.to_string()))??;

    tracing::info!(
        "👁️ Served document {} (view {}{})",
        document.id,
        document.current_views,
        document
            .max_views
            .map(|max| format!("/{max}"))
            .unwrap_or_default()
    );

    Ok(RenderedView {
        document_id: document.id,
        session_id,
        content_type: family.content_type(),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::document::NewDocument,
        repositories::sqlite::SqliteStore,
    };
    use chrono::{Duration, TimeZone};

    async fn store_with(max_views: Option<i32>, expires_at: Option<DateTime<Utc>>) -> (SqliteStore, String) {
        let store = SqliteStore::in_memory().await.unwrap();
        let link_id = link::generate_link_id();
        store
            .insert_document(&NewDocument {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                link_id: link_id.clone(),
                title: "report".to_string(),
                file_path: "uploads/report.pdf".to_string(),
                watermark_text: "CONFIDENTIAL".to_string(),
                expires_at,
                max_views,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        (store, link_id)
    }

    #[tokio::test]
    async fn unknown_and_malformed_links_are_not_found() {
        let (store, _) = store_with(None, None).await;
        let now = Utc::now();
        assert_eq!(
            resolve(&store, "nope", now).await.unwrap(),
            Decision::Deny(DenyReason::NotFound)
        );
        assert_eq!(
            resolve(&store, "../../etc/passwd", now).await.unwrap(),
            Decision::Deny(DenyReason::NotFound)
        );
    }

    #[tokio::test]
    async fn max_views_allows_exactly_k() {
        let (store, link_id) = store_with(Some(3), None).await;
        let now = Utc::now();

        for expected in 1..=3 {
            match resolve(&store, &link_id, now).await.unwrap() {
                Decision::Allow(doc) => {
                    assert_eq!(doc.current_views, expected);
                    assert_eq!(doc.is_burned, expected == 3);
                }
                other => panic!("view {expected} was refused: {other:?}"),
            }
        }
        assert_eq!(
            resolve(&store, &link_id, now).await.unwrap(),
            Decision::Deny(DenyReason::Burned)
        );
    }

    #[tokio::test]
    async fn concurrent_resolves_never_exceed_the_budget() {
        let (store, link_id) = store_with(Some(4), None).await;
        let now = Utc::now();

        let outcomes = futures::future::join_all(
            (0..25).map(|_| resolve(&store, &link_id, now)),
        )
        .await;

        let allowed = outcomes
            .iter()
            .filter(|o| matches!(o, Ok(Decision::Allow(_))))
            .count();
        assert_eq!(allowed, 4);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, Ok(Decision::Allow(_)) | Ok(Decision::Deny(DenyReason::Burned)))));
    }

    #[tokio::test]
    async fn expiry_wins_over_remaining_budget_and_materializes_once() {
        let past = Utc::now() - Duration::minutes(5);
        let (store, link_id) = store_with(Some(10), Some(past)).await;
        let now = Utc::now();

        assert_eq!(
            resolve(&store, &link_id, now).await.unwrap(),
            Decision::Deny(DenyReason::Expired)
        );
        assert_eq!(
            resolve(&store, &link_id, now).await.unwrap(),
            Decision::Deny(DenyReason::Burned)
        );

        let doc = store.find_by_link(&link_id).await.unwrap().unwrap();
        assert_eq!(doc.current_views, 0);
        assert!(doc.is_burned);
    }

    #[tokio::test]
    async fn sweep_burned_link_still_reports_expiry_first() {
        let past = Utc::now() - Duration::minutes(10);
        let (store, link_id) = store_with(Some(5), Some(past)).await;

        assert_eq!(crate::services::sweep::burn_expired_now(&store).await.unwrap(), 1);
        assert!(store.find_by_link(&link_id).await.unwrap().unwrap().is_burned);

        let now = Utc::now();
        assert_eq!(
            resolve(&store, &link_id, now).await.unwrap(),
            Decision::Deny(DenyReason::Expired)
        );
        assert_eq!(
            resolve(&store, &link_id, now).await.unwrap(),
            Decision::Deny(DenyReason::Burned)
        );
    }

    #[tokio::test]
    async fn revoked_then_expired_link_reports_burned() {
        let soon = Utc::now() + Duration::milliseconds(50);
        let (store, link_id) = store_with(Some(5), Some(soon)).await;
        let doc = store.find_by_link(&link_id).await.unwrap().unwrap();
        assert!(store.revoke(doc.id, doc.user_id).await.unwrap());

        let later = soon + Duration::minutes(1);
        assert_eq!(store.burn_expired(later).await.unwrap(), 0);
        assert_eq!(
            resolve(&store, &link_id, later).await.unwrap(),
            Decision::Deny(DenyReason::Burned)
        );
    }

    #[tokio::test]
    async fn unlimited_documents_keep_counting() {
        let (store, link_id) = store_with(None, None).await;
        let now = Utc::now();
        for _ in 0..5 {
            assert!(matches!(resolve(&store, &link_id, now).await.unwrap(), Decision::Allow(_)));
        }
        let doc = store.find_by_link(&link_id).await.unwrap().unwrap();
        assert_eq!(doc.current_views, 5);
        assert!(!doc.is_burned);
    }

    #[test]
    fn stamp_text_uses_millisecond_utc() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(stamp_text("203.0.113.7", at), "203.0.113.7 - 2026-03-01T12:30:05.000Z");
    }
}

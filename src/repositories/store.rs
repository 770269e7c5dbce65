use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    config::StoreBackend,
    error::Result,
    models::{
        document::{Document, DocumentSummary, NewDocument, ViewCounters},
        view_log::{NewViewLog, ViewLog},
    },
};

/// Persistence contract for documents and their view ledger.
///
/// Every method is a single atomic statement or a single transaction on the
/// backing store. Cross-request coordination relies on that alone: no
/// implementation may keep mutable state in process memory, because several
/// service instances can share one database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates tables and indexes if they do not exist yet.
    async fn init_schema(&self) -> Result<()>;

    /// Persists a freshly uploaded document.
    async fn insert_document(&self, new: &NewDocument) -> Result<Document>;

    /// Looks a live (not owner-deleted) document up by its public link.
    async fn find_by_link(&self, link_id: &str) -> Result<Option<Document>>;

    /// Looks a live document up by id, scoped to its owner.
    async fn find_owned(&self, id: Uuid, user_id: Uuid) -> Result<Option<Document>>;

    /// Lists an owner's live documents, newest first, with ledger totals.
    async fn list_owned(&self, user_id: Uuid) -> Result<Vec<DocumentSummary>>;

    /// Consumes one view slot.
    ///
    /// Increments `current_views` only if the document is not burned, not
    /// deleted, not expired at `now` and still below `max_views`, and in the
    /// same statement flips `is_burned` when the new count reaches
    /// `max_views`. Returns `None` when the guard rejected the increment.
    async fn consume_view(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<ViewCounters>>;

    /// Sets `is_burned`. Returns true only for the call that flipped it.
    async fn mark_burned(&self, id: Uuid) -> Result<bool>;

    /// Owner-initiated burn. Returns false when the owner has no such document.
    async fn revoke(&self, id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Owner deletion: hides the row from every lookup and burns it. The
    /// ledger rows are kept.
    async fn soft_delete(&self, id: Uuid, user_id: Uuid) -> Result<Option<Document>>;

    /// Burns every live document whose expiry is before `now` and leaves an
    /// expiry notice on each row it flipped.
    async fn burn_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Clears the expiry notice left by `burn_expired`. Returns true only for
    /// the call that cleared it, so exactly one access after a sweep reports
    /// the expiry.
    async fn take_expiry_notice(&self, id: Uuid) -> Result<bool>;

    /// Writes a ledger row for a session unless one exists already.
    async fn record_view(&self, entry: &NewViewLog) -> Result<()>;

    /// Adds `seconds` to the session's dwell time, creating the row first if
    /// needed.
    async fn add_dwell(&self, entry: &NewViewLog, seconds: i64) -> Result<ViewLog>;

    /// All ledger rows for a document, oldest first.
    async fn list_view_logs(&self, document_id: Uuid) -> Result<Vec<ViewLog>>;
}

/// Opens the store selected by the configuration and makes sure its schema
/// exists.
pub async fn open_store(backend: &StoreBackend) -> Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match backend {
        StoreBackend::Postgres(url) => {
            let pool = crate::db::create_pool(url)?;
            tracing::info!("✅ PostgreSQL pool initialized with deadpool-postgres");
            Arc::new(super::postgres::PgStore::new(pool))
        }
        StoreBackend::Sqlite(path) => {
            let store = super::sqlite::SqliteStore::open(path).await?;
            tracing::info!("✅ SQLite store opened at {}", path);
            Arc::new(store)
        }
    };

    store.init_schema().await?;
    Ok(store)
}

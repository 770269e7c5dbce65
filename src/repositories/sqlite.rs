use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{OptionalExtension, params, types::Type};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        document::{Document, DocumentSummary, NewDocument, ViewCounters},
        view_log::{NewViewLog, ViewLog},
    },
};

use super::store::DocumentStore;

const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
"#;

// Timestamps are stored as unix milliseconds so range predicates compare
// numerically.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    link_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    file_path TEXT NOT NULL,
    watermark_text TEXT NOT NULL,
    expires_at INTEGER,
    max_views INTEGER CHECK (max_views IS NULL OR max_views > 0),
    current_views INTEGER NOT NULL DEFAULT 0,
    is_burned INTEGER NOT NULL DEFAULT 0,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    expiry_notice_pending INTEGER NOT NULL DEFAULT 0,
    deleted_at INTEGER,
    created_at INTEGER NOT NULL
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id, created_at);

CREATE TABLE IF NOT EXISTS view_logs (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    session_id TEXT NOT NULL,
    ip_address TEXT NOT NULL,
    user_agent TEXT NOT NULL,
    duration_seconds INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    UNIQUE (document_id, session_id)
);
"#;

const DOCUMENT_COLUMNS: &str = "id, user_id, link_id, title, file_path, watermark_text, \
     expires_at, max_views, current_views, is_burned, is_deleted, created_at";

const VIEW_LOG_COLUMNS: &str =
    "id, document_id, session_id, ip_address, user_agent, duration_seconds, created_at";

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn uuid_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn optional_time_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => time_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        link_id: row.get(2)?,
        title: row.get(3)?,
        file_path: row.get(4)?,
        watermark_text: row.get(5)?,
        expires_at: optional_time_at(row, 6)?,
        max_views: row.get(7)?,
        current_views: row.get(8)?,
        is_burned: row.get(9)?,
        is_deleted: row.get(10)?,
        created_at: time_at(row, 11)?,
    })
}

fn row_to_view_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ViewLog> {
    Ok(ViewLog {
        id: uuid_at(row, 0)?,
        document_id: uuid_at(row, 1)?,
        session_id: row.get(2)?,
        ip_address: row.get(3)?,
        user_agent: row.get(4)?,
        duration_seconds: row.get(5)?,
        created_at: time_at(row, 6)?,
    })
}

/// `DocumentStore` backed by a single SQLite connection.
///
/// All calls are executed in order on the connection's worker thread, and
/// each operation is one statement, so every operation is atomic.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path`; `:memory:` opens a private
    /// in-memory database.
    pub async fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory().await?
        } else {
            Connection::open(path).await?
        };

        conn.call(|conn| conn.execute_batch(PRAGMAS).map_err(|e| e.into()))
            .await?;

        Ok(Self { conn })
    }

    /// Opens a private in-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self> {
        let store = Self::open(":memory:").await?;
        store.init_schema().await?;
        Ok(store)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| conn.execute_batch(SCHEMA).map_err(|e| e.into()))
            .await?;
        tracing::info!("SQLite schema initialized");
        Ok(())
    }

    async fn insert_document(&self, new: &NewDocument) -> Result<Document> {
        let new = new.clone();
        let document = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "INSERT INTO documents (id, user_id, link_id, title, file_path, watermark_text, \
                     expires_at, max_views, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     RETURNING {DOCUMENT_COLUMNS}"
                );
                let document = conn.query_row(
                    &sql,
                    params![
                        new.id.to_string(),
                        new.user_id.to_string(),
                        new.link_id,
                        new.title,
                        new.file_path,
                        new.watermark_text,
                        new.expires_at.map(to_millis),
                        new.max_views,
                        to_millis(new.created_at),
                    ],
                    row_to_document,
                )?;
                Ok(document)
            })
            .await?;
        Ok(document)
    }

    async fn find_by_link(&self, link_id: &str) -> Result<Option<Document>> {
        let link_id = link_id.to_string();
        let document = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE link_id = ?1 AND is_deleted = 0"
                );
                Ok(conn.query_row(&sql, params![link_id], row_to_document).optional()?)
            })
            .await?;
        Ok(document)
    }

    async fn find_owned(&self, id: Uuid, user_id: Uuid) -> Result<Option<Document>> {
        let document = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents \
                     WHERE id = ?1 AND user_id = ?2 AND is_deleted = 0"
                );
                Ok(conn
                    .query_row(&sql, params![id.to_string(), user_id.to_string()], row_to_document)
                    .optional()?)
            })
            .await?;
        Ok(document)
    }

    async fn list_owned(&self, user_id: Uuid) -> Result<Vec<DocumentSummary>> {
        let summaries = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {DOCUMENT_COLUMNS}, \
                       (SELECT COUNT(*) FROM view_logs v WHERE v.document_id = d.id), \
                       (SELECT COALESCE(SUM(v.duration_seconds), 0) FROM view_logs v WHERE v.document_id = d.id) \
                     FROM documents d \
                     WHERE user_id = ?1 AND is_deleted = 0 \
                     ORDER BY created_at DESC"
                );
                let mut statement = conn.prepare(&sql)?;
                let rows = statement.query_map(params![user_id.to_string()], |row| {
                    Ok(DocumentSummary::new(
                        row_to_document(row)?,
                        row.get(12)?,
                        row.get(13)?,
                    ))
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(summaries)
    }

    async fn consume_view(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<ViewCounters>> {
        let counters = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "UPDATE documents \
                         SET current_views = current_views + 1, \
                             is_burned = (max_views IS NOT NULL AND current_views + 1 >= max_views) \
                         WHERE id = ?1 \
                           AND is_burned = 0 \
                           AND is_deleted = 0 \
                           AND (expires_at IS NULL OR expires_at >= ?2) \
                           AND (max_views IS NULL OR current_views < max_views) \
                         RETURNING current_views, is_burned",
                        params![id.to_string(), to_millis(now)],
                        |row| {
                            Ok(ViewCounters {
                                current_views: row.get(0)?,
                                is_burned: row.get(1)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?;
        Ok(counters)
    }

    async fn mark_burned(&self, id: Uuid) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE documents SET is_burned = 1 WHERE id = ?1 AND is_burned = 0",
                    params![id.to_string()],
                )?)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn revoke(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE documents SET is_burned = 1 \
                     WHERE id = ?1 AND user_id = ?2 AND is_deleted = 0",
                    params![id.to_string(), user_id.to_string()],
                )?)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn soft_delete(&self, id: Uuid, user_id: Uuid) -> Result<Option<Document>> {
        let deleted_at = to_millis(Utc::now());
        let document = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "UPDATE documents SET is_deleted = 1, is_burned = 1, deleted_at = ?3 \
                     WHERE id = ?1 AND user_id = ?2 AND is_deleted = 0 \
                     RETURNING {DOCUMENT_COLUMNS}"
                );
                Ok(conn
                    .query_row(
                        &sql,
                        params![id.to_string(), user_id.to_string(), deleted_at],
                        row_to_document,
                    )
                    .optional()?)
            })
            .await?;
        Ok(document)
    }

    async fn burn_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE documents SET is_burned = 1, expiry_notice_pending = 1 \
                     WHERE is_burned = 0 AND is_deleted = 0 \
                       AND expires_at IS NOT NULL AND expires_at < ?1",
                    params![to_millis(now)],
                )?)
            })
            .await?;
        Ok(changed as u64)
    }

    async fn take_expiry_notice(&self, id: Uuid) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE documents SET expiry_notice_pending = 0 \
                     WHERE id = ?1 AND expiry_notice_pending = 1",
                    params![id.to_string()],
                )?)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn record_view(&self, entry: &NewViewLog) -> Result<()> {
        let entry = entry.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO view_logs (id, document_id, session_id, ip_address, user_agent, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT (document_id, session_id) DO NOTHING",
                    params![
                        Uuid::new_v4().to_string(),
                        entry.document_id.to_string(),
                        entry.session_id,
                        entry.ip_address,
                        entry.user_agent,
                        to_millis(entry.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn add_dwell(&self, entry: &NewViewLog, seconds: i64) -> Result<ViewLog> {
        let entry = entry.clone();
        let log = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "INSERT INTO view_logs (id, document_id, session_id, ip_address, user_agent, \
                     duration_seconds, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT (document_id, session_id) \
                     DO UPDATE SET duration_seconds = duration_seconds + excluded.duration_seconds \
                     RETURNING {VIEW_LOG_COLUMNS}"
                );
                Ok(conn.query_row(
                    &sql,
                    params![
                        Uuid::new_v4().to_string(),
                        entry.document_id.to_string(),
                        entry.session_id,
                        entry.ip_address,
                        entry.user_agent,
                        seconds,
                        to_millis(entry.created_at),
                    ],
                    row_to_view_log,
                )?)
            })
            .await?;
        Ok(log)
    }

    async fn list_view_logs(&self, document_id: Uuid) -> Result<Vec<ViewLog>> {
        let logs = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {VIEW_LOG_COLUMNS} FROM view_logs \
                     WHERE document_id = ?1 ORDER BY created_at ASC, rowid ASC"
                );
                let mut statement = conn.prepare(&sql)?;
                let rows = statement.query_map(params![document_id.to_string()], row_to_view_log)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await?;
        Ok(logs)
    }
}

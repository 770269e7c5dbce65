use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    db::PG_SCHEMA,
    error::Result,
    models::{
        document::{Document, DocumentSummary, NewDocument, ViewCounters},
        view_log::{NewViewLog, ViewLog},
    },
};

use super::store::DocumentStore;

const DOCUMENT_COLUMNS: &str = "id, user_id, link_id, title, file_path, watermark_text, \
     expires_at, max_views, current_views, is_burned, is_deleted, created_at";

const VIEW_LOG_COLUMNS: &str =
    "id, document_id, session_id, ip_address, user_agent, duration_seconds, created_at";

/// A helper function to map a `tokio_postgres::Row` to a `Document`.
fn row_to_document(row: &Row) -> Result<Document> {
    Ok(Document {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        link_id: row.try_get("link_id")?,
        title: row.try_get("title")?,
        file_path: row.try_get("file_path")?,
        watermark_text: row.try_get("watermark_text")?,
        expires_at: row.try_get("expires_at")?,
        max_views: row.try_get("max_views")?,
        current_views: row.try_get("current_views")?,
        is_burned: row.try_get("is_burned")?,
        is_deleted: row.try_get("is_deleted")?,
        created_at: row.try_get("created_at")?,
    })
}

/// A helper function to map a `tokio_postgres::Row` to a `ViewLog`.
fn row_to_view_log(row: &Row) -> Result<ViewLog> {
    Ok(ViewLog {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        session_id: row.try_get("session_id")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        duration_seconds: row.try_get("duration_seconds")?,
        created_at: row.try_get("created_at")?,
    })
}

/// `DocumentStore` backed by a deadpool-managed PostgreSQL pool.
///
/// Statements are prepared once per pooled connection through
/// `prepare_cached`.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Wraps an existing pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.batch_execute(PG_SCHEMA).await?;
        tracing::info!("PostgreSQL schema initialized");
        Ok(())
    }

    async fn insert_document(&self, new: &NewDocument) -> Result<Document> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            INSERT INTO documents (
                id, user_id, link_id, title, file_path, watermark_text,
                expires_at, max_views, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let statement = client.prepare_cached(&query).await?;
        let row = client
            .query_one(
                &statement,
                &[
                    &new.id,
                    &new.user_id,
                    &new.link_id,
                    &new.title,
                    &new.file_path,
                    &new.watermark_text,
                    &new.expires_at,
                    &new.max_views,
                    &new.created_at,
                ],
            )
            .await?;
        row_to_document(&row)
    }

    async fn find_by_link(&self, link_id: &str) -> Result<Option<Document>> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE link_id = $1 AND is_deleted = FALSE"
        );
        let statement = client.prepare_cached(&query).await?;
        let row = client.query_opt(&statement, &[&link_id]).await?;
        row.map(|r| row_to_document(&r)).transpose()
    }

    async fn find_owned(&self, id: Uuid, user_id: Uuid) -> Result<Option<Document>> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE id = $1 AND user_id = $2 AND is_deleted = FALSE"
        );
        let statement = client.prepare_cached(&query).await?;
        let row = client.query_opt(&statement, &[&id, &user_id]).await?;
        row.map(|r| row_to_document(&r)).transpose()
    }

    async fn list_owned(&self, user_id: Uuid) -> Result<Vec<DocumentSummary>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {DOCUMENT_COLUMNS},
                   (SELECT COUNT(*) FROM view_logs v WHERE v.document_id = d.id) AS view_count,
                   (SELECT COALESCE(SUM(v.duration_seconds), 0)::BIGINT
                      FROM view_logs v WHERE v.document_id = d.id) AS total_duration
            FROM documents d
            WHERE user_id = $1 AND is_deleted = FALSE
            ORDER BY created_at DESC
            "#
        );
        let statement = client.prepare_cached(&query).await?;
        let rows = client.query(&statement, &[&user_id]).await?;

        rows.iter()
            .map(|row| {
                Ok(DocumentSummary::new(
                    row_to_document(row)?,
                    row.try_get("view_count")?,
                    row.try_get("total_duration")?,
                ))
            })
            .collect()
    }

    async fn consume_view(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<ViewCounters>> {
        let client = self.pool.get().await?;
        // A concurrent UPDATE on the same row blocks on the row lock and then
        // re-evaluates the WHERE clause against the committed version.
        let statement = client
            .prepare_cached(
                r#"
                UPDATE documents
                SET current_views = current_views + 1,
                    is_burned = (max_views IS NOT NULL AND current_views + 1 >= max_views)
                WHERE id = $1
                  AND is_burned = FALSE
                  AND is_deleted = FALSE
                  AND (expires_at IS NULL OR expires_at >= $2)
                  AND (max_views IS NULL OR current_views < max_views)
                RETURNING current_views, is_burned
                "#,
            )
            .await?;
        let row = client.query_opt(&statement, &[&id, &now]).await?;

        row.map(|r| {
            Ok(ViewCounters {
                current_views: r.try_get("current_views")?,
                is_burned: r.try_get("is_burned")?,
            })
        })
        .transpose()
    }

    async fn mark_burned(&self, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("UPDATE documents SET is_burned = TRUE WHERE id = $1 AND is_burned = FALSE")
            .await?;
        Ok(client.execute(&statement, &[&id]).await? > 0)
    }

    async fn revoke(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                UPDATE documents
                SET is_burned = TRUE
                WHERE id = $1 AND user_id = $2 AND is_deleted = FALSE
                "#,
            )
            .await?;
        Ok(client.execute(&statement, &[&id, &user_id]).await? > 0)
    }

    async fn soft_delete(&self, id: Uuid, user_id: Uuid) -> Result<Option<Document>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            UPDATE documents
            SET is_deleted = TRUE, is_burned = TRUE, deleted_at = NOW()
            WHERE id = $1 AND user_id = $2 AND is_deleted = FALSE
            RETURNING {DOCUMENT_COLUMNS}
            "#
        );
        let statement = client.prepare_cached(&query).await?;
        let row = client.query_opt(&statement, &[&id, &user_id]).await?;
        row.map(|r| row_to_document(&r)).transpose()
    }

    async fn burn_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                UPDATE documents
                SET is_burned = TRUE, expiry_notice_pending = TRUE
                WHERE is_burned = FALSE AND is_deleted = FALSE
                  AND expires_at IS NOT NULL AND expires_at < $1
                "#,
            )
            .await?;
        Ok(client.execute(&statement, &[&now]).await?)
    }

    async fn take_expiry_notice(&self, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                "UPDATE documents SET expiry_notice_pending = FALSE \
                 WHERE id = $1 AND expiry_notice_pending = TRUE",
            )
            .await?;
        Ok(client.execute(&statement, &[&id]).await? > 0)
    }

    async fn record_view(&self, entry: &NewViewLog) -> Result<()> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                INSERT INTO view_logs (id, document_id, session_id, ip_address, user_agent, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (document_id, session_id) DO NOTHING
                "#,
            )
            .await?;
        client
            .execute(
                &statement,
                &[
                    &Uuid::new_v4(),
                    &entry.document_id,
                    &entry.session_id,
                    &entry.ip_address,
                    &entry.user_agent,
                    &entry.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn add_dwell(&self, entry: &NewViewLog, seconds: i64) -> Result<ViewLog> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            INSERT INTO view_logs (
                id, document_id, session_id, ip_address, user_agent, duration_seconds, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (document_id, session_id)
            DO UPDATE SET duration_seconds = view_logs.duration_seconds + EXCLUDED.duration_seconds
            RETURNING {VIEW_LOG_COLUMNS}
            "#
        );
        let statement = client.prepare_cached(&query).await?;
        let row = client
            .query_one(
                &statement,
                &[
                    &Uuid::new_v4(),
                    &entry.document_id,
                    &entry.session_id,
                    &entry.ip_address,
                    &entry.user_agent,
                    &seconds,
                    &entry.created_at,
                ],
            )
            .await?;
        row_to_view_log(&row)
    }

    async fn list_view_logs(&self, document_id: Uuid) -> Result<Vec<ViewLog>> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {VIEW_LOG_COLUMNS} FROM view_logs WHERE document_id = $1 ORDER BY created_at ASC"
        );
        let statement = client.prepare_cached(&query).await?;
        let rows = client.query(&statement, &[&document_id]).await?;
        rows.iter().map(row_to_view_log).collect()
    }
}

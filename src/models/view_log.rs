use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One row per (document, session): who looked and for how long.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewLog {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Client-generated, stable for the viewing tab's lifetime.
    pub session_id: String,
    pub ip_address: String,
    pub user_agent: String,
    /// Accumulated dwell time.
    pub duration_seconds: i64,
    pub created_at: DateTime<Utc>,
}

/// The identifying half of a `ViewLog`, written on first sight of a session.
#[derive(Debug, Clone)]
pub struct NewViewLog {
    pub document_id: Uuid,
    pub session_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

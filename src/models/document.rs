use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::watermark::content_type_for;

/// A shared document and its self-destruct policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// The unique identifier for the document.
    pub id: Uuid,
    /// The ID of the user who uploaded the document.
    pub user_id: Uuid,
    /// The public, unguessable link identifier.
    pub link_id: String,
    /// The title shown to the owner.
    pub title: String,
    /// Where the original bytes live. Never exposed to viewers.
    #[serde(skip_serializing)]
    pub file_path: String,
    /// Owner-chosen label kept with the document.
    pub watermark_text: String,
    /// Absolute expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// Maximum number of allowed views, if any.
    pub max_views: Option<i32>,
    /// Views consumed so far.
    pub current_views: i32,
    /// Terminal flag; never returns to `false`.
    pub is_burned: bool,
    /// Set by explicit owner deletion.
    #[serde(skip_serializing)]
    pub is_deleted: bool,
    /// The timestamp when the document was created.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Returns true when `now` is past the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now > exp)
    }

    /// Returns true when the view budget is used up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_views, Some(max) if self.current_views >= max)
    }

    /// Views left before the document burns, `None` when unlimited.
    pub fn remaining_views(&self) -> Option<i32> {
        self.max_views.map(|max| (max - self.current_views).max(0))
    }
}

/// The fields supplied by the upload flow.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: Uuid,
    pub user_id: Uuid,
    pub link_id: String,
    pub title: String,
    pub file_path: String,
    pub watermark_text: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_views: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Counters read back from the atomic view increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewCounters {
    pub current_views: i32,
    pub is_burned: bool,
}

/// Per-view totals attached to an owner listing.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ViewCount {
    pub views: i64,
}

/// A document as shown on the owner's dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    #[serde(flatten)]
    pub document: Document,
    /// Media type viewers receive.
    pub content_type: &'static str,
    /// `None` when the document has no view limit.
    pub remaining_views: Option<i32>,
    /// Total dwell time across all sessions.
    pub total_duration_seconds: i64,
    #[serde(rename = "_count")]
    pub count: ViewCount,
}

impl DocumentSummary {
    pub fn new(document: Document, views: i64, total_duration_seconds: i64) -> Self {
        Self {
            content_type: content_type_for(&document.file_path),
            remaining_views: document.remaining_views(),
            total_duration_seconds,
            count: ViewCount { views },
            document,
        }
    }
}

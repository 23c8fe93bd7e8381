//! Feedback log row model.

use sqlx::FromRow;
use storyreel_core::job::FeedbackEntry;
use storyreel_core::types::{DbId, Timestamp};

/// A row from the `feedback` table.
#[derive(Debug, Clone, FromRow)]
pub struct FeedbackRow {
    pub id: DbId,
    pub script_id: DbId,
    pub decision: String,
    pub notes: Option<String>,
    pub created_at: Timestamp,
}

impl From<FeedbackRow> for FeedbackEntry {
    fn from(row: FeedbackRow) -> Self {
        FeedbackEntry {
            script_id: row.script_id,
            decision: row.decision,
            notes: row.notes,
            created_at: row.created_at,
        }
    }
}

//! Repository for the append-only `feedback` table.

use sqlx::{SqliteConnection, SqlitePool};
use storyreel_core::job::FeedbackEntry;
use storyreel_core::types::DbId;

use crate::models::feedback::FeedbackRow;

/// Column list for feedback queries.
const COLUMNS: &str = "id, script_id, decision, notes, created_at";

/// Provides append and read operations for feedback decisions.
pub struct FeedbackRepo;

impl FeedbackRepo {
    /// Append a decision to the log.
    pub async fn append(
        conn: &mut SqliteConnection,
        entry: &FeedbackEntry,
    ) -> Result<FeedbackRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO feedback (script_id, decision, notes, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, FeedbackRow>(&query)
            .bind(entry.script_id)
            .bind(&entry.decision)
            .bind(&entry.notes)
            .bind(entry.created_at)
            .fetch_one(conn)
            .await
    }

    /// List all decisions for a script, oldest first.
    pub async fn list_for_script(
        pool: &SqlitePool,
        script_id: DbId,
    ) -> Result<Vec<FeedbackRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM feedback
             WHERE script_id = ?
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, FeedbackRow>(&query)
            .bind(script_id)
            .fetch_all(pool)
            .await
    }
}

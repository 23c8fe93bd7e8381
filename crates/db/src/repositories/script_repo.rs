//! Repository for the `scripts` table.

use sqlx::{SqliteConnection, SqlitePool};
use storyreel_core::job::{FormFactor, ScriptRecord, ScriptStatus};
use storyreel_core::types::{DbId, Timestamp};

use crate::models::script::ScriptRow;

/// Column list for scripts queries.
const COLUMNS: &str = "id, job_id, form_factor, narration, status, revision_notes, revision, \
    version, created_at, updated_at";

/// Provides persistence operations for scripts.
pub struct ScriptRepo;

impl ScriptRepo {
    /// Insert an empty `pending` script slot for a form factor.
    pub async fn create(
        pool: &SqlitePool,
        job_id: DbId,
        form_factor: FormFactor,
        now: Timestamp,
    ) -> Result<ScriptRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO scripts (job_id, form_factor, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ScriptRow>(&query)
            .bind(job_id)
            .bind(form_factor.as_str())
            .bind(ScriptStatus::Pending.as_str())
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Find a script by its ID.
    pub async fn find_by_id(pool: &SqlitePool, id: DbId) -> Result<Option<ScriptRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scripts WHERE id = ?");
        sqlx::query_as::<_, ScriptRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List all scripts of a job, ordered by ID.
    pub async fn list_for_job(pool: &SqlitePool, job_id: DbId) -> Result<Vec<ScriptRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scripts WHERE job_id = ? ORDER BY id ASC");
        sqlx::query_as::<_, ScriptRow>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// Write a script if its stored version still equals `script.version`.
    ///
    /// Returns `false` when no row matched.
    pub async fn update_versioned(
        conn: &mut SqliteConnection,
        script: &ScriptRecord,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scripts SET
                narration = ?,
                status = ?,
                revision_notes = ?,
                revision = ?,
                updated_at = ?,
                version = version + 1
             WHERE id = ? AND version = ?",
        )
        .bind(&script.narration)
        .bind(script.status.as_str())
        .bind(&script.revision_notes)
        .bind(script.revision)
        .bind(script.updated_at)
        .bind(script.id)
        .bind(script.version)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current stored version of a script, if it exists.
    pub async fn current_version(
        conn: &mut SqliteConnection,
        id: DbId,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM scripts WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(row.map(|r| r.0))
    }
}

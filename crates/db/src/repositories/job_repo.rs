//! Repository for the `jobs` table.

use sqlx::{SqliteConnection, SqlitePool};
use storyreel_core::job::{FormFactor, JobRecord, JobStatus};
use storyreel_core::types::{DbId, Timestamp};

use crate::models::job::JobRow;

/// Column list for jobs queries.
const COLUMNS: &str = "id, topic, research_summary, status, required_forms, failure_kind, \
    failure_reason, version, created_at, updated_at";

/// Provides persistence operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job in `created` status, returning the created row.
    pub async fn create(
        pool: &SqlitePool,
        topic: &str,
        required_forms: &[FormFactor],
        now: Timestamp,
    ) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (topic, status, required_forms, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(topic)
            .bind(JobStatus::Created.as_str())
            .bind(FormFactor::join_list(required_forms))
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &SqlitePool, id: DbId) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs in a given status, oldest first.
    pub async fn list_by_status(
        pool: &SqlitePool,
        status: JobStatus,
    ) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs
             WHERE status = ?
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(status.as_str())
            .fetch_all(pool)
            .await
    }

    /// Write a job if its stored version still equals `job.version`.
    ///
    /// Returns `false` when no row matched (stale version or missing job).
    pub async fn update_versioned(
        conn: &mut SqliteConnection,
        job: &JobRecord,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET
                research_summary = ?,
                status = ?,
                required_forms = ?,
                failure_kind = ?,
                failure_reason = ?,
                updated_at = ?,
                version = version + 1
             WHERE id = ? AND version = ?",
        )
        .bind(&job.research_summary)
        .bind(job.status.as_str())
        .bind(FormFactor::join_list(&job.required_forms))
        .bind(job.failure_kind.map(|k| k.as_str()))
        .bind(&job.failure_reason)
        .bind(job.updated_at)
        .bind(job.id)
        .bind(job.version)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current stored version of a job, if it exists.
    pub async fn current_version(
        conn: &mut SqliteConnection,
        id: DbId,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?;
        Ok(row.map(|r| r.0))
    }
}

//! Repository for the `production_runs` table.

use sqlx::SqlitePool;
use storyreel_core::store::RunRecord;
use storyreel_core::types::DbId;

use crate::models::production_run::ProductionRunRow;

/// Column list for production_runs queries.
const COLUMNS: &str = "id, job_id, script_id, run_dir, status, full_count, degraded_count, \
    dropped_count, failure_reason, final_video, created_at, updated_at";

/// Provides persistence operations for production runs.
pub struct ProductionRunRepo;

impl ProductionRunRepo {
    /// Insert a run, or update status/counts if the run directory is known.
    pub async fn upsert(pool: &SqlitePool, run: &RunRecord) -> Result<ProductionRunRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO production_runs
                (job_id, script_id, run_dir, status, full_count, degraded_count,
                 dropped_count, failure_reason, final_video, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (run_dir) DO UPDATE SET
                status = excluded.status,
                full_count = excluded.full_count,
                degraded_count = excluded.degraded_count,
                dropped_count = excluded.dropped_count,
                failure_reason = excluded.failure_reason,
                final_video = excluded.final_video,
                updated_at = excluded.updated_at
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProductionRunRow>(&query)
            .bind(run.job_id)
            .bind(run.script_id)
            .bind(&run.run_dir)
            .bind(run.status.as_str())
            .bind(run.counts.full as i64)
            .bind(run.counts.degraded as i64)
            .bind(run.counts.dropped as i64)
            .bind(&run.failure_reason)
            .bind(&run.final_video)
            .bind(run.created_at)
            .bind(run.updated_at)
            .fetch_one(pool)
            .await
    }

    /// List runs for a script, oldest first.
    pub async fn list_for_script(
        pool: &SqlitePool,
        script_id: DbId,
    ) -> Result<Vec<ProductionRunRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM production_runs
             WHERE script_id = ?
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, ProductionRunRow>(&query)
            .bind(script_id)
            .fetch_all(pool)
            .await
    }
}

//! Production run row model.

use sqlx::FromRow;
use storyreel_core::error::CoreError;
use storyreel_core::metadata::RunStatus;
use storyreel_core::outcome::OutcomeTally;
use storyreel_core::store::RunRecord;
use storyreel_core::types::{DbId, Timestamp};

/// A row from the `production_runs` table.
#[derive(Debug, Clone, FromRow)]
pub struct ProductionRunRow {
    pub id: DbId,
    pub job_id: DbId,
    pub script_id: DbId,
    pub run_dir: String,
    pub status: String,
    pub full_count: i64,
    pub degraded_count: i64,
    pub dropped_count: i64,
    pub failure_reason: Option<String>,
    pub final_video: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

fn count(value: i64, column: &str) -> Result<usize, CoreError> {
    usize::try_from(value)
        .map_err(|_| CoreError::Validation(format!("Negative {column} in production run row")))
}

impl TryFrom<ProductionRunRow> for RunRecord {
    type Error = CoreError;

    fn try_from(row: ProductionRunRow) -> Result<Self, Self::Error> {
        Ok(RunRecord {
            job_id: row.job_id,
            script_id: row.script_id,
            run_dir: row.run_dir,
            status: row.status.parse::<RunStatus>()?,
            counts: OutcomeTally {
                full: count(row.full_count, "full_count")?,
                degraded: count(row.degraded_count, "degraded_count")?,
                dropped: count(row.dropped_count, "dropped_count")?,
            },
            failure_reason: row.failure_reason,
            final_video: row.final_video,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

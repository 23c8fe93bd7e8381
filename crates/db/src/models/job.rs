//! Job row model.

use sqlx::FromRow;
use storyreel_core::error::CoreError;
use storyreel_core::job::{FailureKind, FormFactor, JobRecord, JobStatus};
use storyreel_core::types::{DbId, Timestamp};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: DbId,
    pub topic: String,
    pub research_summary: Option<String>,
    pub status: String,
    pub required_forms: String,
    pub failure_kind: Option<String>,
    pub failure_reason: Option<String>,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = CoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(JobRecord {
            id: row.id,
            topic: row.topic,
            research_summary: row.research_summary,
            status: row.status.parse::<JobStatus>()?,
            required_forms: FormFactor::parse_list(&row.required_forms)?,
            failure_kind: row
                .failure_kind
                .as_deref()
                .map(str::parse::<FailureKind>)
                .transpose()?,
            failure_reason: row.failure_reason,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

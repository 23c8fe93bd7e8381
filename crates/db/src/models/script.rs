//! Script row model.

use sqlx::FromRow;
use storyreel_core::error::CoreError;
use storyreel_core::job::{FormFactor, ScriptRecord, ScriptStatus};
use storyreel_core::types::{DbId, Timestamp};

/// A row from the `scripts` table.
#[derive(Debug, Clone, FromRow)]
pub struct ScriptRow {
    pub id: DbId,
    pub job_id: DbId,
    pub form_factor: String,
    pub narration: Option<String>,
    pub status: String,
    pub revision_notes: Option<String>,
    pub revision: i32,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<ScriptRow> for ScriptRecord {
    type Error = CoreError;

    fn try_from(row: ScriptRow) -> Result<Self, Self::Error> {
        Ok(ScriptRecord {
            id: row.id,
            job_id: row.job_id,
            form_factor: row.form_factor.parse::<FormFactor>()?,
            narration: row.narration,
            status: row.status.parse::<ScriptStatus>()?,
            revision_notes: row.revision_notes,
            revision: row.revision,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

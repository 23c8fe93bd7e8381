//! SQLite-backed [`JobStore`].
//!
//! A commit runs in one transaction: every record is written with
//! `WHERE id = ? AND version = ?`, and a zero-row update rolls the whole
//! transaction back with [`CoreError::Conflict`].

use async_trait::async_trait;
use chrono::Utc;
use storyreel_core::error::CoreError;
use storyreel_core::job::{
    FeedbackEntry, JobRecord, JobStatus, NewJob, NewScript, ScriptRecord, StateCommit,
};
use storyreel_core::store::{JobStore, RunRecord};
use storyreel_core::types::DbId;

use crate::repositories::{FeedbackRepo, JobRepo, ProductionRunRepo, ScriptRepo};
use crate::DbPool;

/// [`JobStore`] over a SQLite pool.
#[derive(Clone)]
pub struct SqlJobStore {
    pool: DbPool,
}

impl SqlJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return CoreError::Conflict(db.message().to_string());
        }
    }
    CoreError::Internal(format!("database error: {e}"))
}

fn stale(entity: &'static str, id: DbId, expected: i64, actual: Option<i64>) -> CoreError {
    match actual {
        Some(actual) => CoreError::Conflict(format!(
            "{entity} {id} was modified concurrently (loaded version {expected}, stored version {actual})"
        )),
        None => CoreError::NotFound { entity, id },
    }
}

#[async_trait]
impl JobStore for SqlJobStore {
    async fn insert_job(&self, new: &NewJob) -> Result<JobRecord, CoreError> {
        if new.required_forms.is_empty() {
            return Err(CoreError::Validation(
                "At least one form factor is required".to_string(),
            ));
        }
        let row = JobRepo::create(&self.pool, &new.topic, &new.required_forms, Utc::now())
            .await
            .map_err(db_err)?;
        JobRecord::try_from(row)
    }

    async fn insert_script(&self, new: &NewScript) -> Result<ScriptRecord, CoreError> {
        if JobRepo::find_by_id(&self.pool, new.job_id)
            .await
            .map_err(db_err)?
            .is_none()
        {
            return Err(CoreError::NotFound {
                entity: "job",
                id: new.job_id,
            });
        }
        let row = ScriptRepo::create(&self.pool, new.job_id, new.form_factor, Utc::now())
            .await
            .map_err(db_err)?;
        ScriptRecord::try_from(row)
    }

    async fn load_job(&self, id: DbId) -> Result<JobRecord, CoreError> {
        JobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(db_err)?
            .ok_or(CoreError::NotFound { entity: "job", id })
            .and_then(JobRecord::try_from)
    }

    async fn load_script(&self, id: DbId) -> Result<ScriptRecord, CoreError> {
        ScriptRepo::find_by_id(&self.pool, id)
            .await
            .map_err(db_err)?
            .ok_or(CoreError::NotFound {
                entity: "script",
                id,
            })
            .and_then(ScriptRecord::try_from)
    }

    async fn scripts_for_job(&self, job_id: DbId) -> Result<Vec<ScriptRecord>, CoreError> {
        ScriptRepo::list_for_job(&self.pool, job_id)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(ScriptRecord::try_from)
            .collect()
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, CoreError> {
        JobRepo::list_by_status(&self.pool, status)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(JobRecord::try_from)
            .collect()
    }

    async fn feedback_for_script(&self, script_id: DbId) -> Result<Vec<FeedbackEntry>, CoreError> {
        Ok(FeedbackRepo::list_for_script(&self.pool, script_id)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(FeedbackEntry::from)
            .collect())
    }

    async fn commit(&self, mut commit: StateCommit) -> Result<StateCommit, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if let Some(job) = commit.job.as_mut() {
            if !JobRepo::update_versioned(&mut tx, job).await.map_err(db_err)? {
                let actual = JobRepo::current_version(&mut tx, job.id)
                    .await
                    .map_err(db_err)?;
                return Err(stale("job", job.id, job.version, actual));
            }
            job.version += 1;
        }

        for script in commit.scripts.iter_mut() {
            if !ScriptRepo::update_versioned(&mut tx, script)
                .await
                .map_err(db_err)?
            {
                let actual = ScriptRepo::current_version(&mut tx, script.id)
                    .await
                    .map_err(db_err)?;
                return Err(stale("script", script.id, script.version, actual));
            }
            script.version += 1;
        }

        if let Some(entry) = &commit.feedback {
            FeedbackRepo::append(&mut tx, entry).await.map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(
            job_id = commit.job.as_ref().map(|j| j.id),
            scripts = commit.scripts.len(),
            "State committed"
        );
        Ok(commit)
    }

    async fn upsert_run(&self, run: &RunRecord) -> Result<(), CoreError> {
        ProductionRunRepo::upsert(&self.pool, run)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn runs_for_script(&self, script_id: DbId) -> Result<Vec<RunRecord>, CoreError> {
        ProductionRunRepo::list_for_script(&self.pool, script_id)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(RunRecord::try_from)
            .collect()
    }
}

//! Job/script persistence seam.
//!
//! [`JobStore::commit`] is the single atomic write path for state changes:
//! every record in a [`StateCommit`] carries the version it was loaded at and
//! the whole commit is rejected with [`CoreError::Conflict`] if any of them
//! is stale. Successful commits return the records with bumped versions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::job::{
    FeedbackEntry, JobRecord, JobStatus, NewJob, NewScript, ScriptRecord, ScriptStatus, StateCommit,
};
use crate::metadata::RunStatus;
use crate::outcome::OutcomeTally;
use crate::types::{DbId, Timestamp};

/// Persisted summary of one production run, keyed by its run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub job_id: DbId,
    pub script_id: DbId,
    pub run_dir: String,
    pub status: RunStatus,
    pub counts: OutcomeTally,
    pub failure_reason: Option<String>,
    pub final_video: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, new: &NewJob) -> Result<JobRecord, CoreError>;

    /// Fails with `Conflict` if the job already has a script for that form.
    async fn insert_script(&self, new: &NewScript) -> Result<ScriptRecord, CoreError>;

    async fn load_job(&self, id: DbId) -> Result<JobRecord, CoreError>;

    async fn load_script(&self, id: DbId) -> Result<ScriptRecord, CoreError>;

    async fn scripts_for_job(&self, job_id: DbId) -> Result<Vec<ScriptRecord>, CoreError>;

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, CoreError>;

    async fn feedback_for_script(&self, script_id: DbId) -> Result<Vec<FeedbackEntry>, CoreError>;

    /// Apply a set of updates atomically under optimistic versioning.
    async fn commit(&self, commit: StateCommit) -> Result<StateCommit, CoreError>;

    /// Insert or replace the run record for `run.run_dir`.
    async fn upsert_run(&self, run: &RunRecord) -> Result<(), CoreError>;

    async fn runs_for_script(&self, script_id: DbId) -> Result<Vec<RunRecord>, CoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    next_id: DbId,
    jobs: BTreeMap<DbId, JobRecord>,
    scripts: BTreeMap<DbId, ScriptRecord>,
    feedback: Vec<FeedbackEntry>,
    runs: BTreeMap<String, RunRecord>,
}

impl MemoryState {
    fn allocate_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local [`JobStore`] for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stale(entity: &str, id: DbId, expected: i64, actual: i64) -> CoreError {
    CoreError::Conflict(format!(
        "{entity} {id} was modified concurrently (loaded version {expected}, stored version {actual})"
    ))
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, new: &NewJob) -> Result<JobRecord, CoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let job = JobRecord {
            id: state.allocate_id(),
            topic: new.topic.clone(),
            research_summary: None,
            status: JobStatus::Created,
            required_forms: new.required_forms.clone(),
            failure_kind: None,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn insert_script(&self, new: &NewScript) -> Result<ScriptRecord, CoreError> {
        let mut state = self.state.lock().await;
        if !state.jobs.contains_key(&new.job_id) {
            return Err(CoreError::NotFound {
                entity: "job",
                id: new.job_id,
            });
        }
        if state
            .scripts
            .values()
            .any(|s| s.job_id == new.job_id && s.form_factor == new.form_factor)
        {
            return Err(CoreError::Conflict(format!(
                "Job {} already has a {} script",
                new.job_id, new.form_factor
            )));
        }
        let now = Utc::now();
        let script = ScriptRecord {
            id: state.allocate_id(),
            job_id: new.job_id,
            form_factor: new.form_factor,
            narration: None,
            status: ScriptStatus::Pending,
            revision_notes: None,
            revision: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        state.scripts.insert(script.id, script.clone());
        Ok(script)
    }

    async fn load_job(&self, id: DbId) -> Result<JobRecord, CoreError> {
        self.state
            .lock()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound { entity: "job", id })
    }

    async fn load_script(&self, id: DbId) -> Result<ScriptRecord, CoreError> {
        self.state
            .lock()
            .await
            .scripts
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "script",
                id,
            })
    }

    async fn scripts_for_job(&self, job_id: DbId) -> Result<Vec<ScriptRecord>, CoreError> {
        let state = self.state.lock().await;
        Ok(state
            .scripts
            .values()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, CoreError> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect())
    }

    async fn feedback_for_script(&self, script_id: DbId) -> Result<Vec<FeedbackEntry>, CoreError> {
        let state = self.state.lock().await;
        Ok(state
            .feedback
            .iter()
            .filter(|f| f.script_id == script_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, mut commit: StateCommit) -> Result<StateCommit, CoreError> {
        let mut state = self.state.lock().await;

        // Validate every version before touching anything.
        if let Some(job) = &commit.job {
            let stored = state.jobs.get(&job.id).ok_or(CoreError::NotFound {
                entity: "job",
                id: job.id,
            })?;
            if stored.version != job.version {
                return Err(stale("Job", job.id, job.version, stored.version));
            }
        }
        for script in &commit.scripts {
            let stored = state.scripts.get(&script.id).ok_or(CoreError::NotFound {
                entity: "script",
                id: script.id,
            })?;
            if stored.version != script.version {
                return Err(stale("Script", script.id, script.version, stored.version));
            }
        }

        if let Some(job) = commit.job.as_mut() {
            job.version += 1;
            state.jobs.insert(job.id, job.clone());
        }
        for script in commit.scripts.iter_mut() {
            script.version += 1;
            state.scripts.insert(script.id, script.clone());
        }
        if let Some(entry) = &commit.feedback {
            state.feedback.push(entry.clone());
        }
        Ok(commit)
    }

    async fn upsert_run(&self, run: &RunRecord) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        state.runs.insert(run.run_dir.clone(), run.clone());
        Ok(())
    }

    async fn runs_for_script(&self, script_id: DbId) -> Result<Vec<RunRecord>, CoreError> {
        let state = self.state.lock().await;
        let mut runs: Vec<RunRecord> = state
            .runs
            .values()
            .filter(|r| r.script_id == script_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::job::FormFactor;

    async fn seeded() -> (MemoryJobStore, JobRecord, ScriptRecord) {
        let store = MemoryJobStore::new();
        let job = store
            .insert_job(&NewJob {
                topic: "Tides".into(),
                required_forms: vec![FormFactor::LongForm],
            })
            .await
            .unwrap();
        let script = store
            .insert_script(&NewScript {
                job_id: job.id,
                form_factor: FormFactor::LongForm,
            })
            .await
            .unwrap();
        (store, job, script)
    }

    #[tokio::test]
    async fn commit_bumps_versions() {
        let (store, mut job, _) = seeded().await;
        job.status = JobStatus::Researching;
        let committed = store
            .commit(StateCommit {
                job: Some(job),
                ..Default::default()
            })
            .await
            .unwrap();
        let stored = store.load_job(committed.job.as_ref().unwrap().id).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status, JobStatus::Researching);
    }

    #[tokio::test]
    async fn stale_commit_rejected_without_partial_writes() {
        let (store, job, script) = seeded().await;

        let mut first = job.clone();
        first.status = JobStatus::Researching;
        store
            .commit(StateCommit {
                job: Some(first),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut second_script = script.clone();
        second_script.narration = Some("Text.".into());
        let mut second_job = job;
        second_job.status = JobStatus::Failed;
        let err = store
            .commit(StateCommit {
                job: Some(second_job),
                scripts: vec![second_script],
                feedback: None,
            })
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Conflict(_));

        let stored_script = store.load_script(script.id).await.unwrap();
        assert!(stored_script.narration.is_none());
        assert_eq!(stored_script.version, 0);
    }

    #[tokio::test]
    async fn duplicate_form_factor_rejected() {
        let (store, job, _) = seeded().await;
        let err = store
            .insert_script(&NewScript {
                job_id: job.id,
                form_factor: FormFactor::LongForm,
            })
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Conflict(_));
    }

    #[tokio::test]
    async fn feedback_log_appends() {
        let (store, _, script) = seeded().await;
        store
            .commit(StateCommit {
                feedback: Some(FeedbackEntry {
                    script_id: script.id,
                    decision: "approve".into(),
                    notes: None,
                    created_at: Utc::now(),
                }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.feedback_for_script(script.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn runs_upsert_by_directory() {
        let (store, job, script) = seeded().await;
        let now = Utc::now();
        let mut run = RunRecord {
            job_id: job.id,
            script_id: script.id,
            run_dir: "out/tides/long_form/20240101_000000".into(),
            status: RunStatus::Running,
            counts: OutcomeTally::default(),
            failure_reason: None,
            final_video: None,
            created_at: now,
            updated_at: now,
        };
        store.upsert_run(&run).await.unwrap();
        run.status = RunStatus::Completed;
        store.upsert_run(&run).await.unwrap();

        let runs = store.runs_for_script(script.id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let store = MemoryJobStore::new();
        assert_matches!(
            store.load_job(42).await,
            Err(CoreError::NotFound { entity: "job", id: 42 })
        );
    }
}

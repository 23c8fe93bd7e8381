//! Lifecycle controller.
//!
//! Every operation follows the same shape: load the current records, apply a
//! pure transition from `storyreel_core::lifecycle`, persist the result with
//! one [`JobStore::commit`], then publish events. A concurrent writer makes
//! the commit fail with `Conflict`; the caller reloads and retries.
//!
//! The controller also keeps a cancellation token per job so a `quit`
//! decision stops any production work in flight for that job.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use storyreel_core::error::CoreError;
use storyreel_core::feedback::FeedbackDecision;
use storyreel_core::job::{
    FailureKind, FeedbackEntry, FormFactor, JobRecord, JobStatus, NewJob, NewScript, ScriptRecord,
    StateCommit,
};
use storyreel_core::lifecycle::{self, FeedbackOutcome};
use storyreel_core::store::JobStore;
use storyreel_core::types::DbId;
use storyreel_events::bus::{
    EVENT_JOB_STATUS_CHANGED, EVENT_SCRIPT_FEEDBACK, EVENT_SCRIPT_NARRATION,
};
use storyreel_events::{EventBus, PipelineEvent};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct Lifecycle {
    store: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    cancellations: Mutex<HashMap<DbId, CancellationToken>>,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn JobStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Cancellation registry
    // -----------------------------------------------------------------------

    /// Token cancelled when the job is quit. Child of `parent`, so a
    /// process-wide shutdown also reaches it.
    pub async fn cancellation_token(&self, job_id: DbId, parent: &CancellationToken) -> CancellationToken {
        let mut tokens = self.cancellations.lock().await;
        tokens
            .entry(job_id)
            .or_insert_with(|| parent.child_token())
            .clone()
    }

    /// Forget the job's token once its work has finished.
    pub async fn release(&self, job_id: DbId) {
        self.cancellations.lock().await.remove(&job_id);
    }

    async fn cancel_job(&self, job_id: DbId) {
        if let Some(token) = self.cancellations.lock().await.remove(&job_id) {
            tracing::info!(job_id, "Cancelling in-flight work for job");
            token.cancel();
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Create a job and one empty script slot per required form.
    pub async fn create_job(
        &self,
        topic: &str,
        required_forms: &[FormFactor],
    ) -> Result<(JobRecord, Vec<ScriptRecord>), CoreError> {
        if topic.trim().is_empty() {
            return Err(CoreError::Validation("Topic must not be empty".to_string()));
        }
        if required_forms.is_empty() {
            return Err(CoreError::Validation(
                "At least one form factor is required".to_string(),
            ));
        }

        let job = self
            .store
            .insert_job(&NewJob {
                topic: topic.trim().to_string(),
                required_forms: required_forms.to_vec(),
            })
            .await?;
        let mut scripts = Vec::with_capacity(required_forms.len());
        for form in required_forms {
            scripts.push(
                self.store
                    .insert_script(&NewScript {
                        job_id: job.id,
                        form_factor: *form,
                    })
                    .await?,
            );
        }

        tracing::info!(job_id = job.id, topic = %job.topic, "Job created");
        self.publish_status(&job, None);
        Ok((job, scripts))
    }

    pub async fn begin_research(&self, job_id: DbId) -> Result<JobRecord, CoreError> {
        let mut job = self.store.load_job(job_id).await?;
        let from = job.status;
        lifecycle::transition_job(&mut job, JobStatus::Researching, Utc::now())?;
        self.commit_job(job, from).await
    }

    /// Store the research summary and move on to scripting.
    pub async fn record_research(&self, job_id: DbId, summary: &str) -> Result<JobRecord, CoreError> {
        let mut job = self.store.load_job(job_id).await?;
        let from = job.status;
        lifecycle::transition_job(&mut job, JobStatus::Scripting, Utc::now())?;
        job.research_summary = Some(summary.to_string());
        self.commit_job(job, from).await
    }

    /// Attach narration to the job's script for `form`.
    ///
    /// Once every required form has text the job moves to
    /// `awaiting_feedback` (or straight to `approved` when the other scripts
    /// were already approved before a revision).
    pub async fn provide_narration(
        &self,
        job_id: DbId,
        form: FormFactor,
        text: &str,
    ) -> Result<(JobRecord, ScriptRecord), CoreError> {
        let mut job = self.store.load_job(job_id).await?;
        let mut scripts = self.store.scripts_for_job(job_id).await?;
        let idx = scripts
            .iter()
            .position(|s| s.form_factor == form)
            .ok_or_else(|| {
                CoreError::Validation(format!("Job {job_id} does not require a {form} script"))
            })?;

        let now = Utc::now();
        let from = job.status;
        lifecycle::apply_narration(&job, &mut scripts[idx], text, now)?;
        let moved = lifecycle::advance_to_feedback(&mut job, &scripts, now)?;

        // The job is committed even when unchanged; a sibling narration
        // committed in between makes this fail with `Conflict`.
        let script = scripts.swap_remove(idx);
        let committed = self
            .store
            .commit(StateCommit {
                job: Some(job),
                scripts: vec![script],
                feedback: None,
            })
            .await?;

        let script = committed
            .scripts
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Internal("commit returned no script".to_string()))?;
        let job = committed
            .job
            .ok_or_else(|| CoreError::Internal("commit returned no job".to_string()))?;
        if moved {
            self.publish_status(&job, Some(from));
        }

        tracing::info!(
            job_id,
            script_id = script.id,
            form_factor = %form,
            revision = script.revision,
            "Narration recorded",
        );
        self.bus.publish(
            PipelineEvent::new(EVENT_SCRIPT_NARRATION)
                .with_job(job_id)
                .with_script(script.id)
                .with_payload(json!({ "revision": script.revision })),
        );
        Ok((job, script))
    }

    /// Apply a reviewer decision to one script.
    ///
    /// The decision and the resulting status changes are committed together
    /// with a feedback log entry. A `quit` also cancels the job's token.
    pub async fn submit_feedback(
        &self,
        script_id: DbId,
        decision: &FeedbackDecision,
    ) -> Result<FeedbackOutcome, CoreError> {
        let script = self.store.load_script(script_id).await?;
        let mut job = self.store.load_job(script.job_id).await?;
        let mut scripts = self.store.scripts_for_job(job.id).await?;

        let now = Utc::now();
        let from = job.status;
        let outcome = lifecycle::apply_feedback(&mut job, &mut scripts, script_id, decision, now)?;

        // The job is committed even when unchanged; a decision on a sibling
        // script committed in between makes this fail with `Conflict`.
        let changed: Vec<ScriptRecord> =
            scripts.into_iter().filter(|s| s.id == script_id).collect();
        let committed = self
            .store
            .commit(StateCommit {
                job: Some(job),
                scripts: changed,
                feedback: Some(FeedbackEntry {
                    script_id,
                    decision: decision.name().to_string(),
                    notes: decision.notes().map(str::to_string),
                    created_at: now,
                }),
            })
            .await?;

        tracing::info!(
            job_id = script.job_id,
            script_id,
            decision = decision.name(),
            outcome = ?outcome,
            "Feedback applied",
        );
        self.bus.publish(
            PipelineEvent::new(EVENT_SCRIPT_FEEDBACK)
                .with_job(script.job_id)
                .with_script(script_id)
                .with_payload(json!({
                    "decision": decision.name(),
                    "notes": decision.notes(),
                })),
        );
        if let Some(job) = committed.job.as_ref().filter(|j| j.status != from) {
            self.publish_status(job, Some(from));
        }
        if outcome == FeedbackOutcome::Aborted {
            self.cancel_job(script.job_id).await;
        }
        Ok(outcome)
    }

    /// Enter `rendering` from `approved`, or retry after a failed run.
    pub async fn begin_rendering(&self, job_id: DbId) -> Result<JobRecord, CoreError> {
        let mut job = self.store.load_job(job_id).await?;
        if job.status == JobStatus::Failed {
            return self.retry_rendering(job_id).await;
        }
        let from = job.status;
        lifecycle::transition_job(&mut job, JobStatus::Rendering, Utc::now())?;
        self.commit_job(job, from).await
    }

    /// Re-enter `rendering` after a run failure. User aborts are final.
    pub async fn retry_rendering(&self, job_id: DbId) -> Result<JobRecord, CoreError> {
        let mut job = self.store.load_job(job_id).await?;
        let from = job.status;
        lifecycle::retry_rendering(&mut job, Utc::now())?;
        tracing::info!(job_id, "Retrying rendering after failed run");
        self.commit_job(job, from).await
    }

    pub async fn complete(&self, job_id: DbId) -> Result<JobRecord, CoreError> {
        let mut job = self.store.load_job(job_id).await?;
        let from = job.status;
        lifecycle::transition_job(&mut job, JobStatus::Completed, Utc::now())?;
        self.commit_job(job, from).await
    }

    pub async fn fail(
        &self,
        job_id: DbId,
        kind: FailureKind,
        reason: &str,
    ) -> Result<JobRecord, CoreError> {
        let mut job = self.store.load_job(job_id).await?;
        let from = job.status;
        lifecycle::fail_job(&mut job, kind, reason, Utc::now())?;
        tracing::error!(job_id, kind = kind.as_str(), reason, "Job failed");
        self.commit_job(job, from).await
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn commit_job(&self, job: JobRecord, from: JobStatus) -> Result<JobRecord, CoreError> {
        let committed = self
            .store
            .commit(StateCommit {
                job: Some(job),
                ..Default::default()
            })
            .await?;
        let job = committed
            .job
            .ok_or_else(|| CoreError::Internal("commit returned no job".to_string()))?;
        self.publish_status(&job, Some(from));
        Ok(job)
    }

    fn publish_status(&self, job: &JobRecord, from: Option<JobStatus>) {
        if let Some(from) = from {
            tracing::info!(job_id = job.id, from = %from, to = %job.status, "Job status changed");
        }
        self.bus.publish(
            PipelineEvent::new(EVENT_JOB_STATUS_CHANGED)
                .with_job(job.id)
                .with_payload(json!({
                    "from": from.map(JobStatus::as_str),
                    "to": job.status.as_str(),
                    "reason": job.failure_reason,
                })),
        );
    }
}

//! Studio driver: one topic in, one finished video per required form out.
//!
//! ```text
//! create -> research -> narration (per form) -> feedback loop -> render
//! ```

use std::sync::Arc;
use std::time::Duration;

use storyreel_core::error::CoreError;
use storyreel_core::feedback::{FeedbackDecision, DEFAULT_FEEDBACK_TIMEOUT_SECS};
use storyreel_core::job::{FailureKind, FormFactor, JobRecord, JobStatus, ScriptRecord, ScriptStatus};
use storyreel_core::lifecycle::FeedbackOutcome;
use storyreel_core::types::DbId;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, ServiceError};
use crate::feedback::{collect_with_timeout, FeedbackRequest, FeedbackSource};
use crate::lifecycle::Lifecycle;
use crate::providers::{ContentWriter, NarrationRequest};
use crate::retry::{with_retry, RetryPolicy};
use crate::runner::{CompletedRun, ProductionRunner};

/// Revisions allowed per script before the job is failed.
pub const MAX_REVISIONS: i32 = 5;

/// How a production ended when no error occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductionOutcome {
    Completed { job_id: DbId, runs: Vec<CompletedRun> },
    /// The reviewer quit.
    Aborted { job_id: DbId },
}

pub struct Studio {
    lifecycle: Arc<Lifecycle>,
    writer: Arc<dyn ContentWriter>,
    feedback: Arc<dyn FeedbackSource>,
    runner: Arc<ProductionRunner>,
    required_forms: Vec<FormFactor>,
    feedback_timeout: Duration,
    retry: RetryPolicy,
}

impl Studio {
    pub fn new(
        writer: Arc<dyn ContentWriter>,
        feedback: Arc<dyn FeedbackSource>,
        runner: Arc<ProductionRunner>,
        required_forms: Vec<FormFactor>,
    ) -> Self {
        Self {
            lifecycle: Arc::clone(runner.lifecycle()),
            writer,
            feedback,
            runner,
            required_forms,
            feedback_timeout: Duration::from_secs(DEFAULT_FEEDBACK_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_feedback_timeout(mut self, timeout: Duration) -> Self {
        self.feedback_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Produce videos for `topic`.
    pub async fn produce(
        &self,
        topic: &str,
        cancel: &CancellationToken,
    ) -> Result<ProductionOutcome, PipelineError> {
        let (job, _) = self.lifecycle.create_job(topic, &self.required_forms).await?;
        let job_id = job.id;
        let token = self.lifecycle.cancellation_token(job_id, cancel).await;

        let drafted = self.draft(&job, &token).await;
        let reviewed = match drafted {
            Ok(research) => self.review(job_id, &research, &token).await,
            Err(e) => Err(e),
        };

        match reviewed {
            Ok(true) => {
                self.lifecycle.release(job_id).await;
                let runs = self.runner.render_job(job_id, cancel).await?;
                Ok(ProductionOutcome::Completed { job_id, runs })
            }
            Ok(false) => {
                self.lifecycle.release(job_id).await;
                tracing::info!(job_id, "Production aborted by reviewer");
                Ok(ProductionOutcome::Aborted { job_id })
            }
            Err(e) => {
                self.lifecycle.release(job_id).await;
                let current = self.lifecycle.store().load_job(job_id).await?;
                if !current.status.is_terminal() {
                    self.lifecycle
                        .fail(job_id, FailureKind::StageFailed, &e.to_string())
                        .await?;
                }
                Err(e)
            }
        }
    }

    /// Research the topic and write the first narration for every form.
    /// Returns the research summary.
    async fn draft(&self, job: &JobRecord, cancel: &CancellationToken) -> Result<String, PipelineError> {
        self.lifecycle.begin_research(job.id).await?;
        let research = with_retry(&self.retry, cancel, "research", |_| {
            self.writer.research(&job.topic)
        })
        .await
        .map_err(|e| stage_error("research", e))?;
        self.lifecycle.record_research(job.id, &research).await?;

        for form in &self.required_forms {
            self.write_narration(job, &research, *form, None, cancel)
                .await?;
        }
        Ok(research)
    }

    async fn write_narration(
        &self,
        job: &JobRecord,
        research: &str,
        form: FormFactor,
        revision_notes: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ScriptRecord, PipelineError> {
        let request = NarrationRequest {
            topic: &job.topic,
            research,
            form_factor: form,
            revision_notes,
        };
        let text = with_retry(&self.retry, cancel, "narration", |_| {
            self.writer.write_narration(&request)
        })
        .await
        .map_err(|e| stage_error("narration", e))?;
        let (_, script) = self.lifecycle.provide_narration(job.id, form, &text).await?;
        Ok(script)
    }

    /// Run feedback rounds until the job is approved (`true`) or quit
    /// (`false`).
    async fn review(
        &self,
        job_id: DbId,
        research: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, PipelineError> {
        let store = self.lifecycle.store();
        loop {
            let job = store.load_job(job_id).await?;
            match job.status {
                JobStatus::Approved => return Ok(true),
                JobStatus::Failed => return Ok(false),
                JobStatus::AwaitingFeedback | JobStatus::Scripting => {}
                other => {
                    return Err(CoreError::Validation(format!(
                        "Job {job_id} is '{other}' during review"
                    ))
                    .into())
                }
            }

            let scripts = store.scripts_for_job(job_id).await?;
            let pending: Vec<ScriptRecord> = scripts
                .into_iter()
                .filter(|s| s.status == ScriptStatus::Pending && s.narration.is_some())
                .collect();
            if pending.is_empty() {
                return Err(CoreError::Internal(format!(
                    "Job {job_id} is '{}' with no script to review",
                    job.status
                ))
                .into());
            }

            for script in pending {
                let request = FeedbackRequest {
                    job_id,
                    script_id: script.id,
                    form_factor: script.form_factor,
                    topic: job.topic.clone(),
                    narration: script.narration.clone().unwrap_or_default(),
                    revision: script.revision,
                };
                let decision = tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    decision = collect_with_timeout(
                        self.feedback.as_ref(),
                        &request,
                        self.feedback_timeout,
                    ) => decision,
                };

                match self.lifecycle.submit_feedback(script.id, &decision).await? {
                    FeedbackOutcome::Aborted => return Ok(false),
                    FeedbackOutcome::Approved { .. } => {}
                    FeedbackOutcome::RevisionRequested => {
                        if script.revision >= MAX_REVISIONS {
                            return Err(CoreError::Validation(format!(
                                "Script {} reached the revision limit of {MAX_REVISIONS}",
                                script.id
                            ))
                            .into());
                        }
                        let notes = match &decision {
                            FeedbackDecision::Revise { notes } => Some(notes.as_str()),
                            _ => None,
                        };
                        tracing::info!(
                            job_id,
                            script_id = script.id,
                            revision = script.revision,
                            "Rewriting narration with reviewer notes",
                        );
                        self.write_narration(&job, research, script.form_factor, notes, cancel)
                            .await?;
                    }
                }
            }
        }
    }
}

fn stage_error(stage: &'static str, source: ServiceError) -> PipelineError {
    match source {
        ServiceError::Cancelled => PipelineError::Cancelled,
        source => PipelineError::Stage { stage, source },
    }
}

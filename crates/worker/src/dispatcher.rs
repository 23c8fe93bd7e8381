//! Background render dispatcher.
//!
//! Polls for approved jobs every `poll_interval` and renders them one at a
//! time through the [`ProductionRunner`]. A render failure fails that job
//! and the loop moves on.

use std::sync::Arc;
use std::time::Duration;

use storyreel_core::error::CoreError;
use storyreel_core::job::JobStatus;
use storyreel_core::store::JobStore;
use storyreel_pipeline::error::PipelineError;
use storyreel_pipeline::runner::ProductionRunner;
use tokio_util::sync::CancellationToken;

/// Default polling interval for the dispatcher loop.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    runner: Arc<ProductionRunner>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, runner: Arc<ProductionRunner>) -> Self {
        Self {
            store,
            runner,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Render dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Render dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_once(&cancel).await {
                        tracing::error!(error = %e, "Dispatch cycle failed");
                    }
                }
            }
        }
    }

    /// One cycle: render every job currently approved. Returns how many
    /// completed.
    pub async fn dispatch_once(&self, cancel: &CancellationToken) -> Result<usize, CoreError> {
        let jobs = self.store.jobs_with_status(JobStatus::Approved).await?;
        let mut completed = 0;

        for job in jobs {
            if cancel.is_cancelled() {
                break;
            }
            tracing::info!(job_id = job.id, topic = %job.topic, "Dispatching approved job");
            match self.runner.render_job(job.id, cancel).await {
                Ok(runs) => {
                    completed += 1;
                    for run in runs {
                        tracing::info!(
                            job_id = job.id,
                            form_factor = %run.form_factor,
                            final_video = %run.final_video.display(),
                            "Video ready",
                        );
                    }
                }
                // Another dispatcher claimed the job first.
                Err(PipelineError::State(CoreError::Conflict(_))) => {
                    tracing::debug!(job_id = job.id, "Job claimed elsewhere");
                }
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "Job render failed");
                }
            }
        }
        Ok(completed)
    }
}

//! Production runner.
//!
//! Turns approved scripts into finished runs: opens a run directory, drives
//! the synchronizer and the assembly engine, and finalizes the run's
//! metadata and record whether it succeeded or not.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use storyreel_core::cost::CostRates;
use storyreel_core::error::CoreError;
use storyreel_core::hashing::sha256_file;
use storyreel_core::job::{FailureKind, FormFactor, JobRecord, JobStatus, ScriptRecord, ScriptStatus};
use storyreel_core::layout::{ArtifactRole, RunLayout};
use storyreel_core::metadata::{ArtifactRecord, RunMetadata, RunStatus, SceneRecord};
use storyreel_core::naming;
use storyreel_core::outcome::{OutcomeTally, SceneOutcome};
use storyreel_core::store::{JobStore, RunRecord};
use storyreel_core::types::DbId;
use storyreel_events::bus::{
    EVENT_RUN_COMPLETED, EVENT_RUN_FAILED, EVENT_RUN_STARTED, EVENT_SCENE_COMPLETED,
    EVENT_SCENE_DEGRADED, EVENT_SCENE_DROPPED,
};
use storyreel_events::{EventBus, PipelineEvent};
use tokio_util::sync::CancellationToken;

use crate::assembly::{music_seed, AssembledVideo, AssemblyEngine};
use crate::error::PipelineError;
use crate::lifecycle::Lifecycle;
use crate::organizer::{ArtifactOrganizer, ProductionRun};
use crate::synchronizer::{ResolvedScene, SceneSynchronizer, SyncReport};

/// Default validity window for reusing a failed run's scene artifacts.
pub const DEFAULT_ARTIFACT_TTL: Duration = Duration::from_secs(72 * 3600);

/// A run that produced a final video.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRun {
    pub script_id: DbId,
    pub form_factor: FormFactor,
    pub run_dir: PathBuf,
    pub final_video: PathBuf,
    pub tally: OutcomeTally,
    pub total: Duration,
    /// Run timestamp whose scene artifacts were reused, if any.
    pub reused_from: Option<String>,
}

pub struct ProductionRunner {
    lifecycle: Arc<Lifecycle>,
    bus: Arc<EventBus>,
    organizer: ArtifactOrganizer,
    synchronizer: SceneSynchronizer,
    assembly: AssemblyEngine,
    rates: CostRates,
    artifact_ttl: Duration,
}

impl ProductionRunner {
    pub fn new(
        lifecycle: Arc<Lifecycle>,
        bus: Arc<EventBus>,
        organizer: ArtifactOrganizer,
        synchronizer: SceneSynchronizer,
        assembly: AssemblyEngine,
    ) -> Self {
        Self {
            lifecycle,
            bus,
            organizer,
            synchronizer,
            assembly,
            rates: CostRates::default(),
            artifact_ttl: DEFAULT_ARTIFACT_TTL,
        }
    }

    pub fn with_rates(mut self, rates: CostRates) -> Self {
        self.rates = rates;
        self
    }

    pub fn with_artifact_ttl(mut self, ttl: Duration) -> Self {
        self.artifact_ttl = ttl;
        self
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    fn store(&self) -> &Arc<dyn JobStore> {
        self.lifecycle.store()
    }

    // -----------------------------------------------------------------------
    // Job level
    // -----------------------------------------------------------------------

    /// Render every required script of an approved (or run-failed) job.
    ///
    /// A script whose current revision already has a completed run keeps
    /// it. Otherwise it first tries to reuse its latest failed run, and
    /// failing that is synchronized from scratch. The first failing script fails the job
    /// as a run failure, which leaves it eligible for another attempt. A job
    /// the reviewer quit stays failed as a user abort.
    pub async fn render_job(
        &self,
        job_id: DbId,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedRun>, PipelineError> {
        // Registered before `rendering` is committed so a quit that lands
        // right after the commit still finds the token.
        let token = self.lifecycle.cancellation_token(job_id, cancel).await;
        let job = match self.lifecycle.begin_rendering(job_id).await {
            Ok(job) => job,
            Err(e) => {
                self.lifecycle.release(job_id).await;
                return Err(e.into());
            }
        };

        let result = match self.still_rendering(job_id, &token).await {
            Ok(()) => self.render_scripts(&job, &token).await,
            Err(e) => Err(e),
        };
        self.lifecycle.release(job_id).await;

        match result {
            Ok(runs) => {
                self.lifecycle.complete(job_id).await?;
                tracing::info!(job_id, runs = runs.len(), "Job completed");
                Ok(runs)
            }
            Err(e) => {
                let current = self.store().load_job(job_id).await?;
                if current.status == JobStatus::Rendering {
                    self.lifecycle
                        .fail(job_id, FailureKind::RunFailed, &e.to_string())
                        .await?;
                }
                Err(e)
            }
        }
    }

    async fn still_rendering(
        &self,
        job_id: DbId,
        token: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let current = self.store().load_job(job_id).await?;
        if current.status != JobStatus::Rendering {
            tracing::info!(job_id, status = %current.status, "Job left rendering before work started");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    async fn render_scripts(
        &self,
        job: &JobRecord,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedRun>, PipelineError> {
        let scripts = self.store().scripts_for_job(job.id).await?;
        let mut runs = Vec::with_capacity(job.required_forms.len());
        for form in &job.required_forms {
            let script = scripts
                .iter()
                .find(|s| s.form_factor == *form)
                .ok_or_else(|| {
                    CoreError::Validation(format!("Job {} has no {form} script", job.id))
                })?;

            if let Some(done) = self.finished_run(script).await? {
                tracing::info!(
                    script_id = script.id,
                    run_dir = %done.run_dir.display(),
                    "Script already rendered, keeping its final video",
                );
                runs.push(done);
                continue;
            }

            let run = match self.latest_failed_run(script.id).await? {
                Some(previous) => {
                    let dir = PathBuf::from(&previous.run_dir);
                    match self.reusable_run(script, &dir).await {
                        Ok(_) => self.reassemble(job, script, &dir, cancel).await?,
                        Err(e) => {
                            tracing::info!(
                                script_id = script.id,
                                run_dir = %dir.display(),
                                reason = %e,
                                "Previous run not reusable, synchronizing from scratch",
                            );
                            self.render_script(job, script, cancel).await?
                        }
                    }
                }
                None => self.render_script(job, script, cancel).await?,
            };
            runs.push(run);
        }
        Ok(runs)
    }

    /// The script's latest completed run for its current revision, if its
    /// final video is still on disk.
    async fn finished_run(&self, script: &ScriptRecord) -> Result<Option<CompletedRun>, PipelineError> {
        let runs = self.store().runs_for_script(script.id).await?;
        let Some(record) = runs
            .into_iter()
            .filter(|r| r.status == RunStatus::Completed)
            .max_by_key(|r| r.created_at)
        else {
            return Ok(None);
        };
        let Some(final_rel) = record.final_video.as_deref() else {
            return Ok(None);
        };

        let run_dir = PathBuf::from(&record.run_dir);
        let metadata = match self.organizer.load_metadata(&run_dir).await {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(run_dir = %run_dir.display(), error = %e, "Completed run unreadable");
                return Ok(None);
            }
        };
        if metadata.script_revision != script.revision {
            return Ok(None);
        }
        let final_video = run_dir.join(final_rel);
        if !tokio::fs::try_exists(&final_video).await? {
            return Ok(None);
        }

        Ok(Some(CompletedRun {
            script_id: script.id,
            form_factor: metadata.form_factor,
            run_dir,
            final_video,
            tally: metadata.counts,
            total: Duration::from_micros(metadata.total_duration_us),
            reused_from: metadata.reused_from,
        }))
    }

    async fn latest_failed_run(&self, script_id: DbId) -> Result<Option<RunRecord>, CoreError> {
        let runs = self.store().runs_for_script(script_id).await?;
        Ok(runs
            .into_iter()
            .filter(|r| r.status == RunStatus::Failed)
            .max_by_key(|r| r.created_at))
    }

    // -----------------------------------------------------------------------
    // Script level
    // -----------------------------------------------------------------------

    /// Synchronize and assemble one approved script into a new run.
    pub async fn render_script(
        &self,
        job: &JobRecord,
        script: &ScriptRecord,
        cancel: &CancellationToken,
    ) -> Result<CompletedRun, PipelineError> {
        let mut run = self.open(job, script).await?;

        let synced = self.synchronizer.synchronize(script, &mut run, cancel).await;
        self.publish_scenes(&run);
        let result = match synced {
            Ok(report) => {
                self.assembly
                    .assemble(&report, &mut run, music_seed(script.id, script.revision), cancel)
                    .await
            }
            Err(e) => Err(e),
        };
        self.finish(run, result).await
    }

    /// Assemble a new run from the scene artifacts of a failed one.
    ///
    /// The earlier run must belong to the same script revision, be younger
    /// than the artifact TTL, and every reused file must still match its
    /// recorded SHA-256. Artifacts are copied, so the earlier run stays
    /// intact.
    pub async fn reassemble(
        &self,
        job: &JobRecord,
        script: &ScriptRecord,
        previous_run_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<CompletedRun, PipelineError> {
        let previous = self.reusable_run(script, previous_run_dir).await?;

        let mut run = self.open(job, script).await?;
        run.metadata.reused_from = Some(previous.run_timestamp.clone());
        tracing::info!(
            script_id = script.id,
            reused_from = %previous.run_timestamp,
            "Re-assembling from earlier scene artifacts",
        );

        let result = match self
            .import_scenes(&previous, previous_run_dir, &mut run)
            .await
        {
            Ok(report) => {
                self.assembly
                    .assemble(&report, &mut run, music_seed(script.id, script.revision), cancel)
                    .await
            }
            Err(e) => Err(e),
        };
        self.finish(run, result).await
    }

    /// Load and verify a failed run's metadata for reuse.
    pub async fn reusable_run(
        &self,
        script: &ScriptRecord,
        run_dir: &Path,
    ) -> Result<RunMetadata, PipelineError> {
        let previous = self.organizer.load_metadata(run_dir).await?;
        if previous.status != RunStatus::Failed {
            return Err(PipelineError::Metadata(format!(
                "run {} is {}, only failed runs are re-assembled",
                previous.run_timestamp,
                previous.status.as_str()
            )));
        }
        if previous.script_id != script.id || previous.script_revision != script.revision {
            return Err(PipelineError::Metadata(format!(
                "run {} belongs to script {} revision {}",
                previous.run_timestamp, previous.script_id, previous.script_revision
            )));
        }

        let created = DateTime::parse_from_rfc3339(&previous.created_at)
            .map_err(|e| PipelineError::Metadata(format!("bad created_at: {e}")))?
            .with_timezone(&Utc);
        let age = (Utc::now() - created).to_std().unwrap_or_default();
        if age > self.artifact_ttl {
            return Err(PipelineError::Metadata(format!(
                "run {} artifacts expired ({}h old)",
                previous.run_timestamp,
                age.as_secs() / 3600
            )));
        }

        let surviving: Vec<&SceneRecord> = previous
            .scenes
            .iter()
            .filter(|s| s.outcome != SceneOutcome::Dropped)
            .collect();
        if surviving.is_empty() {
            return Err(PipelineError::Metadata(format!(
                "run {} has no surviving scenes",
                previous.run_timestamp
            )));
        }
        for scene in surviving {
            let (Some(audio), Some(clip), Some(_)) = (&scene.audio, &scene.clip, scene.duration_us)
            else {
                return Err(PipelineError::Metadata(format!(
                    "scene {:02} of run {} was never rendered",
                    scene.index + 1,
                    previous.run_timestamp
                )));
            };
            for rel in [audio, clip] {
                verify_artifact(&previous, run_dir, rel).await?;
            }
        }
        Ok(previous)
    }

    async fn import_scenes(
        &self,
        previous: &RunMetadata,
        previous_dir: &Path,
        run: &mut ProductionRun,
    ) -> Result<SyncReport, PipelineError> {
        let slug_words = self.synchronizer.config().slug_words;
        let mut scenes = Vec::with_capacity(previous.scenes.len());

        for record in &previous.scenes {
            let mut scene = ResolvedScene {
                index: record.index,
                text: record.text.clone(),
                slug: naming::scene_slug(record.text.as_deref(), slug_words),
                outcome: record.outcome,
                duration: record.duration_us.map(Duration::from_micros),
                audio: None,
                visual: None,
                clip: None,
                placeholder: record.placeholder.clone(),
                error: record.error.clone(),
            };
            if scene.survives() {
                let index = Some(scene.index);
                scene.audio = self
                    .import_optional(run, ArtifactRole::Audio, index, previous_dir, &record.audio)
                    .await?;
                scene.visual = self
                    .import_optional(run, ArtifactRole::Image, index, previous_dir, &record.image)
                    .await?;
                scene.clip = self
                    .import_optional(run, ArtifactRole::Clip, index, previous_dir, &record.clip)
                    .await?;
            }
            scenes.push(scene);
        }

        let tally = OutcomeTally::from_outcomes(scenes.iter().map(|s| s.outcome));
        run.metadata.scenes = scenes.iter().map(|s| s.record(run.layout())).collect();
        run.metadata.counts = tally;
        Ok(SyncReport { scenes, tally })
    }

    async fn import_optional(
        &self,
        run: &mut ProductionRun,
        role: ArtifactRole,
        scene_index: Option<usize>,
        previous_dir: &Path,
        rel: &Option<String>,
    ) -> Result<Option<PathBuf>, PipelineError> {
        let Some(rel) = rel else {
            return Ok(None);
        };
        let source = previous_dir.join(rel);
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::Metadata(format!("artifact path '{rel}' has no file name")))?;
        let dest = self
            .organizer
            .import(run, role, scene_index, &source, &filename)
            .await?;
        Ok(Some(dest))
    }

    // -----------------------------------------------------------------------
    // Run bookkeeping
    // -----------------------------------------------------------------------

    async fn open(&self, job: &JobRecord, script: &ScriptRecord) -> Result<ProductionRun, PipelineError> {
        if script.status != ScriptStatus::Approved {
            return Err(CoreError::Validation(format!(
                "Script {} is '{}'; only approved scripts can be rendered",
                script.id, script.status
            ))
            .into());
        }

        let now = Utc::now();
        let project = naming::project_name(&job.topic);
        let layout = self
            .organizer
            .open_run(&project, script.form_factor, now)
            .await?;
        let metadata = RunMetadata::begin(
            &layout,
            job.id,
            script.id,
            script.revision,
            &job.topic,
            now.to_rfc3339(),
        );
        let run = ProductionRun::new(layout, metadata);

        self.organizer.write_metadata(&run).await?;
        self.store().upsert_run(&run_record(&run, None)).await?;
        self.bus.publish(
            PipelineEvent::new(EVENT_RUN_STARTED)
                .with_job(job.id)
                .with_script(script.id)
                .with_payload(json!({ "run_dir": run.layout().root().display().to_string() })),
        );
        Ok(run)
    }

    /// Write the final metadata, summary, and run record.
    async fn finish(
        &self,
        mut run: ProductionRun,
        result: Result<AssembledVideo, PipelineError>,
    ) -> Result<CompletedRun, PipelineError> {
        let now = Utc::now();
        run.metadata.costs = run.ledger.price(&self.rates);
        run.metadata.finished_at = Some(now.to_rfc3339());

        match result {
            Ok(video) => {
                run.metadata.status = RunStatus::Completed;
                run.metadata.failure_reason = None;
                self.organizer.write_metadata(&run).await?;
                self.organizer.write_summary(&run).await?;
                self.organizer.cleanup_temp(run.layout()).await;

                let final_rel = run.layout().relative(&video.path);
                self.store().upsert_run(&run_record(&run, final_rel.clone())).await?;

                tracing::info!(
                    job_id = run.metadata.job_id,
                    script_id = run.metadata.script_id,
                    run_dir = %run.layout().root().display(),
                    full = run.metadata.counts.full,
                    degraded = run.metadata.counts.degraded,
                    dropped = run.metadata.counts.dropped,
                    "Production run completed",
                );
                self.bus.publish(
                    PipelineEvent::new(EVENT_RUN_COMPLETED)
                        .with_job(run.metadata.job_id)
                        .with_script(run.metadata.script_id)
                        .with_payload(json!({
                            "final_video": final_rel,
                            "counts": run.metadata.counts,
                            "total_duration_us": run.metadata.total_duration_us,
                        })),
                );

                Ok(CompletedRun {
                    script_id: run.metadata.script_id,
                    form_factor: run.metadata.form_factor,
                    run_dir: run.layout().root().to_path_buf(),
                    final_video: video.path,
                    tally: run.metadata.counts,
                    total: video.timeline.total(),
                    reused_from: run.metadata.reused_from.clone(),
                })
            }
            Err(e) => {
                run.metadata.status = RunStatus::Failed;
                run.metadata.failure_reason = Some(e.to_string());
                if let Some(tally) = e.tally() {
                    run.metadata.counts = tally;
                }

                tracing::error!(
                    job_id = run.metadata.job_id,
                    script_id = run.metadata.script_id,
                    run_dir = %run.layout().root().display(),
                    error = %e,
                    "Production run failed",
                );
                // Bookkeeping failures are logged; the run error is returned.
                if let Err(write_err) = self.organizer.write_metadata(&run).await {
                    tracing::error!(error = %write_err, "Failed to write run metadata");
                }
                if let Err(write_err) = self.organizer.write_summary(&run).await {
                    tracing::error!(error = %write_err, "Failed to write run summary");
                }
                if let Err(store_err) = self.store().upsert_run(&run_record(&run, None)).await {
                    tracing::error!(error = %store_err, "Failed to record failed run");
                }
                self.bus.publish(
                    PipelineEvent::new(EVENT_RUN_FAILED)
                        .with_job(run.metadata.job_id)
                        .with_script(run.metadata.script_id)
                        .with_payload(json!({
                            "reason": run.metadata.failure_reason,
                            "counts": run.metadata.counts,
                        })),
                );
                Err(e)
            }
        }
    }

    fn publish_scenes(&self, run: &ProductionRun) {
        for scene in &run.metadata.scenes {
            let event_type = match scene.outcome {
                SceneOutcome::Full => EVENT_SCENE_COMPLETED,
                SceneOutcome::Degraded => EVENT_SCENE_DEGRADED,
                SceneOutcome::Dropped => EVENT_SCENE_DROPPED,
            };
            self.bus.publish(
                PipelineEvent::new(event_type)
                    .with_job(run.metadata.job_id)
                    .with_script(run.metadata.script_id)
                    .with_scene(scene.index)
                    .with_payload(json!({
                        "duration_us": scene.duration_us,
                        "error": scene.error,
                    })),
            );
        }
    }
}

fn run_record(run: &ProductionRun, final_video: Option<String>) -> RunRecord {
    let meta = &run.metadata;
    let created_at = DateTime::parse_from_rfc3339(&meta.created_at)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    RunRecord {
        job_id: meta.job_id,
        script_id: meta.script_id,
        run_dir: run_dir_string(run.layout()),
        status: meta.status,
        counts: meta.counts,
        failure_reason: meta.failure_reason.clone(),
        final_video,
        created_at,
        updated_at: Utc::now(),
    }
}

fn run_dir_string(layout: &RunLayout) -> String {
    layout.root().to_string_lossy().into_owned()
}

/// Check that `rel` exists under `run_dir` and still hashes as recorded.
async fn verify_artifact(
    meta: &RunMetadata,
    run_dir: &Path,
    rel: &str,
) -> Result<(), PipelineError> {
    let recorded: &ArtifactRecord = meta
        .artifacts
        .iter()
        .find(|a| a.path == rel)
        .ok_or_else(|| PipelineError::Metadata(format!("artifact '{rel}' is not recorded")))?;
    let (sha256, _) = sha256_file(&run_dir.join(rel))
        .await
        .map_err(|e| PipelineError::Metadata(format!("artifact '{rel}' unreadable: {e}")))?;
    if sha256 != recorded.sha256 {
        return Err(PipelineError::Metadata(format!(
            "artifact '{rel}' changed since it was recorded"
        )));
    }
    Ok(())
}

//! Fake collaborators and a test harness for production scenarios.
//!
//! The fakes write small placeholder files wherever the engine asks, so the
//! organizer, metadata, and hashing paths run for real against a tempdir.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use storyreel_core::error::CoreError;
use storyreel_core::feedback::FeedbackDecision;
use storyreel_core::job::{
    FeedbackEntry, FormFactor, JobRecord, JobStatus, NewJob, NewScript, ScriptRecord, StateCommit,
};
use storyreel_core::store::{JobStore, MemoryJobStore, RunRecord};
use storyreel_core::types::DbId;
use storyreel_events::EventBus;
use storyreel_pipeline::assembly::{AssemblyConfig, AssemblyEngine};
use storyreel_pipeline::error::ServiceError;
use storyreel_pipeline::lifecycle::Lifecycle;
use storyreel_pipeline::organizer::ArtifactOrganizer;
use storyreel_pipeline::providers::{
    AudioClip, ContentWriter, MediaToolchain, MergeRequest, MotionClip, MotionRenderer,
    NarrationRequest, NarrationSynthesizer, PassthroughEnhancer, VisualAsset, VisualProvider,
};
use storyreel_pipeline::retry::RetryPolicy;
use storyreel_pipeline::runner::ProductionRunner;
use storyreel_pipeline::synchronizer::{Collaborators, SceneSynchronizer, SyncConfig};
use tempfile::TempDir;
use tokio::sync::{Barrier, Notify, Semaphore};

pub const FIVE_SCENES: &str = "Alpha opens the story. Bravo follows closely. \
    Charlie paints the sky. Delta keeps going. Echo closes the tale.";

/// Narration length proportional to the sentence, in whole microseconds
/// that never land on a frame boundary.
pub fn narration_length(text: &str) -> Duration {
    Duration::from_micros(text.chars().count() as u64 * 61_237 + 7)
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeNarrator {
    /// Sentences containing any of these fail permanently.
    pub fail_on: Vec<String>,
    /// Simulated synthesis latency.
    pub delay: Duration,
    /// When set, each synthesis waits for one visual request to start.
    pub after_visual: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
}

impl FakeNarrator {
    pub fn failing_on(words: &[&str]) -> Self {
        Self {
            fail_on: words.iter().map(|w| w.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl NarrationSynthesizer for FakeNarrator {
    async fn synthesize(&self, text: &str, output: &Path) -> Result<AudioClip, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(started) = &self.after_visual {
            started
                .acquire()
                .await
                .map_err(|_| ServiceError::Cancelled)?
                .forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_on.iter().any(|w| text.contains(w.as_str())) {
            return Err(ServiceError::Synthesis(format!("voice refused '{text}'")));
        }
        tokio::fs::write(output, text.as_bytes()).await?;
        Ok(AudioClip {
            path: output.to_path_buf(),
            duration: narration_length(text),
        })
    }
}

#[derive(Default)]
pub struct FakeVisuals {
    pub fail_on: Vec<String>,
    /// Receives one permit per visual request as it starts.
    pub started: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
}

impl FakeVisuals {
    pub fn failing_on(words: &[&str]) -> Self {
        Self {
            fail_on: words.iter().map(|w| w.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn produce(&self, prompt: &str, output: &Path) -> Result<PathBuf, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(started) = &self.started {
            started.add_permits(1);
        }
        if self.fail_on.iter().any(|w| prompt.contains(w.as_str())) {
            return Err(ServiceError::AssetUnavailable(format!("no image for '{prompt}'")));
        }
        tokio::fs::write(output, prompt.as_bytes()).await?;
        Ok(output.to_path_buf())
    }
}

#[async_trait]
impl VisualProvider for FakeVisuals {
    async fn synthesize_image(&self, prompt: &str, output: &Path) -> Result<PathBuf, ServiceError> {
        self.produce(prompt, output).await
    }

    async fn search_footage(&self, cue: &str, output: &Path) -> Result<PathBuf, ServiceError> {
        self.produce(cue, output).await
    }
}

/// Renders clips of exactly the requested duration.
#[derive(Default)]
pub struct FakeRenderer;

#[async_trait]
impl MotionRenderer for FakeRenderer {
    async fn render(
        &self,
        visual: &VisualAsset,
        target: Duration,
        output: &Path,
    ) -> Result<MotionClip, ServiceError> {
        let body = format!("motion:{}:{}", visual.path().display(), target.as_micros());
        tokio::fs::write(output, body).await?;
        Ok(MotionClip {
            path: output.to_path_buf(),
            duration: target,
        })
    }
}

/// Writes marker files and records every merge request.
#[derive(Default)]
pub struct FakeToolchain {
    pub merges: Mutex<Vec<MergeRequest>>,
    pub fail_encode: AtomicBool,
    /// Encodes whose output file name contains this fail.
    pub fail_output: Mutex<Option<String>>,
}

impl FakeToolchain {
    pub fn merges(&self) -> Vec<MergeRequest> {
        self.merges.lock().unwrap().clone()
    }

    pub fn fail_outputs_containing(&self, needle: Option<&str>) {
        *self.fail_output.lock().unwrap() = needle.map(str::to_string);
    }
}

#[async_trait]
impl MediaToolchain for FakeToolchain {
    async fn silence(&self, duration: Duration, output: &Path) -> Result<AudioClip, ServiceError> {
        tokio::fs::write(output, b"silence").await?;
        Ok(AudioClip {
            path: output.to_path_buf(),
            duration,
        })
    }

    async fn color_clip(
        &self,
        color: &str,
        duration: Duration,
        output: &Path,
    ) -> Result<MotionClip, ServiceError> {
        tokio::fs::write(output, format!("color:{color}")).await?;
        Ok(MotionClip {
            path: output.to_path_buf(),
            duration,
        })
    }

    async fn last_frame(&self, clip: &Path, output: &Path) -> Result<PathBuf, ServiceError> {
        tokio::fs::write(output, format!("frame:{}", clip.display())).await?;
        Ok(output.to_path_buf())
    }

    async fn hold_frame(
        &self,
        image: &Path,
        duration: Duration,
        output: &Path,
    ) -> Result<MotionClip, ServiceError> {
        tokio::fs::write(output, format!("hold:{}", image.display())).await?;
        Ok(MotionClip {
            path: output.to_path_buf(),
            duration,
        })
    }

    async fn merge_and_encode(&self, request: &MergeRequest) -> Result<(), ServiceError> {
        self.merges.lock().unwrap().push(request.clone());
        if self.fail_encode.load(Ordering::SeqCst) {
            return Err(ServiceError::Encode("muxer exploded".to_string()));
        }
        let name = request.output.to_string_lossy().into_owned();
        if let Some(needle) = self.fail_output.lock().unwrap().as_deref() {
            if name.contains(needle) {
                return Err(ServiceError::Encode(format!("muxer refused {name}")));
            }
        }
        tokio::fs::write(&request.output, b"final video").await?;
        Ok(())
    }
}

/// Writer that returns fixed narration and remembers revision notes.
pub struct FakeWriter {
    pub narration: String,
    pub notes: Mutex<Vec<String>>,
}

impl FakeWriter {
    pub fn new(narration: &str) -> Self {
        Self {
            narration: narration.to_string(),
            notes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContentWriter for FakeWriter {
    async fn research(&self, topic: &str) -> Result<String, ServiceError> {
        Ok(format!("Facts about {topic}."))
    }

    async fn write_narration(&self, request: &NarrationRequest<'_>) -> Result<String, ServiceError> {
        if let Some(notes) = request.revision_notes {
            self.notes.lock().unwrap().push(notes.to_string());
        }
        Ok(self.narration.clone())
    }
}

// ---------------------------------------------------------------------------
// Gated store
// ---------------------------------------------------------------------------

/// Pauses after the first commit that leaves a job in `status`.
struct PauseGate {
    status: JobStatus,
    reached: Arc<Notify>,
    resume: Arc<Notify>,
}

/// A [`MemoryJobStore`] whose commits can be held at chosen points, so
/// tests can interleave callers deterministically.
#[derive(Default)]
pub struct GatedStore {
    inner: MemoryJobStore,
    rendezvous: Mutex<Option<(Arc<Barrier>, usize)>>,
    pause: Mutex<Option<PauseGate>>,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `callers` commits wait for each other before running.
    pub fn hold_commits(&self, callers: usize) {
        *self.rendezvous.lock().unwrap() = Some((Arc::new(Barrier::new(callers)), callers));
    }

    /// The first commit that leaves a job in `status` signals `reached` and
    /// waits for `resume` before returning.
    pub fn pause_after(&self, status: JobStatus) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let resume = Arc::new(Notify::new());
        *self.pause.lock().unwrap() = Some(PauseGate {
            status,
            reached: Arc::clone(&reached),
            resume: Arc::clone(&resume),
        });
        (reached, resume)
    }

    fn take_rendezvous(&self) -> Option<Arc<Barrier>> {
        let mut slot = self.rendezvous.lock().unwrap();
        let (barrier, remaining) = slot.as_mut()?;
        let barrier = Arc::clone(barrier);
        *remaining -= 1;
        if *remaining == 0 {
            *slot = None;
        }
        Some(barrier)
    }

    fn take_pause(&self, committed: &StateCommit) -> Option<PauseGate> {
        let mut slot = self.pause.lock().unwrap();
        let hit = matches!(
            (slot.as_ref(), committed.job.as_ref()),
            (Some(gate), Some(job)) if job.status == gate.status
        );
        if hit {
            slot.take()
        } else {
            None
        }
    }
}

#[async_trait]
impl JobStore for GatedStore {
    async fn insert_job(&self, new: &NewJob) -> Result<JobRecord, CoreError> {
        self.inner.insert_job(new).await
    }

    async fn insert_script(&self, new: &NewScript) -> Result<ScriptRecord, CoreError> {
        self.inner.insert_script(new).await
    }

    async fn load_job(&self, id: DbId) -> Result<JobRecord, CoreError> {
        self.inner.load_job(id).await
    }

    async fn load_script(&self, id: DbId) -> Result<ScriptRecord, CoreError> {
        self.inner.load_script(id).await
    }

    async fn scripts_for_job(&self, job_id: DbId) -> Result<Vec<ScriptRecord>, CoreError> {
        self.inner.scripts_for_job(job_id).await
    }

    async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<JobRecord>, CoreError> {
        self.inner.jobs_with_status(status).await
    }

    async fn feedback_for_script(&self, script_id: DbId) -> Result<Vec<FeedbackEntry>, CoreError> {
        self.inner.feedback_for_script(script_id).await
    }

    async fn commit(&self, commit: StateCommit) -> Result<StateCommit, CoreError> {
        if let Some(barrier) = self.take_rendezvous() {
            barrier.wait().await;
        }
        let committed = self.inner.commit(commit).await?;
        if let Some(gate) = self.take_pause(&committed) {
            gate.reached.notify_one();
            gate.resume.notified().await;
        }
        Ok(committed)
    }

    async fn upsert_run(&self, run: &RunRecord) -> Result<(), CoreError> {
        self.inner.upsert_run(run).await
    }

    async fn runs_for_script(&self, script_id: DbId) -> Result<Vec<RunRecord>, CoreError> {
        self.inner.runs_for_script(script_id).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub tmp: TempDir,
    pub store: Arc<dyn JobStore>,
    pub bus: Arc<EventBus>,
    pub lifecycle: Arc<Lifecycle>,
    pub narrator: Arc<FakeNarrator>,
    pub toolchain: Arc<FakeToolchain>,
    pub runner: Arc<ProductionRunner>,
}

impl Harness {
    pub fn new(max_dropped_fraction: f64, narrator: FakeNarrator, visuals: FakeVisuals) -> Self {
        let config = SyncConfig::new(max_dropped_fraction).unwrap();
        Self::with_config(config, narrator, visuals)
    }

    pub fn with_config(config: SyncConfig, narrator: FakeNarrator, visuals: FakeVisuals) -> Self {
        Self::build(config, Arc::new(MemoryJobStore::new()), narrator, visuals)
    }

    pub fn with_store(store: Arc<dyn JobStore>, narrator: FakeNarrator, visuals: FakeVisuals) -> Self {
        let config = SyncConfig::new(0.2).unwrap();
        Self::build(config, store, narrator, visuals)
    }

    fn build(
        mut config: SyncConfig,
        store: Arc<dyn JobStore>,
        narrator: FakeNarrator,
        visuals: FakeVisuals,
    ) -> Self {
        config.retry = RetryPolicy::immediate(2);

        let tmp = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::default());
        let lifecycle = Arc::new(Lifecycle::new(Arc::clone(&store), Arc::clone(&bus)));
        let narrator = Arc::new(narrator);
        let toolchain = Arc::new(FakeToolchain::default());
        let organizer = ArtifactOrganizer::new(tmp.path().join("output"));

        let collaborators = Collaborators {
            narrator: narrator.clone(),
            visuals: Arc::new(visuals),
            enhancer: Arc::new(PassthroughEnhancer),
            renderer: Arc::new(FakeRenderer),
            toolchain: toolchain.clone(),
        };
        let synchronizer = SceneSynchronizer::new(config, collaborators, organizer.clone());
        let assembly = AssemblyEngine::new(
            AssemblyConfig::default(),
            toolchain.clone(),
            organizer.clone(),
        );
        let runner = Arc::new(ProductionRunner::new(
            Arc::clone(&lifecycle),
            Arc::clone(&bus),
            organizer,
            synchronizer,
            assembly,
        ));

        Self {
            tmp,
            store,
            bus,
            lifecycle,
            narrator,
            toolchain,
            runner,
        }
    }

    pub fn output_root(&self) -> PathBuf {
        self.tmp.path().join("output")
    }

    /// A long-form job whose single script carries `narration` and is approved.
    pub async fn approved_job(&self, narration: &str) -> (JobRecord, ScriptRecord) {
        let lc = &self.lifecycle;
        let (job, _) = lc
            .create_job("Night at the aquarium", &[FormFactor::LongForm])
            .await
            .unwrap();
        lc.begin_research(job.id).await.unwrap();
        lc.record_research(job.id, "Jellyfish glow.").await.unwrap();
        let (_, script) = lc
            .provide_narration(job.id, FormFactor::LongForm, narration)
            .await
            .unwrap();
        lc.submit_feedback(script.id, &FeedbackDecision::Approve)
            .await
            .unwrap();
        let job = self.store.load_job(job.id).await.unwrap();
        let script = self.store.load_script(script.id).await.unwrap();
        (job, script)
    }

    /// A job requiring both forms, with both scripts drafted and approved.
    pub async fn approved_two_form_job(
        &self,
        long: &str,
        short: &str,
    ) -> (JobRecord, ScriptRecord, ScriptRecord) {
        let lc = &self.lifecycle;
        let (job, _) = lc
            .create_job(
                "Night at the aquarium",
                &[FormFactor::LongForm, FormFactor::ShortForm],
            )
            .await
            .unwrap();
        lc.begin_research(job.id).await.unwrap();
        lc.record_research(job.id, "Jellyfish glow.").await.unwrap();
        let (_, long_script) = lc
            .provide_narration(job.id, FormFactor::LongForm, long)
            .await
            .unwrap();
        let (_, short_script) = lc
            .provide_narration(job.id, FormFactor::ShortForm, short)
            .await
            .unwrap();
        for id in [long_script.id, short_script.id] {
            lc.submit_feedback(id, &FeedbackDecision::Approve)
                .await
                .unwrap();
        }
        let job = self.store.load_job(job.id).await.unwrap();
        let long_script = self.store.load_script(long_script.id).await.unwrap();
        let short_script = self.store.load_script(short_script.id).await.unwrap();
        (job, long_script, short_script)
    }
}

//! Scene synchronizer.
//!
//! Turns an approved script into an ordered, dense list of time-resolved
//! scenes. The work happens in three phases:
//!
//! 1. **Sources**: for every cue, concurrently synthesize narration (or a
//!    silence clip for pauses) and fetch a visual. A narration failure drops
//!    the scene; a visual failure degrades it.
//! 2. **Motion**: after the dropped-scene threshold is checked, render every
//!    real visual concurrently to exactly the measured narration length.
//! 3. **Placeholders**: in index order, fill every surviving scene that still
//!    lacks a clip (degraded scenes and pauses) with a color clip or the
//!    previous scene's held last frame.
//!
//! Task results are collected into maps keyed by scene index; completion
//! order never determines output order. Every file is produced in the run's
//! `temp/` directory and promoted by the organizer from the calling task.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use storyreel_core::error::CoreError;
use storyreel_core::job::{ScriptRecord, ScriptStatus};
use storyreel_core::layout::{ArtifactRole, RunLayout};
use storyreel_core::metadata::SceneRecord;
use storyreel_core::naming::{self, DEFAULT_SLUG_WORDS};
use storyreel_core::outcome::{
    drop_threshold_violation, validate_drop_threshold, OutcomeTally, SceneOutcome,
};
use storyreel_core::segmentation::{segment_narration, CueKind, SceneCue};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, ServiceError};
use crate::organizer::{ArtifactOrganizer, ProductionRun};
use crate::providers::{
    AudioClip, MediaToolchain, MotionClip, MotionRenderer, NarrationSynthesizer, PromptEnhancer,
    VisualAsset, VisualMode, VisualProvider,
};
use crate::retry::{with_retry, RetryPolicy};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Silence inserted for a bare `[pause]` marker.
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(750);

/// Color used when no previous frame exists to hold.
pub const FALLBACK_COLOR: &str = "black";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What fills a scene without a rendered visual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// Solid color clip.
    Color(String),
    /// The previous scene's last frame, held still.
    PreviousFrame,
}

impl Default for Placeholder {
    fn default() -> Self {
        Self::Color(FALLBACK_COLOR.to_string())
    }
}

impl Placeholder {
    /// Label recorded in scene metadata.
    pub fn label(&self) -> String {
        match self {
            Self::Color(color) => format!("color:{color}"),
            Self::PreviousFrame => "previous_frame".to_string(),
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for Placeholder {
    type Err = CoreError;

    /// Accepts `previous_frame` or `color:<name>` (`color:black`, `color:0x202020`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "previous_frame" {
            return Ok(Self::PreviousFrame);
        }
        match s.strip_prefix("color:") {
            Some(color)
                if !color.is_empty()
                    && color.chars().all(|c| c.is_ascii_alphanumeric() || c == '#') =>
            {
                Ok(Self::Color(color.to_lowercase()))
            }
            _ => Err(CoreError::Validation(format!(
                "Invalid placeholder '{s}': expected 'previous_frame' or 'color:<name>'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on concurrently running scene tasks.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// A run aborts when strictly more than this fraction of scenes drop.
    pub max_dropped_fraction: f64,
    pub visual_mode: VisualMode,
    pub placeholder: Placeholder,
    pub default_pause: Duration,
    pub slug_words: usize,
}

impl SyncConfig {
    /// Defaults for everything except the drop threshold, which has none.
    pub fn new(max_dropped_fraction: f64) -> Result<Self, CoreError> {
        Ok(Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            max_dropped_fraction: validate_drop_threshold(max_dropped_fraction)?,
            visual_mode: VisualMode::default(),
            placeholder: Placeholder::default(),
            default_pause: DEFAULT_PAUSE,
            slug_words: DEFAULT_SLUG_WORDS,
        })
    }
}

/// The external services a synchronizer drives.
#[derive(Clone)]
pub struct Collaborators {
    pub narrator: Arc<dyn NarrationSynthesizer>,
    pub visuals: Arc<dyn VisualProvider>,
    pub enhancer: Arc<dyn PromptEnhancer>,
    pub renderer: Arc<dyn MotionRenderer>,
    pub toolchain: Arc<dyn MediaToolchain>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One scene after synchronization. Paths point into the run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScene {
    pub index: usize,
    /// Sentence text; `None` for pauses.
    pub text: Option<String>,
    pub slug: String,
    pub outcome: SceneOutcome,
    /// Measured narration duration; `None` when dropped.
    pub duration: Option<Duration>,
    pub audio: Option<PathBuf>,
    pub visual: Option<PathBuf>,
    pub clip: Option<PathBuf>,
    pub placeholder: Option<String>,
    pub error: Option<String>,
}

impl ResolvedScene {
    fn new(cue: &SceneCue, slug: String) -> Self {
        Self {
            index: cue.index,
            text: cue.text().map(str::to_string),
            slug,
            outcome: SceneOutcome::Full,
            duration: None,
            audio: None,
            visual: None,
            clip: None,
            placeholder: None,
            error: None,
        }
    }

    pub fn is_pause(&self) -> bool {
        self.text.is_none()
    }

    pub fn survives(&self) -> bool {
        self.outcome != SceneOutcome::Dropped
    }

    fn stem(&self) -> String {
        naming::scene_stem(self.index, &self.slug)
    }

    /// Audit entry with paths relative to the run root.
    pub fn record(&self, layout: &RunLayout) -> SceneRecord {
        let rel = |p: &Option<PathBuf>| p.as_deref().and_then(|p| layout.relative(p));
        SceneRecord {
            index: self.index,
            text: self.text.clone(),
            outcome: self.outcome,
            duration_us: self.duration.map(|d| d.as_micros() as u64),
            audio: rel(&self.audio),
            image: rel(&self.visual),
            clip: rel(&self.clip),
            placeholder: self.placeholder.clone(),
            error: self.error.clone(),
        }
    }
}

/// Output of a successful synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Every scene in index order, dropped ones included.
    pub scenes: Vec<ResolvedScene>,
    pub tally: OutcomeTally,
}

impl SyncReport {
    /// Scenes that go into assembly, in index order.
    pub fn surviving(&self) -> impl Iterator<Item = &ResolvedScene> {
        self.scenes.iter().filter(|s| s.survives())
    }

    /// Sum of surviving scene durations.
    pub fn total_duration(&self) -> Duration {
        self.surviving().filter_map(|s| s.duration).sum()
    }
}

/// Raw phase-one result for one cue, still in `temp/`.
struct SourceDraft {
    index: usize,
    audio: Result<AudioClip, ServiceError>,
    /// `None` for pauses and for scenes whose narration failed.
    visual: Option<Result<PathBuf, ServiceError>>,
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

pub struct SceneSynchronizer {
    config: SyncConfig,
    collaborators: Collaborators,
    organizer: ArtifactOrganizer,
}

impl SceneSynchronizer {
    pub fn new(config: SyncConfig, collaborators: Collaborators, organizer: ArtifactOrganizer) -> Self {
        Self {
            config,
            collaborators,
            organizer,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Synchronize `script` into `run`.
    ///
    /// Scene records and counts are written into `run.metadata` even when
    /// this fails, so a failed run still documents what went wrong.
    pub async fn synchronize(
        &self,
        script: &ScriptRecord,
        run: &mut ProductionRun,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, PipelineError> {
        if script.status != ScriptStatus::Approved {
            return Err(CoreError::Validation(format!(
                "Script {} is '{}'; only approved scripts can be rendered",
                script.id, script.status
            ))
            .into());
        }
        let narration = script.narration.as_deref().ok_or_else(|| {
            CoreError::Validation(format!("Script {} has no narration", script.id))
        })?;

        let cues = segment_narration(narration, self.config.default_pause);
        let mut scenes: Vec<ResolvedScene> = cues
            .iter()
            .map(|cue| ResolvedScene::new(cue, naming::scene_slug(cue.text(), self.config.slug_words)))
            .collect();

        tracing::info!(
            script_id = script.id,
            scenes = scenes.len(),
            visual_mode = %self.config.visual_mode,
            "Synchronizing scenes",
        );

        let result = self.run_phases(&cues, &mut scenes, run, cancel).await;

        run.metadata.scenes = scenes.iter().map(|s| s.record(run.layout())).collect();
        let tally = OutcomeTally::from_outcomes(scenes.iter().map(|s| s.outcome));
        run.metadata.counts = tally;

        result?;
        run.metadata.total_duration_us = scenes
            .iter()
            .filter(|s| s.survives())
            .filter_map(|s| s.duration)
            .map(|d| d.as_micros() as u64)
            .sum();
        Ok(SyncReport { scenes, tally })
    }

    async fn run_phases(
        &self,
        cues: &[SceneCue],
        scenes: &mut [ResolvedScene],
        run: &mut ProductionRun,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let drafts = self.resolve_sources(cues, scenes, run.layout(), cancel).await?;
        self.classify(scenes, &drafts);

        let tally = OutcomeTally::from_outcomes(scenes.iter().map(|s| s.outcome));
        if let Some(reason) = drop_threshold_violation(&tally, self.config.max_dropped_fraction) {
            tracing::error!(
                full = tally.full,
                degraded = tally.degraded,
                dropped = tally.dropped,
                reason = %reason,
                "Dropped-scene threshold exceeded",
            );
            return Err(PipelineError::Aborted { reason, tally });
        }

        self.promote_sources(scenes, drafts, run).await?;
        self.render_motion(scenes, run, cancel).await?;
        self.fill_placeholders(scenes, run, cancel).await
    }

    // -- phase 1: narration and visuals --

    async fn resolve_sources(
        &self,
        cues: &[SceneCue],
        scenes: &[ResolvedScene],
        layout: &RunLayout,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<usize, SourceDraft>, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (cue, scene) in cues.iter().zip(scenes) {
            let stem = scene.stem();
            let audio_out = layout.temp_path(&format!("{stem}.wav"));
            let visual_out =
                layout.temp_path(&format!("{stem}.{}", self.config.visual_mode.extension()));
            let semaphore = Arc::clone(&semaphore);
            let collaborators = self.collaborators.clone();
            let retry = self.config.retry.clone();
            let mode = self.config.visual_mode;
            let cancel = cancel.clone();
            let cue = cue.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                resolve_cue(&collaborators, &retry, mode, &cue, &audio_out, &visual_out, &cancel)
                    .await
            });
        }

        let mut drafts = BTreeMap::new();
        while let Some(draft) = join_next(&mut tasks, cancel).await? {
            if matches!(draft.audio, Err(ServiceError::Cancelled))
                || matches!(draft.visual, Some(Err(ServiceError::Cancelled)))
            {
                return Err(PipelineError::Cancelled);
            }
            drafts.insert(draft.index, draft);
        }
        Ok(drafts)
    }

    fn classify(&self, scenes: &mut [ResolvedScene], drafts: &BTreeMap<usize, SourceDraft>) {
        for scene in scenes.iter_mut() {
            let Some(draft) = drafts.get(&scene.index) else {
                scene.outcome = SceneOutcome::Dropped;
                scene.error = Some("scene task did not report".to_string());
                continue;
            };
            match (&draft.audio, &draft.visual) {
                (Err(e), _) => {
                    tracing::warn!(scene_index = scene.index, error = %e, "Scene dropped: narration failed");
                    scene.outcome = SceneOutcome::Dropped;
                    scene.error = Some(e.to_string());
                }
                (Ok(audio), Some(Err(e))) => {
                    tracing::warn!(scene_index = scene.index, error = %e, "Scene degraded: visual unavailable");
                    scene.outcome = SceneOutcome::Degraded;
                    scene.duration = Some(audio.duration);
                    scene.error = Some(e.to_string());
                }
                (Ok(audio), _) => {
                    scene.outcome = SceneOutcome::Full;
                    scene.duration = Some(audio.duration);
                }
            }
        }
    }

    async fn promote_sources(
        &self,
        scenes: &mut [ResolvedScene],
        mut drafts: BTreeMap<usize, SourceDraft>,
        run: &mut ProductionRun,
    ) -> Result<(), PipelineError> {
        for scene in scenes.iter_mut().filter(|s| s.survives()) {
            let Some(draft) = drafts.remove(&scene.index) else {
                continue;
            };
            if let Ok(audio) = &draft.audio {
                let filename = scene_file(scene, &audio.path, "wav");
                let dest = self
                    .organizer
                    .promote(run, ArtifactRole::Audio, Some(scene.index), &audio.path, &filename)
                    .await?;
                scene.audio = Some(dest);
                if let Some(text) = &scene.text {
                    run.ledger.add_narration(text);
                }
            }
            if let Some(Ok(visual)) = &draft.visual {
                let filename =
                    scene_file(scene, visual, self.config.visual_mode.extension());
                let dest = self
                    .organizer
                    .promote(run, ArtifactRole::Image, Some(scene.index), visual, &filename)
                    .await?;
                scene.visual = Some(dest);
                if self.config.visual_mode == VisualMode::Image {
                    run.ledger.add_image();
                }
            }
        }
        Ok(())
    }

    // -- phase 2: motion rendering --

    async fn render_motion(
        &self,
        scenes: &mut [ResolvedScene],
        run: &mut ProductionRun,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for scene in scenes.iter().filter(|s| s.survives()) {
            let (Some(visual), Some(target)) = (&scene.visual, scene.duration) else {
                continue;
            };
            let asset = match self.config.visual_mode {
                VisualMode::Image => VisualAsset::Image(visual.clone()),
                VisualMode::Stock => VisualAsset::Footage(visual.clone()),
            };
            let index = scene.index;
            let output = run.layout().temp_path(&format!("{}.mp4", scene.stem()));
            let semaphore = Arc::clone(&semaphore);
            let renderer = Arc::clone(&self.collaborators.renderer);
            let retry = self.config.retry.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let clip = with_retry(&retry, &cancel, "motion_render", |_| {
                    renderer.render(&asset, target, &output)
                })
                .await;
                (index, target, clip)
            });
        }

        let mut rendered: BTreeMap<usize, MotionClip> = BTreeMap::new();
        while let Some((index, target, clip)) = join_next(&mut tasks, cancel).await? {
            let clip = clip.map_err(|e| scene_failure(index, e))?;
            ensure_exact(index, &clip, target)?;
            rendered.insert(index, clip);
        }

        for scene in scenes.iter_mut() {
            if let Some(clip) = rendered.remove(&scene.index) {
                let dest = self.promote_clip(scene, &clip, run).await?;
                run.ledger.add_render(clip.duration);
                scene.clip = Some(dest);
            }
        }
        Ok(())
    }

    // -- phase 3: placeholders --

    async fn fill_placeholders(
        &self,
        scenes: &mut [ResolvedScene],
        run: &mut ProductionRun,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let mut previous_clip: Option<PathBuf> = None;

        for scene in scenes.iter_mut().filter(|s| s.survives()) {
            if scene.clip.is_none() {
                let Some(target) = scene.duration else {
                    continue;
                };
                let output = run.layout().temp_path(&format!("{}.mp4", scene.stem()));
                let still = run.layout().temp_path(&format!("{}_last_frame.png", scene.stem()));
                let (clip, label) = self
                    .placeholder_clip(previous_clip.as_deref(), target, &still, &output, cancel)
                    .await
                    .map_err(|e| scene_failure(scene.index, e))?;
                ensure_exact(scene.index, &clip, target)?;

                if !scene.is_pause() {
                    tracing::info!(
                        scene_index = scene.index,
                        placeholder = %label,
                        "Placeholder visual substituted",
                    );
                }
                scene.placeholder = Some(label);
                scene.clip = Some(self.promote_clip(scene, &clip, run).await?);
            }
            previous_clip = scene.clip.clone();
        }
        Ok(())
    }

    async fn placeholder_clip(
        &self,
        previous_clip: Option<&Path>,
        target: Duration,
        still: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(MotionClip, String), ServiceError> {
        let toolchain = &self.collaborators.toolchain;
        let retry = &self.config.retry;

        let color = match (&self.config.placeholder, previous_clip) {
            (Placeholder::PreviousFrame, Some(previous)) => {
                let frame = with_retry(retry, cancel, "last_frame", |_| {
                    toolchain.last_frame(previous, still)
                })
                .await?;
                let clip = with_retry(retry, cancel, "hold_frame", |_| {
                    toolchain.hold_frame(&frame, target, output)
                })
                .await?;
                return Ok((clip, Placeholder::PreviousFrame.label()));
            }
            (Placeholder::PreviousFrame, None) => FALLBACK_COLOR.to_string(),
            (Placeholder::Color(color), _) => color.clone(),
        };

        let clip = with_retry(retry, cancel, "color_clip", |_| {
            toolchain.color_clip(&color, target, output)
        })
        .await?;
        Ok((clip, Placeholder::Color(color).label()))
    }

    async fn promote_clip(
        &self,
        scene: &ResolvedScene,
        clip: &MotionClip,
        run: &mut ProductionRun,
    ) -> Result<PathBuf, PipelineError> {
        let filename = scene_file(scene, &clip.path, "mp4");
        self.organizer
            .promote(run, ArtifactRole::Clip, Some(scene.index), &clip.path, &filename)
            .await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Produce narration and a visual for one cue.
async fn resolve_cue(
    collaborators: &Collaborators,
    retry: &RetryPolicy,
    mode: VisualMode,
    cue: &SceneCue,
    audio_out: &Path,
    visual_out: &Path,
    cancel: &CancellationToken,
) -> SourceDraft {
    let text = match &cue.kind {
        CueKind::Pause { duration } => {
            let duration = *duration;
            let toolchain = &collaborators.toolchain;
            let audio = with_retry(retry, cancel, "silence", |_| {
                toolchain.silence(duration, audio_out)
            })
            .await;
            return SourceDraft {
                index: cue.index,
                audio,
                visual: None,
            };
        }
        CueKind::Speech { text } => text.as_str(),
    };

    let narrator = &collaborators.narrator;
    let narration = with_retry(retry, cancel, "narration", |_| {
        narrator.synthesize(text, audio_out)
    });
    let (audio, visual) = tokio::join!(
        narration,
        resolve_visual(collaborators, retry, mode, text, visual_out, cancel)
    );
    let audio = audio.and_then(|clip| {
        if clip.duration.is_zero() {
            Err(ServiceError::Synthesis("narration clip has zero duration".to_string()))
        } else {
            Ok(clip)
        }
    });
    // A scene without narration is dropped, so its visual is discarded.
    if audio.is_err() {
        return SourceDraft {
            index: cue.index,
            audio,
            visual: None,
        };
    }

    SourceDraft {
        index: cue.index,
        audio,
        visual: Some(visual),
    }
}

async fn resolve_visual(
    collaborators: &Collaborators,
    retry: &RetryPolicy,
    mode: VisualMode,
    sentence: &str,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf, ServiceError> {
    let visuals = &collaborators.visuals;
    match mode {
        VisualMode::Image => {
            let prompt = match collaborators.enhancer.enhance(sentence).await {
                Ok(prompt) if !prompt.trim().is_empty() => prompt,
                Ok(_) => sentence.to_string(),
                Err(e) => {
                    tracing::debug!(error = %e, "Prompt enhancement failed, using sentence");
                    sentence.to_string()
                }
            };
            let prompt = prompt.as_str();
            with_retry(retry, cancel, "image", |_| {
                visuals.synthesize_image(prompt, output)
            })
            .await
        }
        VisualMode::Stock => {
            with_retry(retry, cancel, "stock_footage", |_| {
                visuals.search_footage(sentence, output)
            })
            .await
        }
    }
}

/// Next finished task, or `Cancelled` if the token fires first.
async fn join_next<T: 'static>(
    tasks: &mut JoinSet<T>,
    cancel: &CancellationToken,
) -> Result<Option<T>, PipelineError> {
    let joined = tokio::select! {
        _ = cancel.cancelled() => {
            tasks.abort_all();
            return Err(PipelineError::Cancelled);
        }
        joined = tasks.join_next() => joined,
    };
    match joined {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) => {
            tasks.abort_all();
            Err(CoreError::Internal(format!("Scene task failed: {e}")).into())
        }
    }
}

/// Final filename for a scene artifact, keeping the produced file's extension.
fn scene_file(scene: &ResolvedScene, produced: &Path, default_ext: &str) -> String {
    let ext = produced
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(default_ext);
    naming::scene_filename(scene.index, &scene.slug, ext)
}

fn scene_failure(index: usize, err: ServiceError) -> PipelineError {
    match err {
        ServiceError::Cancelled => PipelineError::Cancelled,
        ServiceError::Io(e) => PipelineError::Io(e),
        other => PipelineError::Render(format!("scene {:02}: {other}", index + 1)),
    }
}

/// A clip must span its narration exactly.
fn ensure_exact(index: usize, clip: &MotionClip, target: Duration) -> Result<(), PipelineError> {
    if clip.duration != target {
        return Err(PipelineError::Render(format!(
            "scene {:02}: clip lasts {}us but narration lasts {}us",
            index + 1,
            clip.duration.as_micros(),
            target.as_micros()
        )));
    }
    Ok(())
}

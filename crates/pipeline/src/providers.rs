//! Collaborator seams.
//!
//! Every external service the engine depends on is a trait here. Each call
//! writes its output to a path chosen by the caller (always inside the run's
//! `temp/` directory) so the organizer can promote it afterwards.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storyreel_core::error::CoreError;
use storyreel_core::job::FormFactor;

use crate::error::ServiceError;

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Narration or silence audio with its measured duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub path: PathBuf,
    pub duration: Duration,
}

/// Video-only clip with its rendered duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionClip {
    pub path: PathBuf,
    pub duration: Duration,
}

/// Where scene visuals come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualMode {
    /// Synthesized still image, animated by the motion renderer.
    #[default]
    Image,
    /// Stock footage search result, fitted to the scene duration.
    Stock,
}

impl VisualMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Stock => "stock",
        }
    }

    /// File extension of the raw visual.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Image => "png",
            Self::Stock => "mp4",
        }
    }
}

impl fmt::Display for VisualMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VisualMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "stock" => Ok(Self::Stock),
            other => Err(CoreError::Validation(format!(
                "Unknown visual mode '{other}'. Must be one of: image, stock"
            ))),
        }
    }
}

/// A resolved scene visual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisualAsset {
    Image(PathBuf),
    Footage(PathBuf),
}

impl VisualAsset {
    pub fn path(&self) -> &Path {
        match self {
            Self::Image(p) | Self::Footage(p) => p,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NarrationSynthesizer: Send + Sync {
    /// Speak `text` into `output` and report the clip's measured duration.
    ///
    /// The returned path may differ from `output` in extension only.
    async fn synthesize(&self, text: &str, output: &Path) -> Result<AudioClip, ServiceError>;
}

#[async_trait]
pub trait VisualProvider: Send + Sync {
    async fn synthesize_image(&self, prompt: &str, output: &Path) -> Result<PathBuf, ServiceError>;

    async fn search_footage(&self, cue: &str, output: &Path) -> Result<PathBuf, ServiceError>;
}

/// Best-effort prompt enrichment; callers fall back to the raw sentence.
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
    async fn enhance(&self, sentence: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait MotionRenderer: Send + Sync {
    /// Render `visual` into a clip lasting exactly `target`.
    async fn render(
        &self,
        visual: &VisualAsset,
        target: Duration,
        output: &Path,
    ) -> Result<MotionClip, ServiceError>;
}

/// Everything the assembly engine hands to the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRequest {
    /// Motion clips in scene order.
    pub clips: Vec<PathBuf>,
    /// Narration clips in the same order. The encoder pads or trims each
    /// to its clip's encoded length.
    pub audio: Vec<PathBuf>,
    /// Background track and its gain.
    pub music: Option<(PathBuf, f64)>,
    /// Planned timeline length.
    pub total: Duration,
    /// Scratch directory for intermediate files.
    pub work_dir: PathBuf,
    pub output: PathBuf,
}

/// Audio/video primitives used for placeholders and the final encode.
#[async_trait]
pub trait MediaToolchain: Send + Sync {
    async fn silence(&self, duration: Duration, output: &Path) -> Result<AudioClip, ServiceError>;

    async fn color_clip(
        &self,
        color: &str,
        duration: Duration,
        output: &Path,
    ) -> Result<MotionClip, ServiceError>;

    /// Extract the final frame of `clip` as a still image.
    async fn last_frame(&self, clip: &Path, output: &Path) -> Result<PathBuf, ServiceError>;

    /// Hold a still image for `duration` without motion.
    async fn hold_frame(
        &self,
        image: &Path,
        duration: Duration,
        output: &Path,
    ) -> Result<MotionClip, ServiceError>;

    async fn merge_and_encode(&self, request: &MergeRequest) -> Result<(), ServiceError>;
}

/// Input to narration writing.
#[derive(Debug, Clone, Serialize)]
pub struct NarrationRequest<'a> {
    pub topic: &'a str,
    pub research: &'a str,
    pub form_factor: FormFactor,
    /// Reviewer notes when rewriting after a `revise` decision.
    pub revision_notes: Option<&'a str>,
}

/// Research and scriptwriting.
#[async_trait]
pub trait ContentWriter: Send + Sync {
    async fn research(&self, topic: &str) -> Result<String, ServiceError>;

    async fn write_narration(&self, request: &NarrationRequest<'_>) -> Result<String, ServiceError>;
}

// ---------------------------------------------------------------------------
// Trivial implementations
// ---------------------------------------------------------------------------

/// Uses the sentence as its own prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEnhancer;

#[async_trait]
impl PromptEnhancer for PassthroughEnhancer {
    async fn enhance(&self, sentence: &str) -> Result<String, ServiceError> {
        Ok(sentence.to_string())
    }
}

/// Provider for runs without a visual backend; every scene gets a placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVisuals;

#[async_trait]
impl VisualProvider for NoVisuals {
    async fn synthesize_image(&self, _prompt: &str, _output: &Path) -> Result<PathBuf, ServiceError> {
        Err(ServiceError::AssetUnavailable(
            "no image provider configured".to_string(),
        ))
    }

    async fn search_footage(&self, _cue: &str, _output: &Path) -> Result<PathBuf, ServiceError> {
        Err(ServiceError::AssetUnavailable(
            "no stock footage provider configured".to_string(),
        ))
    }
}

//! Assembly engine: lays surviving scenes end to end and encodes the final
//! video with a looped, attenuated music bed under the narration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use storyreel_core::assembly::{
    plan_timeline, validate_music_gain, Timeline, DEFAULT_MUSIC_GAIN, MUSIC_EXTENSIONS,
};
use storyreel_core::error::CoreError;
use storyreel_core::layout::ArtifactRole;
use storyreel_core::naming;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, ServiceError};
use crate::organizer::{ArtifactOrganizer, ProductionRun};
use crate::providers::{MediaToolchain, MergeRequest};
use crate::synchronizer::SyncReport;

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyConfig {
    /// Directory scanned for background tracks; `None` means narration only.
    pub music_dir: Option<PathBuf>,
    pub music_gain: f64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            music_dir: None,
            music_gain: DEFAULT_MUSIC_GAIN,
        }
    }
}

impl AssemblyConfig {
    pub fn new(music_dir: Option<PathBuf>, music_gain: f64) -> Result<Self, CoreError> {
        Ok(Self {
            music_dir,
            music_gain: validate_music_gain(music_gain)?,
        })
    }
}

/// Result of a successful assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledVideo {
    pub path: PathBuf,
    pub timeline: Timeline,
    pub music: Option<PathBuf>,
}

pub struct AssemblyEngine {
    config: AssemblyConfig,
    toolchain: Arc<dyn MediaToolchain>,
    organizer: ArtifactOrganizer,
}

impl AssemblyEngine {
    pub fn new(
        config: AssemblyConfig,
        toolchain: Arc<dyn MediaToolchain>,
        organizer: ArtifactOrganizer,
    ) -> Self {
        Self {
            config,
            toolchain,
            organizer,
        }
    }

    /// Encode the surviving scenes of `report` into the run's final video.
    ///
    /// The encoder writes into `temp/`; only a complete file is promoted to
    /// `final_video/`, so a cancelled or failed encode leaves no final output.
    /// `seed` makes the music choice reproducible.
    pub async fn assemble(
        &self,
        report: &SyncReport,
        run: &mut ProductionRun,
        seed: u64,
        cancel: &CancellationToken,
    ) -> Result<AssembledVideo, PipelineError> {
        let mut clips = Vec::new();
        let mut audio = Vec::new();
        let mut spans = Vec::new();
        for scene in report.surviving() {
            match (&scene.clip, &scene.audio, scene.duration) {
                (Some(clip), Some(narration), Some(duration)) => {
                    clips.push(clip.clone());
                    audio.push(narration.clone());
                    spans.push((scene.index, duration));
                }
                _ => {
                    return Err(PipelineError::Encode(format!(
                        "scene {:02} has no resolved clip and narration",
                        scene.index + 1
                    )))
                }
            }
        }
        let timeline = plan_timeline(spans)?;

        let music = match &self.config.music_dir {
            Some(dir) => pick_music(dir, seed).await?,
            None => None,
        };
        if music.is_none() {
            tracing::info!("No background music, encoding narration only");
        }

        let layout = run.layout().clone();
        let filename = naming::final_video_filename(layout.project(), layout.form_factor());
        let request = MergeRequest {
            clips,
            audio,
            music: music.clone().map(|track| (track, self.config.music_gain)),
            total: timeline.total(),
            work_dir: layout.temp_dir(),
            output: layout.temp_path(&filename),
        };

        tracing::info!(
            scenes = timeline.len(),
            total_ms = timeline.total().as_millis() as u64,
            music = ?music,
            "Encoding final video",
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = self.toolchain.merge_and_encode(&request) => {
                result.map_err(|e| match e {
                    ServiceError::Cancelled => PipelineError::Cancelled,
                    ServiceError::Io(e) => PipelineError::Io(e),
                    other => PipelineError::Encode(other.to_string()),
                })?;
            }
        }

        // A quit during the encode must not leave a final video behind.
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let path = self
            .organizer
            .promote(run, ArtifactRole::Final, None, &request.output, &filename)
            .await?;
        run.metadata.total_duration_us = timeline.total().as_micros() as u64;

        Ok(AssembledVideo {
            path,
            timeline,
            music,
        })
    }
}

/// Choose one track from `dir` with a seeded RNG.
///
/// Candidates are sorted by name first so the same seed always picks the
/// same file. A missing or empty directory yields `None`.
pub async fn pick_music(dir: &Path, seed: u64) -> Result<Option<PathBuf>, PipelineError> {
    let mut read = match tokio::fs::read_dir(dir).await {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(music_dir = %dir.display(), "Music directory does not exist");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let mut tracks = Vec::new();
    while let Some(entry) = read.next_entry().await? {
        let path = entry.path();
        let is_music = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| MUSIC_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if is_music && entry.metadata().await?.is_file() {
            tracks.push(path);
        }
    }
    if tracks.is_empty() {
        return Ok(None);
    }
    tracks.sort();

    let mut rng = StdRng::seed_from_u64(seed);
    let pick = rng.random_range(0..tracks.len());
    Ok(Some(tracks.swap_remove(pick)))
}

/// Seed derived from a script so re-runs pick the same track.
pub fn music_seed(script_id: i64, revision: i32) -> u64 {
    ((script_id as u64) << 32) ^ (revision as u32 as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_loud_music() {
        assert!(AssemblyConfig::new(None, 2.0).is_err());
        assert_eq!(AssemblyConfig::default().music_gain, DEFAULT_MUSIC_GAIN);
    }

    #[test]
    fn seed_depends_on_revision() {
        assert_ne!(music_seed(7, 1), music_seed(7, 2));
        assert_eq!(music_seed(7, 1), music_seed(7, 1));
    }

    #[tokio::test]
    async fn music_pick_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.mp3", "a.wav", "c.ogg", "notes.txt"] {
            tokio::fs::write(tmp.path().join(name), b"x").await.unwrap();
        }
        let first = pick_music(tmp.path(), 42).await.unwrap().unwrap();
        let again = pick_music(tmp.path(), 42).await.unwrap().unwrap();
        assert_eq!(first, again);
        assert_ne!(first.extension().unwrap(), "txt");
    }

    #[tokio::test]
    async fn missing_or_empty_library_means_no_music() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(pick_music(tmp.path(), 1).await.unwrap(), None);
        assert_eq!(
            pick_music(&tmp.path().join("absent"), 1).await.unwrap(),
            None
        );
    }
}

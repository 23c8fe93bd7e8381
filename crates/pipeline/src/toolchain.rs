//! FFmpeg-backed motion renderer and media toolchain.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use storyreel_core::assembly::{determine_concat_strategy, ConcatStrategy, DEFAULT_FPS};
use storyreel_core::ffmpeg::{self, FfmpegError};

use crate::error::ServiceError;
use crate::providers::{
    AudioClip, MediaToolchain, MergeRequest, MotionClip, MotionRenderer, VisualAsset,
};

const VIDEO_LIST: &str = "clips.txt";
const AUDIO_LIST: &str = "narration.txt";
const JOINED_VIDEO: &str = "joined_video.mp4";
const JOINED_AUDIO: &str = "joined_narration.wav";

fn fitted_narration_name(index: usize) -> String {
    format!("narration_{:03}_fitted.wav", index + 1)
}

/// Renders and encodes with the `ffmpeg`/`ffprobe` binaries on `PATH`.
#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    fps: u32,
    resolution: (u32, u32),
}

impl Default for FfmpegToolchain {
    fn default() -> Self {
        Self::new(DEFAULT_FPS, (1920, 1080))
    }
}

impl FfmpegToolchain {
    pub fn new(fps: u32, resolution: (u32, u32)) -> Self {
        Self {
            fps: fps.max(1),
            resolution,
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Run `args`, then confirm the output covers `target` to within one frame.
    ///
    /// Encoders round to whole frames, so the reported clip duration is the
    /// requested target once the probe agrees. The merge fits each narration
    /// to its clip's measured length.
    async fn render_to(
        &self,
        args: Vec<String>,
        target: Duration,
        output: &Path,
    ) -> Result<MotionClip, ServiceError> {
        ffmpeg::run_ffmpeg(&args).await.map_err(ServiceError::render)?;
        let probed = ffmpeg::probe_duration(output)
            .await
            .map_err(ServiceError::render)?;
        let tolerance = ffmpeg::frame_period(self.fps);
        if probed.abs_diff(target) > tolerance {
            return Err(ServiceError::Render(format!(
                "{} lasts {}s, expected {}s",
                output.display(),
                ffmpeg::format_duration(probed),
                ffmpeg::format_duration(target)
            )));
        }
        Ok(MotionClip {
            path: output.to_path_buf(),
            duration: target,
        })
    }

    async fn concat_strategy(&self, clips: &[PathBuf]) -> Result<ConcatStrategy, FfmpegError> {
        let mut codecs = Vec::with_capacity(clips.len());
        let mut resolutions = Vec::with_capacity(clips.len());
        let mut framerates = Vec::with_capacity(clips.len());
        for clip in clips {
            let probe = ffmpeg::probe_media(clip).await?;
            codecs.push(ffmpeg::parse_video_codec(&probe));
            resolutions.push(ffmpeg::parse_resolution(&probe));
            framerates.push(ffmpeg::parse_framerate(&probe));
        }
        let codec_refs: Vec<&str> = codecs.iter().map(String::as_str).collect();
        Ok(determine_concat_strategy(
            &codec_refs,
            &resolutions,
            &framerates,
        ))
    }
}

#[async_trait]
impl MotionRenderer for FfmpegToolchain {
    async fn render(
        &self,
        visual: &VisualAsset,
        target: Duration,
        output: &Path,
    ) -> Result<MotionClip, ServiceError> {
        tracing::debug!(
            visual = %visual.path().display(),
            target_ms = target.as_millis() as u64,
            "Rendering motion clip",
        );
        let args = match visual {
            VisualAsset::Image(image) => {
                ffmpeg::ken_burns_args(image, target, self.fps, self.resolution, output)
            }
            VisualAsset::Footage(footage) => {
                ffmpeg::fit_footage_args(footage, target, self.fps, self.resolution, output)
            }
        };
        self.render_to(args, target, output).await
    }
}

#[async_trait]
impl MediaToolchain for FfmpegToolchain {
    async fn silence(&self, duration: Duration, output: &Path) -> Result<AudioClip, ServiceError> {
        ffmpeg::run_ffmpeg(&ffmpeg::silence_args(duration, output))
            .await
            .map_err(ServiceError::render)?;
        // PCM output is sample-exact, so the requested duration stands.
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
        let args = ffmpeg::color_clip_args(color, duration, self.fps, self.resolution, output);
        self.render_to(args, duration, output).await
    }

    async fn last_frame(&self, clip: &Path, output: &Path) -> Result<PathBuf, ServiceError> {
        ffmpeg::run_ffmpeg(&ffmpeg::last_frame_args(clip, output))
            .await
            .map_err(ServiceError::render)?;
        Ok(output.to_path_buf())
    }

    async fn hold_frame(
        &self,
        image: &Path,
        duration: Duration,
        output: &Path,
    ) -> Result<MotionClip, ServiceError> {
        let args = ffmpeg::still_frame_args(image, duration, self.fps, self.resolution, output);
        self.render_to(args, duration, output).await
    }

    async fn merge_and_encode(&self, request: &MergeRequest) -> Result<(), ServiceError> {
        if request.clips.is_empty() || request.clips.len() != request.audio.len() {
            return Err(ServiceError::Encode(format!(
                "{} clips and {} narration tracks cannot be merged",
                request.clips.len(),
                request.audio.len()
            )));
        }

        let strategy = self
            .concat_strategy(&request.clips)
            .await
            .map_err(ServiceError::encode)?;
        if let ConcatStrategy::ReEncode { reason } = &strategy {
            tracing::info!(reason = %reason, "Re-encoding clips for concat");
        }

        // Clips are whole frames long, so each narration is fitted to its
        // clip before joining; the two tracks then agree at every cut.
        let mut fitted = Vec::with_capacity(request.audio.len());
        let mut joined_length = Duration::ZERO;
        for (index, (clip, narration)) in request.clips.iter().zip(&request.audio).enumerate() {
            let length = ffmpeg::probe_duration(clip)
                .await
                .map_err(ServiceError::encode)?;
            let output = request.work_dir.join(fitted_narration_name(index));
            ffmpeg::run_ffmpeg(&ffmpeg::fit_audio_args(narration, length, &output))
                .await
                .map_err(ServiceError::encode)?;
            joined_length += length;
            fitted.push(output);
        }
        tracing::debug!(
            planned_ms = request.total.as_millis() as u64,
            joined_ms = joined_length.as_millis() as u64,
            "Narration fitted to clips",
        );

        let video_list = request.work_dir.join(VIDEO_LIST);
        let audio_list = request.work_dir.join(AUDIO_LIST);
        let clip_refs: Vec<&Path> = request.clips.iter().map(PathBuf::as_path).collect();
        let audio_refs: Vec<&Path> = fitted.iter().map(PathBuf::as_path).collect();
        tokio::fs::write(&video_list, ffmpeg::concat_list(&clip_refs)).await?;
        tokio::fs::write(&audio_list, ffmpeg::concat_list(&audio_refs)).await?;

        let joined_video = request.work_dir.join(JOINED_VIDEO);
        let joined_audio = request.work_dir.join(JOINED_AUDIO);
        ffmpeg::run_ffmpeg(&ffmpeg::concat_video_args(
            &video_list,
            &strategy,
            self.fps,
            &joined_video,
        ))
        .await
        .map_err(ServiceError::encode)?;
        ffmpeg::run_ffmpeg(&ffmpeg::concat_audio_args(&audio_list, &joined_audio))
            .await
            .map_err(ServiceError::encode)?;

        let music = request
            .music
            .as_ref()
            .map(|(track, gain)| (track.as_path(), *gain));
        ffmpeg::run_ffmpeg(&ffmpeg::mux_args(
            &joined_video,
            &joined_audio,
            music,
            joined_length,
            &request.output,
        ))
        .await
        .map_err(ServiceError::encode)
    }
}

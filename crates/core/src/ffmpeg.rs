//! FFmpeg/FFprobe shared command utilities.
//!
//! Argument builders are pure so they can be unit tested; [`run_ffmpeg`] and
//! [`probe_media`] execute them. Durations are formatted and parsed at
//! microsecond precision without going through floating point.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::assembly::ConcatStrategy;

/// Sample rate of generated and normalized narration audio.
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;

/// Per-frame zoom increment of the Ken Burns effect.
pub const KEN_BURNS_ZOOM_STEP: f64 = 0.0015;

/// Maximum zoom factor of the Ken Burns effect.
pub const KEN_BURNS_MAX_ZOOM: f64 = 1.5;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("media file not found: {0}")]
    VideoNotFound(String),
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub duration: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a media file and return the parsed JSON output.
pub async fn probe_media(path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::VideoNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Run `ffmpeg` with the given arguments (quiet, non-interactive).
///
/// The child is killed if the returned future is dropped.
pub async fn run_ffmpeg(args: &[String]) -> Result<(), FfmpegError> {
    let output = tokio::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-nostdin", "-loglevel", "error"])
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(())
}

/// Probe a file and return its exact duration.
pub async fn probe_duration(path: &Path) -> Result<Duration, FfmpegError> {
    let probe = probe_media(path).await?;
    parse_duration(&probe).ok_or_else(|| {
        FfmpegError::ParseError(format!("no duration reported for {}", path.display()))
    })
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn first_stream_of<'a>(probe: &'a FfprobeOutput, kind: &str) -> Option<&'a FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some(kind))
}

/// Parse a decimal seconds string (`"12.345678"`) into an exact duration.
///
/// Digits beyond microseconds are truncated. Negative or malformed values
/// yield `None`.
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let secs: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut micros: u32 = 0;
    for (i, digit) in frac.chars().take(6).enumerate() {
        let d = digit.to_digit(10)?;
        micros += d * 10u32.pow(5 - i as u32);
    }
    Some(Duration::from_secs(secs) + Duration::from_micros(u64::from(micros)))
}

/// Format a duration as decimal seconds with microsecond precision.
pub fn format_duration(d: Duration) -> String {
    format!("{}.{:06}", d.as_secs(), d.subsec_micros())
}

/// Parse the media duration from ffprobe output.
///
/// The format-level duration is preferred, then the first audio stream, then
/// the first video stream.
pub fn parse_duration(probe: &FfprobeOutput) -> Option<Duration> {
    probe
        .format
        .duration
        .as_deref()
        .and_then(parse_duration_str)
        .or_else(|| {
            first_stream_of(probe, "audio")
                .and_then(|s| s.duration.as_deref())
                .and_then(parse_duration_str)
        })
        .or_else(|| {
            first_stream_of(probe, "video")
                .and_then(|s| s.duration.as_deref())
                .and_then(parse_duration_str)
        })
}

/// Parse the video framerate from ffprobe output.
///
/// The `r_frame_rate` field is a fraction like `"30/1"` or `"24000/1001"`.
pub fn parse_framerate(probe: &FfprobeOutput) -> f64 {
    first_stream_of(probe, "video")
        .and_then(|s| s.r_frame_rate.as_deref())
        .map(parse_fraction)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 2 {
        let num = parts[0].parse::<f64>().unwrap_or(0.0);
        let den = parts[1].parse::<f64>().unwrap_or(1.0);
        if den > 0.0 {
            return num / den;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Find the first video stream's codec name.
pub fn parse_video_codec(probe: &FfprobeOutput) -> String {
    first_stream_of(probe, "video")
        .and_then(|s| s.codec_name.clone())
        .unwrap_or_default()
}

/// Find the first video stream's resolution.
pub fn parse_resolution(probe: &FfprobeOutput) -> (i32, i32) {
    first_stream_of(probe, "video")
        .map(|s| (s.width.unwrap_or(0), s.height.unwrap_or(0)))
        .unwrap_or((0, 0))
}

// ---------------------------------------------------------------------------
// Argument builders
// ---------------------------------------------------------------------------

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

fn video_encode_args(fps: u32) -> Vec<String> {
    vec![
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "medium".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-r".into(),
        fps.to_string(),
    ]
}

/// Generate a silent PCM clip of exactly `duration`.
pub fn silence_args(duration: Duration, output: &Path) -> Vec<String> {
    let mut args = strings(&["-y", "-f", "lavfi", "-i"]);
    args.push(format!("anullsrc=r={AUDIO_SAMPLE_RATE}:cl=stereo"));
    args.extend(["-t".into(), format_duration(duration)]);
    args.extend(strings(&["-c:a", "pcm_s16le"]));
    args.push(path_arg(output));
    args
}

/// Render a still image as a slow Ken Burns zoom lasting `duration`.
pub fn ken_burns_args(
    image: &Path,
    duration: Duration,
    fps: u32,
    (width, height): (u32, u32),
    output: &Path,
) -> Vec<String> {
    let frames = frame_count(duration, fps);
    let filter = format!(
        "scale={w2}:{h2}:force_original_aspect_ratio=increase,crop={w2}:{h2},\
         zoompan=z='min(zoom+{KEN_BURNS_ZOOM_STEP},{KEN_BURNS_MAX_ZOOM})':\
         x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':d={frames}:s={width}x{height}:fps={fps}",
        w2 = width * 2,
        h2 = height * 2,
    );
    let mut args = strings(&["-y", "-loop", "1", "-i"]);
    args.push(path_arg(image));
    args.extend(["-vf".into(), filter]);
    args.extend(["-t".into(), format_duration(duration)]);
    args.extend(video_encode_args(fps));
    args.push("-an".into());
    args.push(path_arg(output));
    args
}

/// Render a still frame held for `duration` without motion.
pub fn still_frame_args(
    image: &Path,
    duration: Duration,
    fps: u32,
    (width, height): (u32, u32),
    output: &Path,
) -> Vec<String> {
    let mut args = strings(&["-y", "-loop", "1", "-i"]);
    args.push(path_arg(image));
    args.extend([
        "-vf".into(),
        format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
        ),
    ]);
    args.extend(["-t".into(), format_duration(duration)]);
    args.extend(video_encode_args(fps));
    args.push("-an".into());
    args.push(path_arg(output));
    args
}

/// Fit stock footage to the frame, looping it if shorter than `duration`.
pub fn fit_footage_args(
    footage: &Path,
    duration: Duration,
    fps: u32,
    (width, height): (u32, u32),
    output: &Path,
) -> Vec<String> {
    let mut args = strings(&["-y", "-stream_loop", "-1", "-i"]);
    args.push(path_arg(footage));
    args.extend([
        "-vf".into(),
        format!(
            "scale={width}:{height}:force_original_aspect_ratio=increase,\
             crop={width}:{height},setsar=1"
        ),
    ]);
    args.extend(["-t".into(), format_duration(duration)]);
    args.extend(video_encode_args(fps));
    args.push("-an".into());
    args.push(path_arg(output));
    args
}

/// Render a solid-color clip lasting `duration`.
pub fn color_clip_args(
    color: &str,
    duration: Duration,
    fps: u32,
    (width, height): (u32, u32),
    output: &Path,
) -> Vec<String> {
    let mut args = strings(&["-y", "-f", "lavfi", "-i"]);
    args.push(format!("color=c={color}:s={width}x{height}:r={fps}"));
    args.extend(["-t".into(), format_duration(duration)]);
    args.extend(video_encode_args(fps));
    args.push(path_arg(output));
    args
}

/// Extract the final frame of a clip as an image.
pub fn last_frame_args(clip: &Path, output: &Path) -> Vec<String> {
    let mut args = strings(&["-y", "-sseof", "-0.5", "-i"]);
    args.push(path_arg(clip));
    args.extend(strings(&["-update", "1", "-frames:v", "1", "-q:v", "2"]));
    args.push(path_arg(output));
    args
}

/// Contents of an ffmpeg concat-demuxer list file.
pub fn concat_list(paths: &[&Path]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', "'\\''")))
        .collect()
}

/// Concatenate clips listed in a concat-demuxer file.
pub fn concat_video_args(list: &Path, strategy: &ConcatStrategy, fps: u32, output: &Path) -> Vec<String> {
    let mut args = strings(&["-y", "-f", "concat", "-safe", "0", "-i"]);
    args.push(path_arg(list));
    match strategy {
        ConcatStrategy::StreamCopy => args.extend(strings(&["-c", "copy"])),
        ConcatStrategy::ReEncode { .. } => args.extend(video_encode_args(fps)),
    }
    args.push("-an".into());
    args.push(path_arg(output));
    args
}

/// Concatenate narration clips into one normalized PCM track.
pub fn concat_audio_args(list: &Path, output: &Path) -> Vec<String> {
    let mut args = strings(&["-y", "-f", "concat", "-safe", "0", "-i"]);
    args.push(path_arg(list));
    args.extend(["-ar".into(), AUDIO_SAMPLE_RATE.to_string()]);
    args.extend(strings(&["-ac", "2", "-c:a", "pcm_s16le"]));
    args.push(path_arg(output));
    args
}

/// Pad with silence or trim a narration track to exactly `duration`, as PCM.
pub fn fit_audio_args(input: &Path, duration: Duration, output: &Path) -> Vec<String> {
    let length = format_duration(duration);
    let mut args = strings(&["-y", "-i"]);
    args.push(path_arg(input));
    args.extend([
        "-af".into(),
        format!("apad=whole_dur={length},atrim=duration={length}"),
    ]);
    args.extend(["-ar".into(), AUDIO_SAMPLE_RATE.to_string()]);
    args.extend(strings(&["-ac", "2", "-c:a", "pcm_s16le"]));
    args.push(path_arg(output));
    args
}

/// Mux the concatenated video with narration and an optional looped music bed.
///
/// Music is looped indefinitely, attenuated to `gain`, mixed under the
/// narration, and the output is cut at `total`.
pub fn mux_args(
    video: &Path,
    narration: &Path,
    music: Option<(&Path, f64)>,
    total: Duration,
    output: &Path,
) -> Vec<String> {
    let mut args = strings(&["-y", "-i"]);
    args.push(path_arg(video));
    args.push("-i".into());
    args.push(path_arg(narration));

    match music {
        Some((track, gain)) => {
            args.extend(strings(&["-stream_loop", "-1", "-i"]));
            args.push(path_arg(track));
            args.extend([
                "-filter_complex".into(),
                format!(
                    "[2:a]volume={gain}[bed];\
                     [1:a][bed]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]"
                ),
            ]);
            args.extend(strings(&["-map", "0:v", "-map", "[aout]"]));
        }
        None => args.extend(strings(&["-map", "0:v", "-map", "1:a"])),
    }

    args.extend(strings(&["-c:v", "copy", "-c:a", "aac", "-b:a", "192k"]));
    args.extend(["-t".into(), format_duration(total)]);
    args.extend(strings(&["-movflags", "+faststart"]));
    args.push(path_arg(output));
    args
}

/// Number of frames needed to cover `duration` at `fps`, rounded up.
pub fn frame_count(duration: Duration, fps: u32) -> u64 {
    let micros = duration.as_micros() as u64;
    let fps = u64::from(fps.max(1));
    (micros * fps).div_ceil(1_000_000).max(1)
}

/// One frame period at `fps`.
pub fn frame_period(fps: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(fps.max(1)))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn probe(duration: Option<&str>, streams: Vec<FfprobeStream>) -> FfprobeOutput {
        FfprobeOutput {
            streams,
            format: FfprobeFormat {
                duration: duration.map(str::to_string),
                format_name: None,
            },
        }
    }

    fn stream(kind: &str, duration: Option<&str>) -> FfprobeStream {
        FfprobeStream {
            index: 0,
            codec_name: Some(if kind == "video" { "h264" } else { "aac" }.into()),
            codec_type: Some(kind.into()),
            width: Some(1920),
            height: Some(1080),
            r_frame_rate: Some("24000/1001".into()),
            duration: duration.map(str::to_string),
        }
    }

    // -- durations --

    #[test]
    fn parse_duration_str_exact() {
        assert_eq!(
            parse_duration_str("12.345678"),
            Some(Duration::from_micros(12_345_678))
        );
        assert_eq!(parse_duration_str("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_duration_str("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(
            parse_duration_str("1.23456789"),
            Some(Duration::from_micros(1_234_567))
        );
    }

    #[test]
    fn parse_duration_str_rejects_garbage() {
        assert_eq!(parse_duration_str("N/A"), None);
        assert_eq!(parse_duration_str("-1.0"), None);
        assert_eq!(parse_duration_str(""), None);
        assert_eq!(parse_duration_str("."), None);
    }

    #[test]
    fn format_duration_round_trips() {
        let d = Duration::from_micros(7_000_042);
        assert_eq!(format_duration(d), "7.000042");
        assert_eq!(parse_duration_str(&format_duration(d)), Some(d));
    }

    #[test]
    fn duration_prefers_format_then_audio() {
        let p = probe(Some("4.5"), vec![stream("audio", Some("4.4"))]);
        assert_eq!(parse_duration(&p), Some(Duration::from_millis(4500)));

        let p = probe(None, vec![stream("video", Some("9.0")), stream("audio", Some("4.4"))]);
        assert_eq!(parse_duration(&p), Some(Duration::from_millis(4400)));

        assert_eq!(parse_duration(&probe(None, vec![])), None);
    }

    // -- stream info --

    #[test]
    fn framerate_codec_resolution() {
        let p = probe(None, vec![stream("video", None)]);
        assert!((parse_framerate(&p) - 23.976).abs() < 0.01);
        assert_eq!(parse_video_codec(&p), "h264");
        assert_eq!(parse_resolution(&p), (1920, 1080));
    }

    #[test]
    fn fraction_parsing() {
        assert!((parse_fraction("30/1") - 30.0).abs() < 0.001);
        assert!((parse_fraction("25") - 25.0).abs() < 0.001);
        assert!((parse_fraction("30/0") - 0.0).abs() < 0.001);
    }

    // -- builders --

    #[test]
    fn silence_is_exact_pcm() {
        let args = silence_args(Duration::from_millis(750), Path::new("/t/p.wav"));
        assert!(args.contains(&"0.750000".to_string()));
        assert!(args.contains(&"pcm_s16le".to_string()));
        assert_eq!(args.last().unwrap(), "/t/p.wav");
    }

    #[test]
    fn ken_burns_covers_duration() {
        let args = ken_burns_args(
            Path::new("img.png"),
            Duration::from_micros(2_010_000),
            30,
            (1920, 1080),
            Path::new("out.mp4"),
        );
        let filter = &args[args.iter().position(|a| a == "-vf").unwrap() + 1];
        assert!(filter.contains("zoompan"));
        assert!(filter.contains("d=61"));
        assert!(filter.contains("s=1920x1080"));
        assert!(args.contains(&"2.010000".to_string()));
    }

    #[test]
    fn concat_list_escapes_quotes() {
        let a = PathBuf::from("/runs/it's/a.mp4");
        let b = PathBuf::from("/runs/b.mp4");
        let list = concat_list(&[a.as_path(), b.as_path()]);
        assert_eq!(list, "file '/runs/it'\\''s/a.mp4'\nfile '/runs/b.mp4'\n");
    }

    #[test]
    fn concat_uses_strategy() {
        let copy = concat_video_args(
            Path::new("l.txt"),
            &ConcatStrategy::StreamCopy,
            30,
            Path::new("o.mp4"),
        );
        assert!(copy.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));

        let reencode = concat_video_args(
            Path::new("l.txt"),
            &ConcatStrategy::ReEncode {
                reason: "Mixed codecs".into(),
            },
            30,
            Path::new("o.mp4"),
        );
        assert!(reencode.contains(&"libx264".to_string()));
    }

    #[test]
    fn footage_is_looped_and_cut_to_target() {
        let args = fit_footage_args(
            Path::new("stock.mp4"),
            Duration::from_micros(2_500_000),
            30,
            (1280, 720),
            Path::new("clip.mp4"),
        );
        assert_eq!(&args[1..4], &["-stream_loop", "-1", "-i"]);
        assert!(args.windows(2).any(|w| w[0] == "-t" && w[1] == "2.500000"));
        assert!(args.iter().any(|a| a.contains("crop=1280:720")));
    }

    #[test]
    fn narration_fitted_to_clip_length() {
        // 1.5s of speech against a 46-frame clip at 30fps.
        let clip = Duration::from_micros(1_533_333);
        let args = fit_audio_args(Path::new("n.wav"), clip, Path::new("fit.wav"));
        let filter = &args[args.iter().position(|a| a == "-af").unwrap() + 1];
        assert_eq!(filter, "apad=whole_dur=1.533333,atrim=duration=1.533333");
        assert!(args.contains(&"pcm_s16le".to_string()));
        assert_eq!(args.last().unwrap(), "fit.wav");
    }

    #[test]
    fn mux_with_music_loops_and_attenuates() {
        let args = mux_args(
            Path::new("v.mp4"),
            Path::new("n.wav"),
            Some((Path::new("m.mp3"), 0.15)),
            Duration::from_secs(12),
            Path::new("final.mp4"),
        );
        assert!(args.windows(2).any(|w| w[0] == "-stream_loop" && w[1] == "-1"));
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert!(filter.contains("volume=0.15"));
        assert!(filter.contains("duration=first"));
        assert!(args.windows(2).any(|w| w[0] == "-t" && w[1] == "12.000000"));
    }

    #[test]
    fn mux_without_music_maps_narration() {
        let args = mux_args(
            Path::new("v.mp4"),
            Path::new("n.wav"),
            None,
            Duration::from_secs(1),
            Path::new("final.mp4"),
        );
        assert!(!args.contains(&"-filter_complex".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
    }

    #[test]
    fn frame_math() {
        assert_eq!(frame_count(Duration::from_secs(1), 30), 30);
        assert_eq!(frame_count(Duration::from_micros(1_000_001), 30), 31);
        assert_eq!(frame_count(Duration::from_micros(10), 30), 1);
        assert_eq!(frame_period(25), Duration::from_millis(40));
    }
}

//! Assembly planning: resolution parsing, concat strategy determination, and
//! the ordered timeline of surviving scenes.
//!
//! Durations are carried as [`Duration`] so that sums are exact; no float
//! arithmetic is involved in placing segments.

use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_RESOLUTION: &str = "1080p";
pub const DEFAULT_FPS: u32 = 30;

/// Default gain of the background music bed relative to narration.
pub const DEFAULT_MUSIC_GAIN: f64 = 0.15;

/// Audio file extensions considered when scanning a music library.
pub const MUSIC_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "ogg", "flac"];

// ---------------------------------------------------------------------------
// Resolution parsing
// ---------------------------------------------------------------------------

/// Parse a resolution string like `"1920x1080"` into `(width, height)`.
pub fn parse_resolution_str(s: &str) -> Result<(u32, u32), CoreError> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err(CoreError::Validation(format!(
            "Invalid resolution format '{s}': expected WIDTHxHEIGHT"
        )));
    }
    let width = parts[0]
        .parse::<u32>()
        .map_err(|_| CoreError::Validation(format!("Invalid width in resolution '{s}'")))?;
    let height = parts[1]
        .parse::<u32>()
        .map_err(|_| CoreError::Validation(format!("Invalid height in resolution '{s}'")))?;
    if width == 0 || height == 0 {
        return Err(CoreError::Validation(format!(
            "Resolution dimensions must be > 0, got '{s}'"
        )));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(CoreError::Validation(format!(
            "Resolution dimensions must be even for yuv420p, got '{s}'"
        )));
    }
    Ok((width, height))
}

/// Parse a named preset (`480p`, `720p`, `1080p`, `1440p`, `2160p`, `4k`) or a
/// `WIDTHxHEIGHT` string. Presets are 16:9.
pub fn parse_video_resolution(s: &str) -> Result<(u32, u32), CoreError> {
    let normalized = s.trim().to_lowercase();
    match normalized.as_str() {
        "480p" => Ok((854, 480)),
        "720p" => Ok((1280, 720)),
        "1080p" => Ok((1920, 1080)),
        "1440p" => Ok((2560, 1440)),
        "2160p" | "4k" => Ok((3840, 2160)),
        other => parse_resolution_str(other),
    }
}

// ---------------------------------------------------------------------------
// Concat strategy
// ---------------------------------------------------------------------------

/// Strategy for concatenating multiple video clips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcatStrategy {
    /// All clips share the same codec, resolution, and framerate; use stream copy.
    StreamCopy,
    /// Re-encode is required due to mismatches.
    ReEncode { reason: String },
}

/// Determine the concatenation strategy based on the properties of source clips.
///
/// Stream-copy is preferred when all clips share the same codec, resolution,
/// and framerate. Any mismatch forces a re-encode.
pub fn determine_concat_strategy(
    codecs: &[&str],
    resolutions: &[(i32, i32)],
    framerates: &[f64],
) -> ConcatStrategy {
    if codecs.is_empty() {
        return ConcatStrategy::StreamCopy;
    }

    let first_codec = codecs[0];
    if codecs.iter().any(|c| *c != first_codec) {
        return ConcatStrategy::ReEncode {
            reason: "Mixed codecs".to_string(),
        };
    }

    if let Some(first_res) = resolutions.first() {
        if resolutions.iter().any(|r| r != first_res) {
            return ConcatStrategy::ReEncode {
                reason: "Mixed resolutions".to_string(),
            };
        }
    }

    // Framerates compare within a small tolerance.
    if let Some(first_fps) = framerates.first() {
        if framerates.iter().any(|f| (*f - first_fps).abs() > 0.01) {
            return ConcatStrategy::ReEncode {
                reason: "Mixed framerates".to_string(),
            };
        }
    }

    ConcatStrategy::StreamCopy
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// One scene's placement in the final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    /// Scene index in the script. Gaps appear where scenes were dropped.
    pub index: usize,
    pub start: Duration,
    pub duration: Duration,
}

impl TimelineEntry {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Ordered, gap-free placement of surviving scenes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    total: Duration,
}

impl Timeline {
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Sum of all segment durations; each segment starts where the last ends.
    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lay scenes end to end in index order.
///
/// `scenes` must already be sorted by strictly increasing index; completion
/// order never reaches this point. Every duration must be non-zero.
pub fn plan_timeline<I>(scenes: I) -> Result<Timeline, CoreError>
where
    I: IntoIterator<Item = (usize, Duration)>,
{
    let mut entries: Vec<TimelineEntry> = Vec::new();
    let mut cursor = Duration::ZERO;

    for (index, duration) in scenes {
        if let Some(prev) = entries.last() {
            if index <= prev.index {
                return Err(CoreError::Validation(format!(
                    "Scene {index} is out of order after scene {}",
                    prev.index
                )));
            }
        }
        if duration.is_zero() {
            return Err(CoreError::Validation(format!(
                "Scene {index} has zero duration"
            )));
        }
        entries.push(TimelineEntry {
            index,
            start: cursor,
            duration,
        });
        cursor += duration;
    }

    if entries.is_empty() {
        return Err(CoreError::Validation(
            "Nothing to assemble: no surviving scenes".to_string(),
        ));
    }

    Ok(Timeline {
        entries,
        total: cursor,
    })
}

/// Validate a music gain factor.
pub fn validate_music_gain(gain: f64) -> Result<f64, CoreError> {
    if !gain.is_finite() || !(0.0..=1.0).contains(&gain) {
        return Err(CoreError::Validation(format!(
            "Music gain must be within [0, 1], got {gain}"
        )));
    }
    Ok(gain)
}

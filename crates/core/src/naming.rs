//! Artifact naming convention engine.
//!
//! Generates deterministic, filesystem-safe names for run directories and
//! per-scene artifacts.
//!
//! Convention: `scene_{NN}_{slug}.{ext}`
//!
//! - `NN` = 1-based display number, zero-padded to two digits (`scene_01_…`)
//! - `slug` = first few words of the sentence, sanitized; `pause` for pauses
//! - the same stem is shared by a scene's audio, image, and clip artifacts
//!
//! ```
//! use storyreel_core::naming::{scene_slug, scene_stem};
//!
//! let slug = scene_slug(Some("The ocean floor hides vents, towers, and life."), 5);
//! assert_eq!(slug, "the_ocean_floor_hides_vents");
//! assert_eq!(scene_stem(0, &slug), "scene_01_the_ocean_floor_hides_vents");
//! ```

use crate::job::FormFactor;
use crate::types::Timestamp;

/// Maximum length (in characters) of a sanitized path component.
pub const MAX_COMPONENT_LEN: usize = 100;

/// Maximum length (in characters) of a scene slug.
pub const MAX_SLUG_LEN: usize = 60;

/// Default number of sentence words used in a scene slug.
pub const DEFAULT_SLUG_WORDS: usize = 5;

/// `chrono` format of run-timestamp directory names.
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Slug used for pause scenes.
pub const PAUSE_SLUG: &str = "pause";

const FALLBACK_COMPONENT: &str = "untitled";
const FALLBACK_SLUG: &str = "scene";

/// Sanitize a free-form string into a single lowercase path component.
///
/// Whitespace becomes `_`; anything other than alphanumerics, `.`, `_`, and
/// `-` is dropped. Leading and trailing separators are trimmed so the result
/// never starts with a dot. The result is capped at `max_len` characters and
/// is never empty.
pub fn sanitize_component(raw: &str, max_len: usize) -> String {
    let mapped: String = raw
        .trim()
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') {
                Some(c)
            } else {
                None
            }
        })
        .flat_map(char::to_lowercase)
        .take(max_len)
        .collect();

    let trimmed = mapped.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    if trimmed.is_empty() {
        FALLBACK_COMPONENT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Project directory name for a topic.
pub fn project_name(topic: &str) -> String {
    sanitize_component(topic, MAX_COMPONENT_LEN)
}

/// Slug from the first `words` words of a sentence, or [`PAUSE_SLUG`] for a
/// pause scene.
pub fn scene_slug(sentence: Option<&str>, words: usize) -> String {
    let Some(sentence) = sentence else {
        return PAUSE_SLUG.to_string();
    };
    let joined = sentence
        .split_whitespace()
        .take(words.max(1))
        .collect::<Vec<_>>()
        .join("_");
    let slug = sanitize_component(&joined, MAX_SLUG_LEN);
    if slug == FALLBACK_COMPONENT {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Shared filename stem for a scene's artifacts. `index` is 0-based.
pub fn scene_stem(index: usize, slug: &str) -> String {
    format!("scene_{:02}_{slug}", index + 1)
}

/// Full artifact filename for a scene.
pub fn scene_filename(index: usize, slug: &str, extension: &str) -> String {
    format!("{}.{extension}", scene_stem(index, slug))
}

/// Final video filename: `{project}_{form_factor}_final.mp4`.
pub fn final_video_filename(project: &str, form_factor: FormFactor) -> String {
    format!("{project}_{}_final.mp4", form_factor.as_str())
}

/// Run-timestamp directory name for `at`.
pub fn run_timestamp(at: Timestamp) -> String {
    at.format(RUN_TIMESTAMP_FORMAT).to_string()
}

/// Directory name for the `attempt`-th claim of a run timestamp.
///
/// The first attempt uses the bare timestamp; later attempts within the same
/// second append `_2`, `_3`, ...
pub fn run_dir_name(timestamp: &str, attempt: u32) -> String {
    if attempt <= 1 {
        timestamp.to_string()
    } else {
        format!("{timestamp}_{attempt}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    // -- sanitize_component --

    #[test]
    fn sanitize_replaces_spaces_and_lowercases() {
        assert_eq!(
            sanitize_component("Deep Sea Vents", MAX_COMPONENT_LEN),
            "deep_sea_vents"
        );
    }

    #[test]
    fn sanitize_strips_unsafe_characters() {
        assert_eq!(
            sanitize_component("What/is: \"dark\" matter?", MAX_COMPONENT_LEN),
            "whatis_dark_matter"
        );
    }

    #[test]
    fn sanitize_never_starts_with_dot() {
        assert_eq!(sanitize_component("../etc", MAX_COMPONENT_LEN), "etc");
    }

    #[test]
    fn sanitize_keeps_unicode_letters() {
        assert_eq!(sanitize_component("Café Über", MAX_COMPONENT_LEN), "café_über");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_component(&long, MAX_COMPONENT_LEN).chars().count(), 100);
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_component("???", MAX_COMPONENT_LEN), "untitled");
        assert_eq!(project_name(""), "untitled");
    }

    // -- scene names --

    #[test]
    fn slug_uses_first_words() {
        assert_eq!(
            scene_slug(Some("Volcanoes shape islands over millions of years."), 3),
            "volcanoes_shape_islands"
        );
    }

    #[test]
    fn slug_for_pause_and_punctuation_only() {
        assert_eq!(scene_slug(None, 5), "pause");
        assert_eq!(scene_slug(Some("?!"), 5), "scene");
    }

    #[test]
    fn identical_slugs_disambiguated_by_index() {
        let slug = scene_slug(Some("Again."), 5);
        assert_ne!(scene_stem(0, &slug), scene_stem(1, &slug));
        assert_eq!(scene_filename(9, &slug, "wav"), "scene_10_again.wav");
    }

    #[test]
    fn final_video_name() {
        assert_eq!(
            final_video_filename("deep_sea_vents", FormFactor::ShortForm),
            "deep_sea_vents_short_form_final.mp4"
        );
    }

    // -- run directories --

    #[test]
    fn run_timestamp_format() {
        let at = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(run_timestamp(at), "20240309_140507");
    }

    #[test]
    fn run_dir_suffixes() {
        assert_eq!(run_dir_name("20240309_140507", 1), "20240309_140507");
        assert_eq!(run_dir_name("20240309_140507", 3), "20240309_140507_3");
    }
}

//! Narration segmentation into ordered scene cues.
//!
//! Narration is split after sentence-terminal punctuation (`.`, `?`, `!`,
//! `…`), keeping trailing closing quotes and brackets with their sentence.
//! Inline pause markers (`[pause]`, `[pause:1.5]`, `[pause: 2s]`) become
//! speechless cues backed by a silence clip.
//!
//! The returned cue indices are zero-based and dense, in narration order.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Matches `[pause]` or `[pause:<seconds>]`, case-insensitive.
static PAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[pause(?:\s*:\s*(\d+(?:\.\d+)?)\s*s?)?\s*\]").expect("valid regex")
});

/// Longest pause a marker may request.
pub const MAX_PAUSE_SECS: f64 = 30.0;

const SENTENCE_TERMINATORS: &[char] = &['.', '?', '!', '…'];
const CLOSING_MARKS: &[char] = &['"', '\'', '”', '’', ')', ']', '»'];

/// What a scene cue carries.
#[derive(Debug, Clone, PartialEq)]
pub enum CueKind {
    /// One sentence to be narrated.
    Speech { text: String },
    /// A fixed-length silence.
    Pause { duration: Duration },
}

/// One ordered unit of a segmented narration.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneCue {
    pub index: usize,
    pub kind: CueKind,
}

impl SceneCue {
    /// Sentence text, or `None` for a pause.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            CueKind::Speech { text } => Some(text),
            CueKind::Pause { .. } => None,
        }
    }

    pub fn is_pause(&self) -> bool {
        matches!(self.kind, CueKind::Pause { .. })
    }
}

/// Segment a narration into dense, ordered cues.
///
/// `default_pause` is used for bare `[pause]` markers. Markers requesting a
/// zero-length pause produce no cue; requested lengths are capped at
/// [`MAX_PAUSE_SECS`].
pub fn segment_narration(narration: &str, default_pause: Duration) -> Vec<SceneCue> {
    let folded = narration.replace(['\r', '\n'], " ");
    let mut kinds = Vec::new();
    let mut cursor = 0;

    for caps in PAUSE_RE.captures_iter(&folded) {
        let Some(marker) = caps.get(0) else { continue };
        push_sentences(&folded[cursor..marker.start()], &mut kinds);

        let duration = caps
            .get(1)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|secs| Duration::from_secs_f64(secs.min(MAX_PAUSE_SECS)))
            .unwrap_or(default_pause);
        if !duration.is_zero() {
            kinds.push(CueKind::Pause { duration });
        }
        cursor = marker.end();
    }
    push_sentences(&folded[cursor..], &mut kinds);

    kinds
        .into_iter()
        .enumerate()
        .map(|(index, kind)| SceneCue { index, kind })
        .collect()
}

/// Split a marker-free span into sentences.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut kinds = Vec::new();
    push_sentences(text, &mut kinds);
    kinds
        .into_iter()
        .filter_map(|k| match k {
            CueKind::Speech { text } => Some(text),
            CueKind::Pause { .. } => None,
        })
        .collect()
}

fn push_sentences(span: &str, out: &mut Vec<CueKind>) {
    let mut start = 0;
    let mut chars = span.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !SENTENCE_TERMINATORS.contains(&c) {
            continue;
        }
        // Swallow runs like "?!" or "..." and any closing quote/bracket.
        while let Some(&(_, next)) = chars.peek() {
            if SENTENCE_TERMINATORS.contains(&next) || CLOSING_MARKS.contains(&next) {
                chars.next();
            } else {
                break;
            }
        }
        match chars.peek() {
            Some(&(pos, next)) if next.is_whitespace() => {
                push_trimmed(&span[start..pos], out);
                start = pos;
            }
            None => {
                push_trimmed(&span[start..], out);
                start = span.len();
            }
            _ => {}
        }
    }
    push_trimmed(&span[start..], out);
}

fn push_trimmed(piece: &str, out: &mut Vec<CueKind>) {
    let piece = piece.split_whitespace().collect::<Vec<_>>().join(" ");
    if !piece.is_empty() {
        out.push(CueKind::Speech { text: piece });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAUSE: Duration = Duration::from_millis(750);

    fn texts(cues: &[SceneCue]) -> Vec<Option<&str>> {
        cues.iter().map(SceneCue::text).collect()
    }

    // -- sentences --

    #[test]
    fn splits_on_terminal_punctuation() {
        let cues = segment_narration("One. Two? Three! Four", PAUSE);
        assert_eq!(
            texts(&cues),
            vec![Some("One."), Some("Two?"), Some("Three!"), Some("Four")]
        );
    }

    #[test]
    fn newlines_are_folded() {
        let cues = segment_narration("First line\ncontinues here.\n\nSecond.", PAUSE);
        assert_eq!(
            texts(&cues),
            vec![Some("First line continues here."), Some("Second.")]
        );
    }

    #[test]
    fn decimals_and_abbreviated_runs_stay_whole() {
        let cues = segment_narration("Pi is 3.14 roughly. Wait... what?!", PAUSE);
        assert_eq!(
            texts(&cues),
            vec![Some("Pi is 3.14 roughly."), Some("Wait..."), Some("what?!")]
        );
    }

    #[test]
    fn closing_quotes_stay_with_sentence() {
        let cues = segment_narration("She said \"stop.\" Then (quietly.) left.", PAUSE);
        assert_eq!(
            texts(&cues),
            vec![
                Some("She said \"stop.\""),
                Some("Then (quietly.)"),
                Some("left.")
            ]
        );
    }

    #[test]
    fn empty_narration_yields_nothing() {
        assert!(segment_narration("   \n ", PAUSE).is_empty());
    }

    // -- pauses --

    #[test]
    fn bare_pause_uses_default() {
        let cues = segment_narration("Hello. [pause] World.", PAUSE);
        assert_eq!(cues.len(), 3);
        assert_eq!(cues[1].kind, CueKind::Pause { duration: PAUSE });
    }

    #[test]
    fn pause_with_seconds() {
        let cues = segment_narration("A.[PAUSE: 1.5s]B.", PAUSE);
        assert_eq!(
            cues[1].kind,
            CueKind::Pause {
                duration: Duration::from_millis(1500)
            }
        );
        assert_eq!(texts(&cues), vec![Some("A."), None, Some("B.")]);
    }

    #[test]
    fn pause_splits_unterminated_text() {
        let cues = segment_narration("no period here [pause:2] and here", PAUSE);
        assert_eq!(
            texts(&cues),
            vec![Some("no period here"), None, Some("and here")]
        );
    }

    #[test]
    fn zero_pause_is_skipped_and_long_pause_capped() {
        let cues = segment_narration("A. [pause:0] B. [pause:90]", PAUSE);
        assert_eq!(cues.len(), 3);
        assert_eq!(
            cues[2].kind,
            CueKind::Pause {
                duration: Duration::from_secs(30)
            }
        );
    }

    // -- indices --

    #[test]
    fn indices_are_dense_and_zero_based() {
        let cues = segment_narration("A. [pause] B. C! [pause:1] D?", PAUSE);
        let indices: Vec<usize> = cues.iter().map(|c| c.index).collect();
        assert_eq!(indices, (0..cues.len()).collect::<Vec<_>>());
        assert_eq!(cues.len(), 6);
    }

    #[test]
    fn split_sentences_ignores_pause_logic() {
        assert_eq!(split_sentences("One. Two."), vec!["One.", "Two."]);
    }
}

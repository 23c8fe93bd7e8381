//! Feedback decision constants and parsing.
//!
//! A reviewer answers each pending script with `approve`, `revise` (with
//! notes), or `quit`. An unanswered request falls back to `approve` once the
//! configured wait elapses.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Script approved as-is.
pub const DECISION_APPROVE: &str = "approve";

/// Script sent back for a new narration.
pub const DECISION_REVISE: &str = "revise";

/// Reviewer aborted the whole job.
pub const DECISION_QUIT: &str = "quit";

/// All valid decision values.
pub const VALID_DECISIONS: &[&str] = &[DECISION_APPROVE, DECISION_REVISE, DECISION_QUIT];

/// Default wait before an unanswered feedback request counts as `approve`.
pub const DEFAULT_FEEDBACK_TIMEOUT_SECS: u64 = 3;

/// A reviewer's answer for one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum FeedbackDecision {
    Approve,
    Revise { notes: String },
    Quit,
}

impl FeedbackDecision {
    /// Parse a decision string plus optional notes.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace. An
    /// empty decision means `approve`, mirroring the prompt default.
    /// `revise` requires non-blank notes.
    pub fn parse(decision: &str, notes: Option<&str>) -> Result<Self, CoreError> {
        let normalized = decision.trim().to_lowercase();
        match normalized.as_str() {
            "" | DECISION_APPROVE => Ok(Self::Approve),
            DECISION_QUIT => Ok(Self::Quit),
            DECISION_REVISE => Self::revise(notes.unwrap_or_default()),
            other => Err(CoreError::Validation(format!(
                "Invalid decision '{other}'. Must be one of: {}",
                VALID_DECISIONS.join(", ")
            ))),
        }
    }

    /// Build a `revise` decision, rejecting blank notes.
    pub fn revise(notes: &str) -> Result<Self, CoreError> {
        let notes = notes.trim();
        if notes.is_empty() {
            return Err(CoreError::Validation(
                "A revise decision requires non-empty revision notes".to_string(),
            ));
        }
        Ok(Self::Revise {
            notes: notes.to_string(),
        })
    }

    /// Decision name as recorded in the feedback log.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve => DECISION_APPROVE,
            Self::Revise { .. } => DECISION_REVISE,
            Self::Quit => DECISION_QUIT,
        }
    }

    pub fn notes(&self) -> Option<&str> {
        match self {
            Self::Revise { notes } => Some(notes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_decisions() {
        assert_eq!(
            FeedbackDecision::parse("approve", None).unwrap(),
            FeedbackDecision::Approve
        );
        assert_eq!(
            FeedbackDecision::parse(" QUIT ", None).unwrap(),
            FeedbackDecision::Quit
        );
        assert_eq!(
            FeedbackDecision::parse("revise", Some("shorter intro")).unwrap(),
            FeedbackDecision::Revise {
                notes: "shorter intro".into()
            }
        );
    }

    #[test]
    fn empty_decision_means_approve() {
        assert_eq!(
            FeedbackDecision::parse("", None).unwrap(),
            FeedbackDecision::Approve
        );
    }

    #[test]
    fn revise_without_notes_rejected() {
        assert!(FeedbackDecision::parse("revise", None).is_err());
        let err = FeedbackDecision::parse("revise", Some("   ")).unwrap_err();
        assert!(err.to_string().contains("revision notes"));
    }

    #[test]
    fn unknown_decision_rejected() {
        let err = FeedbackDecision::parse("maybe", None).unwrap_err();
        assert!(err.to_string().contains("Invalid decision"));
    }

    #[test]
    fn names_and_notes() {
        let revise = FeedbackDecision::revise("more facts").unwrap();
        assert_eq!(revise.name(), "revise");
        assert_eq!(revise.notes(), Some("more facts"));
        assert_eq!(FeedbackDecision::Quit.notes(), None);
    }

    #[test]
    fn default_timeout_is_three_seconds() {
        assert_eq!(DEFAULT_FEEDBACK_TIMEOUT_SECS, 3);
    }
}

//! Per-scene outcomes and the dropped-scene threshold.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How a scene came through synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneOutcome {
    /// Audio and a real visual.
    Full,
    /// Audio with a placeholder visual.
    Degraded,
    /// No usable audio; excluded from assembly.
    Dropped,
}

impl SceneOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Degraded => "degraded",
            Self::Dropped => "dropped",
        }
    }
}

/// Partial-success counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub full: usize,
    pub degraded: usize,
    pub dropped: usize,
}

impl OutcomeTally {
    pub fn from_outcomes<I: IntoIterator<Item = SceneOutcome>>(outcomes: I) -> Self {
        let mut tally = Self::default();
        for outcome in outcomes {
            tally.record(outcome);
        }
        tally
    }

    pub fn record(&mut self, outcome: SceneOutcome) {
        match outcome {
            SceneOutcome::Full => self.full += 1,
            SceneOutcome::Degraded => self.degraded += 1,
            SceneOutcome::Dropped => self.dropped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.full + self.degraded + self.dropped
    }

    /// Scenes that make it into assembly.
    pub fn surviving(&self) -> usize {
        self.full + self.degraded
    }

    /// Dropped scenes as a fraction of all scenes; `0.0` when there are none.
    pub fn dropped_fraction(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.dropped as f64 / total as f64,
        }
    }
}

/// Validate a configured maximum dropped fraction.
pub fn validate_drop_threshold(max_dropped_fraction: f64) -> Result<f64, CoreError> {
    if !max_dropped_fraction.is_finite() || !(0.0..=1.0).contains(&max_dropped_fraction) {
        return Err(CoreError::Validation(format!(
            "Dropped-scene threshold must be within [0, 1], got {max_dropped_fraction}"
        )));
    }
    Ok(max_dropped_fraction)
}

/// Reason a run must abort, or `None` if it may proceed to assembly.
///
/// A run aborts when the dropped fraction is strictly greater than the
/// threshold, or when no scene survives at all.
pub fn drop_threshold_violation(tally: &OutcomeTally, max_dropped_fraction: f64) -> Option<String> {
    if tally.total() == 0 {
        return Some("narration produced no scenes".to_string());
    }
    if tally.surviving() == 0 {
        return Some(format!("all {} scenes dropped", tally.total()));
    }
    let fraction = tally.dropped_fraction();
    if fraction > max_dropped_fraction {
        return Some(format!(
            "{} of {} scenes dropped ({:.1}%), above the {:.1}% limit",
            tally.dropped,
            tally.total(),
            fraction * 100.0,
            max_dropped_fraction * 100.0
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(full: usize, degraded: usize, dropped: usize) -> OutcomeTally {
        OutcomeTally {
            full,
            degraded,
            dropped,
        }
    }

    #[test]
    fn tally_from_outcomes() {
        let t = OutcomeTally::from_outcomes([
            SceneOutcome::Full,
            SceneOutcome::Degraded,
            SceneOutcome::Full,
            SceneOutcome::Dropped,
        ]);
        assert_eq!(t, tally(2, 1, 1));
        assert_eq!(t.surviving(), 3);
    }

    #[test]
    fn two_of_five_above_twenty_percent_aborts() {
        let reason = drop_threshold_violation(&tally(3, 0, 2), 0.2).unwrap();
        assert!(reason.contains("2 of 5"));
        assert!(reason.contains("40.0%"));
    }

    #[test]
    fn exactly_at_threshold_proceeds() {
        assert_eq!(drop_threshold_violation(&tally(4, 0, 1), 0.2), None);
    }

    #[test]
    fn zero_threshold_rejects_any_drop() {
        assert!(drop_threshold_violation(&tally(9, 0, 1), 0.0).is_some());
        assert!(drop_threshold_violation(&tally(9, 1, 0), 0.0).is_none());
    }

    #[test]
    fn nothing_surviving_always_aborts() {
        assert!(drop_threshold_violation(&tally(0, 0, 3), 1.0).is_some());
        assert!(drop_threshold_violation(&tally(0, 0, 0), 1.0).is_some());
    }

    #[test]
    fn threshold_validation() {
        assert!(validate_drop_threshold(0.25).is_ok());
        assert!(validate_drop_threshold(-0.1).is_err());
        assert!(validate_drop_threshold(1.5).is_err());
        assert!(validate_drop_threshold(f64::NAN).is_err());
    }
}

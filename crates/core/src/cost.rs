//! Per-run usage ledger and pricing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unit prices for billable collaborator work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostRates {
    pub per_narration_char: f64,
    pub per_image: f64,
    pub per_render_sec: f64,
}

/// Usage counters accumulated during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLedger {
    pub narration_chars: u64,
    pub images_generated: u64,
    pub rendered_us: u64,
}

impl CostLedger {
    pub fn add_narration(&mut self, text: &str) {
        self.narration_chars += text.chars().count() as u64;
    }

    pub fn add_image(&mut self) {
        self.images_generated += 1;
    }

    pub fn add_render(&mut self, duration: Duration) {
        self.rendered_us += duration.as_micros() as u64;
    }

    pub fn merge(&mut self, other: &CostLedger) {
        self.narration_chars += other.narration_chars;
        self.images_generated += other.images_generated;
        self.rendered_us += other.rendered_us;
    }

    /// Price the ledger.
    pub fn price(&self, rates: &CostRates) -> CostSummary {
        let rendered_secs = self.rendered_us as f64 / 1_000_000.0;
        let narration_cost = self.narration_chars as f64 * rates.per_narration_char;
        let image_cost = self.images_generated as f64 * rates.per_image;
        let render_cost = rendered_secs * rates.per_render_sec;
        CostSummary {
            narration_chars: self.narration_chars,
            images_generated: self.images_generated,
            rendered_secs,
            narration_cost,
            image_cost,
            render_cost,
            total: narration_cost + image_cost + render_cost,
        }
    }
}

/// Priced ledger as written to the run metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub narration_chars: u64,
    pub images_generated: u64,
    pub rendered_secs: f64,
    pub narration_cost: f64,
    pub image_cost: f64,
    pub render_cost: f64,
    pub total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_accumulates_and_prices() {
        let mut ledger = CostLedger::default();
        ledger.add_narration("héllo");
        ledger.add_image();
        ledger.add_image();
        ledger.add_render(Duration::from_millis(2500));

        let rates = CostRates {
            per_narration_char: 0.01,
            per_image: 0.5,
            per_render_sec: 0.1,
        };
        let summary = ledger.price(&rates);
        assert_eq!(summary.narration_chars, 5);
        assert!((summary.narration_cost - 0.05).abs() < 1e-9);
        assert!((summary.image_cost - 1.0).abs() < 1e-9);
        assert!((summary.render_cost - 0.25).abs() < 1e-9);
        assert!((summary.total - 1.30).abs() < 1e-9);
    }

    #[test]
    fn zero_rates_cost_nothing() {
        let mut ledger = CostLedger::default();
        ledger.add_narration("anything");
        assert_eq!(ledger.price(&CostRates::default()).total, 0.0);
    }

    #[test]
    fn merge_sums_counters() {
        let mut a = CostLedger {
            narration_chars: 3,
            images_generated: 1,
            rendered_us: 10,
        };
        a.merge(&CostLedger {
            narration_chars: 2,
            images_generated: 0,
            rendered_us: 5,
        });
        assert_eq!(a.narration_chars, 5);
        assert_eq!(a.rendered_us, 15);
    }
}

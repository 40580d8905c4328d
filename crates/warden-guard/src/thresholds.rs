//! Process-wide adaptive thresholds

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_types::{CheckSet, UserMessageStats};

use crate::config::GuardConfig;

/// Current detector thresholds. Not persisted; every restart begins at the
/// configured defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlobalThresholds {
    pub digit_ratio: f64,
    pub min_entropy: f64,
}

impl Default for GlobalThresholds {
    fn default() -> Self {
        Self::from_config(&GuardConfig::default())
    }
}

impl GlobalThresholds {
    pub fn from_config(config: &GuardConfig) -> Self {
        Self {
            digit_ratio: config.digit_ratio.default,
            min_entropy: config.min_entropy.default,
        }
    }
}

/// Nudges the global thresholds from a member's feedback score while
/// decaying them back toward their defaults.
#[derive(Debug, Clone)]
pub struct ThresholdAdapter {
    config: GuardConfig,
}

impl ThresholdAdapter {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Feedback-driven step, bounded by `gain * 5 * tanh(1)` in magnitude.
    pub fn adjustment(&self, feedback: f64) -> f64 {
        self.config.feedback_gain * feedback * (feedback.abs() / 5.0).tanh()
    }

    /// Fraction of the old value kept after `elapsed_secs`.
    pub fn decay(&self, elapsed_secs: Option<f64>) -> f64 {
        match elapsed_secs {
            Some(dt) => (-dt.max(0.0) / self.config.decay_secs).exp(),
            None => 0.0,
        }
    }

    /// Apply one adjustment step for the enabled checks.
    ///
    /// Returns `false` without touching anything when neither the digit
    /// ratio nor the entropy check is enabled.
    pub fn adjust(
        &self,
        thresholds: &mut GlobalThresholds,
        stats: &mut UserMessageStats,
        checks: &CheckSet,
        now: DateTime<Utc>,
    ) -> bool {
        if !checks.digit_ratio && !checks.entropy {
            return false;
        }

        let feedback = stats.feedback_score;
        let elapsed = stats
            .last_threshold_adjustment
            .map(|last| (now - last).num_milliseconds() as f64 / 1000.0);
        let adjustment = self.adjustment(feedback);
        let decay = self.decay(elapsed);

        let step = |old: f64, bounds: &crate::config::ThresholdBounds| {
            bounds.clamp(old + adjustment + (bounds.default - old) * (1.0 - decay))
        };

        if checks.digit_ratio {
            thresholds.digit_ratio = step(thresholds.digit_ratio, &self.config.digit_ratio);
        }
        if checks.entropy {
            thresholds.min_entropy = step(thresholds.min_entropy, &self.config.min_entropy);
        }
        stats.last_threshold_adjustment = Some(now);

        debug!(
            feedback,
            adjustment,
            decay,
            digit_ratio = thresholds.digit_ratio,
            min_entropy = thresholds.min_entropy,
            "Thresholds adjusted"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn adapter() -> ThresholdAdapter {
        ThresholdAdapter::new(GuardConfig::default())
    }

    #[test]
    fn test_first_adjustment_fully_decays() {
        let adapter = adapter();
        let mut thresholds = GlobalThresholds {
            digit_ratio: 0.75,
            min_entropy: 3.0,
        };
        let mut stats = UserMessageStats::default();
        assert!(adapter.adjust(&mut thresholds, &mut stats, &CheckSet::default(), Utc::now()));
        assert_eq!(thresholds, GlobalThresholds::default());
        assert!(stats.last_threshold_adjustment.is_some());
    }

    #[test]
    fn test_disabled_checks_are_left_alone() {
        let adapter = adapter();
        let mut thresholds = GlobalThresholds {
            digit_ratio: 0.75,
            min_entropy: 3.0,
        };
        let mut stats = UserMessageStats::default();
        let checks = CheckSet {
            entropy: false,
            ..CheckSet::default()
        };
        adapter.adjust(&mut thresholds, &mut stats, &checks, Utc::now());
        assert_eq!(thresholds.min_entropy, 3.0);
        assert_eq!(thresholds.digit_ratio, 0.5);

        let mut untouched = UserMessageStats::default();
        assert!(!adapter.adjust(&mut thresholds, &mut untouched, &CheckSet::none(), Utc::now()));
        assert!(untouched.last_threshold_adjustment.is_none());
    }

    #[test]
    fn test_max_feedback_converges_near_default() {
        let adapter = adapter();
        let bound = adapter.adjustment(5.0);
        assert!(bound > 0.0 && bound < 0.05);

        let mut thresholds = GlobalThresholds::default();
        let mut stats = UserMessageStats {
            feedback_score: 5.0,
            ..Default::default()
        };
        let mut now = Utc::now();
        for _ in 0..200 {
            adapter.adjust(&mut thresholds, &mut stats, &CheckSet::default(), now);
            now += Duration::seconds(3600);
        }

        // Fixed point of x = x + a + (d - x)(1 - k) is d + a / (1 - k).
        let keep = adapter.decay(Some(3600.0));
        let lift = bound / (1.0 - keep);
        assert!((thresholds.digit_ratio - (0.5 + lift)).abs() < 1e-9);
        assert!((thresholds.min_entropy - (1.5 + lift)).abs() < 1e-9);
        assert!(lift > 0.0 && lift < 0.1);
    }

    proptest! {
        #[test]
        fn prop_thresholds_stay_in_bounds(
            feedback in -5.0f64..=5.0,
            gaps in proptest::collection::vec(0i64..20_000, 1..50),
            start_ratio in 0.1f64..=1.0,
            start_entropy in 0.0f64..=4.0,
        ) {
            let adapter = adapter();
            let mut thresholds = GlobalThresholds { digit_ratio: start_ratio, min_entropy: start_entropy };
            let mut stats = UserMessageStats { feedback_score: feedback, ..Default::default() };
            let mut now = Utc::now();
            for gap in gaps {
                now += Duration::seconds(gap);
                adapter.adjust(&mut thresholds, &mut stats, &CheckSet::default(), now);
                prop_assert!((0.1..=1.0).contains(&thresholds.digit_ratio));
                prop_assert!((0.0..=4.0).contains(&thresholds.min_entropy));
            }
        }
    }
}

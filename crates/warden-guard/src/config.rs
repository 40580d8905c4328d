//! Guard configuration.
//!
//! Defines the detector limits and the bounds the adaptive thresholds are
//! kept inside.

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};

/// Clamp range and resting value of one adaptive threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBounds {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl ThresholdBounds {
    pub const fn new(min: f64, max: f64, default: f64) -> Self {
        Self { min, max, default }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    fn validate(&self, name: &'static str) -> GuardResult<()> {
        let ordered = self.min <= self.default && self.default <= self.max;
        if !ordered || !self.min.is_finite() || !self.max.is_finite() {
            return Err(GuardError::InvalidBounds {
                name,
                min: self.min,
                default: self.default,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// Configuration for the anomaly detector and threshold adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Identical consecutive messages before repetition fires.
    #[serde(default = "default_max_repeated")]
    pub max_repeated_messages: u32,

    /// Digit fraction above which a message is flagged.
    #[serde(default = "default_digit_ratio")]
    pub digit_ratio: ThresholdBounds,

    /// Minimum Shannon entropy (bits per character).
    #[serde(default = "default_entropy")]
    pub min_entropy: ThresholdBounds,

    /// Scale of a single feedback-driven adjustment.
    #[serde(default = "default_feedback_gain")]
    pub feedback_gain: f64,

    /// Time constant of the decay back toward defaults.
    #[serde(default = "default_decay_secs")]
    pub decay_secs: f64,
}

fn default_max_repeated() -> u32 {
    3
}

fn default_digit_ratio() -> ThresholdBounds {
    ThresholdBounds::new(0.1, 1.0, 0.5)
}

fn default_entropy() -> ThresholdBounds {
    ThresholdBounds::new(0.0, 4.0, 1.5)
}

fn default_feedback_gain() -> f64 {
    0.01
}

fn default_decay_secs() -> f64 {
    3600.0
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_repeated_messages: default_max_repeated(),
            digit_ratio: default_digit_ratio(),
            min_entropy: default_entropy(),
            feedback_gain: default_feedback_gain(),
            decay_secs: default_decay_secs(),
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> GuardResult<()> {
        self.digit_ratio.validate("digit_ratio")?;
        self.min_entropy.validate("min_entropy")?;
        if self.max_repeated_messages == 0 {
            return Err(GuardError::InvalidConfig(
                "max_repeated_messages must be at least 1".into(),
            ));
        }
        if !(self.decay_secs > 0.0) {
            return Err(GuardError::InvalidConfig("decay_secs must be positive".into()));
        }
        Ok(())
    }
}

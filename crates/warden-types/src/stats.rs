//! Per-member message statistics

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MemberId;

/// Lower bound of the feedback score.
pub const FEEDBACK_MIN: f64 = -5.0;

/// Upper bound of the feedback score.
pub const FEEDBACK_MAX: f64 = 5.0;

/// Rolling message statistics for a monitored member.
///
/// Created lazily on the first monitored message and only dropped by the
/// periodic cleanup sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserMessageStats {
    /// Message times inside the rolling window, oldest first.
    pub message_timestamps: Vec<DateTime<Utc>>,

    pub invalid_message_count: u32,

    /// Clamped to `[FEEDBACK_MIN, FEEDBACK_MAX]`.
    pub feedback_score: f64,

    /// Consecutive valid messages since the last violation.
    #[serde(alias = "recovery_streaks")]
    pub recovery_streak: u32,

    /// When this member last nudged the global thresholds.
    pub last_threshold_adjustment: Option<DateTime<Utc>>,

    pub last_message: String,
    pub repetition_count: u32,
}

impl Default for UserMessageStats {
    fn default() -> Self {
        Self {
            message_timestamps: Vec::new(),
            invalid_message_count: 0,
            feedback_score: 0.0,
            recovery_streak: 0,
            last_threshold_adjustment: None,
            last_message: String::new(),
            repetition_count: 0,
        }
    }
}

impl UserMessageStats {
    /// Append `now` and drop timestamps that fell out of `window`.
    pub fn record_message(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        self.message_timestamps.push(now);
        self.message_timestamps.retain(|t| *t > cutoff);
    }

    /// Messages in the window that were not flagged.
    pub fn valid_message_count(&self) -> i64 {
        self.message_timestamps.len() as i64 - i64::from(self.invalid_message_count)
    }

    /// Apply a signed delta to the feedback score, keeping it in bounds.
    pub fn nudge_feedback(&mut self, delta: f64) {
        self.feedback_score = (self.feedback_score + delta).clamp(FEEDBACK_MIN, FEEDBACK_MAX);
    }
}

/// The `user-stats` document.
pub type StatsBook = BTreeMap<MemberId, UserMessageStats>;

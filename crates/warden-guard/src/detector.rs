//! Per-message anomaly scoring

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use warden_types::{CheckSet, UserMessageStats};

use crate::thresholds::GlobalThresholds;

const CJK_DIGIT_FACTOR: f64 = 1.5;
const CJK_ENTROPY_FACTOR: f64 = 0.7;
const CJK_LENGTH_FACTOR: f64 = 0.8;

/// A reason a message was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    MessageRepetition,
    ExcessiveDigits,
    LowEntropy,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Violation::MessageRepetition => "message_repetition",
            Violation::ExcessiveDigits => "excessive_digits",
            Violation::LowEntropy => "low_entropy",
        })
    }
}

/// CJK Unified Ideographs and Extension A.
pub fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

/// ASCII and fullwidth decimal digits. Vulgar fractions, roman numerals and
/// other numeric symbols are not digits.
pub fn is_decimal_digit(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '\u{FF10}'..='\u{FF19}')
}

/// Shannon entropy in bits over character frequencies.
pub fn shannon_entropy(text: &str) -> f64 {
    let mut freqs: HashMap<char, usize> = HashMap::new();
    let mut len = 0usize;
    for c in text.chars() {
        *freqs.entry(c).or_default() += 1;
        len += 1;
    }
    if len == 0 {
        return 0.0;
    }
    let len = len as f64;
    freqs
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Scores one message against the enabled checks.
///
/// Stateless apart from the per-member stats record it is handed.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    max_repeated_messages: u32,
}

impl AnomalyDetector {
    pub fn new(max_repeated_messages: u32) -> Self {
        Self {
            max_repeated_messages,
        }
    }

    pub fn evaluate(
        &self,
        text: &str,
        stats: &mut UserMessageStats,
        thresholds: &GlobalThresholds,
        checks: &CheckSet,
    ) -> BTreeSet<Violation> {
        let shape = Shape::of(text);
        let mut violations = BTreeSet::new();

        if checks.repetition && self.check_repetition(text, stats) {
            violations.insert(Violation::MessageRepetition);
        }
        if checks.digit_ratio && shape.digit_ratio_exceeds(thresholds.digit_ratio) {
            violations.insert(Violation::ExcessiveDigits);
        }
        if checks.entropy && shape.entropy_below(text, thresholds.min_entropy) {
            violations.insert(Violation::LowEntropy);
        }
        if checks.feedback {
            stats.nudge_feedback(-(violations.len() as f64));
        }

        violations
    }

    fn check_repetition(&self, text: &str, stats: &mut UserMessageStats) -> bool {
        if stats.last_message == text {
            stats.repetition_count += 1;
            return stats.repetition_count >= self.max_repeated_messages;
        }
        stats.repetition_count = 0;
        stats.last_message = text.to_string();
        false
    }
}

struct Shape {
    len: usize,
    digits: usize,
    cjk: bool,
}

impl Shape {
    fn of(text: &str) -> Self {
        let mut shape = Shape {
            len: 0,
            digits: 0,
            cjk: false,
        };
        for c in text.chars() {
            shape.len += 1;
            if is_decimal_digit(c) {
                shape.digits += 1;
            }
            shape.cjk |= is_cjk(c);
        }
        shape
    }

    fn digit_ratio_exceeds(&self, threshold: f64) -> bool {
        if self.len == 0 {
            return false;
        }
        let factor = if self.cjk { CJK_DIGIT_FACTOR } else { 1.0 };
        self.digits as f64 / self.len as f64 > threshold * factor
    }

    fn entropy_below(&self, text: &str, min_entropy: f64) -> bool {
        if self.len == 0 {
            return false;
        }
        let (base_factor, length_factor) = if self.cjk {
            (CJK_ENTROPY_FACTOR, CJK_LENGTH_FACTOR)
        } else {
            (1.0, 1.0)
        };
        let base = min_entropy * base_factor;
        let length_adjustment = ((self.len.max(2) as f64).log2() / 10.0) * length_factor;
        shannon_entropy(text) < base.max(2.0 - length_adjustment)
    }
}

//! Runtime-togglable monitoring settings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single message quality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Repetition,
    DigitRatio,
    Entropy,
    Feedback,
}

impl CheckKind {
    pub const ALL: [CheckKind; 4] = [
        CheckKind::Repetition,
        CheckKind::DigitRatio,
        CheckKind::Entropy,
        CheckKind::Feedback,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CheckKind::Repetition => "repetition",
            CheckKind::DigitRatio => "digit_ratio",
            CheckKind::Entropy => "entropy",
            CheckKind::Feedback => "feedback",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which checks are enabled. All are on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSet {
    pub repetition: bool,
    pub digit_ratio: bool,
    pub entropy: bool,
    pub feedback: bool,
}

impl Default for CheckSet {
    fn default() -> Self {
        Self {
            repetition: true,
            digit_ratio: true,
            entropy: true,
            feedback: true,
        }
    }
}

impl CheckSet {
    pub fn none() -> Self {
        Self {
            repetition: false,
            digit_ratio: false,
            entropy: false,
            feedback: false,
        }
    }

    pub fn is_enabled(&self, kind: CheckKind) -> bool {
        match kind {
            CheckKind::Repetition => self.repetition,
            CheckKind::DigitRatio => self.digit_ratio,
            CheckKind::Entropy => self.entropy,
            CheckKind::Feedback => self.feedback,
        }
    }

    pub fn set(&mut self, kind: CheckKind, enabled: bool) {
        let slot = match kind {
            CheckKind::Repetition => &mut self.repetition,
            CheckKind::DigitRatio => &mut self.digit_ratio,
            CheckKind::Entropy => &mut self.entropy,
            CheckKind::Feedback => &mut self.feedback,
        };
        *slot = enabled;
    }
}

/// Target of a `toggleSetting` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    Monitoring,
    Check(CheckKind),
}

impl Setting {
    /// Human readable label used in confirmations.
    pub fn label(self) -> &'static str {
        match self {
            Setting::Monitoring => "Message Monitoring",
            Setting::Check(CheckKind::Repetition) => "Message Repetition",
            Setting::Check(CheckKind::DigitRatio) => "Digit Ratio",
            Setting::Check(CheckKind::Entropy) => "Message Entropy",
            Setting::Check(CheckKind::Feedback) => "Feedback System",
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Monitoring => f.write_str("monitoring"),
            Setting::Check(kind) => kind.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown setting: {0:?}")]
pub struct UnknownSetting(pub String);

impl FromStr for Setting {
    type Err = UnknownSetting;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "monitoring" => Ok(Setting::Monitoring),
            "repetition" => Ok(Setting::Check(CheckKind::Repetition)),
            "digit_ratio" => Ok(Setting::Check(CheckKind::DigitRatio)),
            "entropy" => Ok(Setting::Check(CheckKind::Entropy)),
            "feedback" => Ok(Setting::Check(CheckKind::Feedback)),
            _ => Err(UnknownSetting(s.to_string())),
        }
    }
}

/// Live monitor switches. Not persisted; monitoring starts disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub monitoring: bool,
    pub checks: CheckSet,
}

impl MonitorSettings {
    pub fn apply(&mut self, setting: Setting, enabled: bool) {
        match setting {
            Setting::Monitoring => self.monitoring = enabled,
            Setting::Check(kind) => self.checks.set(kind, enabled),
        }
    }

    /// Threshold adaptation needs both monitoring and the feedback check.
    pub fn adapts_thresholds(&self) -> bool {
        self.monitoring && self.checks.feedback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setting() {
        assert_eq!("monitoring".parse::<Setting>().unwrap(), Setting::Monitoring);
        assert_eq!(
            "Digit Ratio".parse::<Setting>().unwrap(),
            Setting::Check(CheckKind::DigitRatio)
        );
        assert!("volume".parse::<Setting>().is_err());
    }

    #[test]
    fn test_defaults_and_toggle() {
        let mut settings = MonitorSettings::default();
        assert!(!settings.monitoring);
        assert!(CheckKind::ALL.iter().all(|k| settings.checks.is_enabled(*k)));
        assert!(!settings.adapts_thresholds());

        settings.apply(Setting::Monitoring, true);
        assert!(settings.adapts_thresholds());
        settings.apply(Setting::Check(CheckKind::Feedback), false);
        assert!(!settings.adapts_thresholds());
    }
}

//! Warden Guard - Message quality checks
//!
//! The [`AnomalyDetector`] flags repeated, digit-heavy and low-entropy
//! messages. The [`ThresholdAdapter`] moves the shared thresholds with
//! member feedback and lets them relax back to their defaults over time.

#![deny(unsafe_code)]

pub mod config;
pub mod detector;
pub mod error;
pub mod thresholds;

pub use config::{GuardConfig, ThresholdBounds};
pub use detector::{is_cjk, is_decimal_digit, shannon_entropy, AnomalyDetector, Violation};
pub use error::{GuardError, GuardResult};
pub use thresholds::{GlobalThresholds, ThresholdAdapter};

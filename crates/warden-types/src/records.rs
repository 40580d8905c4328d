//! Persisted incarceration records
//!
//! The persisted document is authoritative; in-memory copies are caches that
//! are refreshed on every reconciliation pass.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{MemberId, RoleId};

/// Restriction record for one incarcerated member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncarcerationRecord {
    /// Release deadline in epoch seconds.
    #[serde(rename = "release_time", deserialize_with = "epoch_seconds")]
    pub release_at: i64,

    /// Watched roles held before the restriction, restored on release.
    #[serde(rename = "original_roles", default)]
    pub original_roles: Vec<RoleId>,
}

impl IncarcerationRecord {
    pub fn new(release_at: DateTime<Utc>, original_roles: Vec<RoleId>) -> Self {
        Self {
            release_at: release_at.timestamp(),
            original_roles,
        }
    }

    /// Release deadline as a timestamp.
    pub fn release_time(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.release_at, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Seconds until the deadline; zero or negative once due.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        self.release_at - now.timestamp()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.remaining_secs(now) <= 0
    }
}

/// The `incarceration-records` document.
pub type IncarcerationBook = BTreeMap<MemberId, IncarcerationRecord>;

/// Older documents wrote the deadline as a (possibly fractional) string.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct EpochVisitor;

    impl<'de> Visitor<'de> for EpochVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("epoch seconds as a number or numeric string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom("epoch seconds out of range"))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            Ok(v as i64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            let v = v.trim();
            v.parse::<i64>()
                .or_else(|_| v.parse::<f64>().map(|f| f as i64))
                .map_err(|_| E::custom(format!("invalid epoch seconds: {v:?}")))
        }
    }

    deserializer.deserialize_any(EpochVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_due_and_remaining() {
        let now = Utc::now();
        let record = IncarcerationRecord::new(now + Duration::seconds(90), vec![]);
        assert_eq!(record.remaining_secs(now), 90);
        assert!(!record.is_due(now));
        assert!(record.is_due(now + Duration::seconds(90)));
    }

    #[test]
    fn test_reads_legacy_string_deadline() {
        let json = r#"{"42": {"release_time": "1700000000.7", "original_roles": [1, 2]}}"#;
        let book: IncarcerationBook = serde_json::from_str(json).unwrap();
        let record = &book[&MemberId::new(42)];
        assert_eq!(record.release_at, 1_700_000_000);
        assert_eq!(record.original_roles, vec![RoleId::new(1), RoleId::new(2)]);
    }

    #[test]
    fn test_writes_numeric_deadline() {
        let record = IncarcerationRecord {
            release_at: 10,
            original_roles: vec![RoleId::new(3)],
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["release_time"], 10);
        assert_eq!(json["original_roles"][0], 3);
    }
}

//! Strongly-typed identifiers for platform entities
//!
//! The chat platform hands out 64-bit snowflake ids for members, roles and
//! channels. They are wrapped in newtypes so a role id can never be passed
//! where a member id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when an identifier cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} id: {input:?}")]
pub struct ParseIdError {
    pub kind: &'static str,
    pub input: String,
}

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                let digits = trimmed
                    .strip_prefix(concat!($prefix, ":"))
                    .unwrap_or(trimmed);
                digits.parse::<u64>().map(Self).map_err(|_| ParseIdError {
                    kind: $prefix,
                    input: s.to_string(),
                })
            }
        }
    };
}

snowflake_id!(
    /// Platform user id; the primary key of every per-member record.
    MemberId,
    "member"
);

snowflake_id!(
    /// Role id in the community's role directory.
    RoleId,
    "role"
);

snowflake_id!(
    /// Id of a vetting review thread.
    ThreadId,
    "thread"
);

snowflake_id!(
    /// Id of a text channel or forum post messages can be sent to.
    ChannelId,
    "channel"
);

impl MemberId {
    /// Parse either a bare id or a user mention (`<@123>` / `<@!123>`).
    pub fn parse_mention(s: &str) -> Result<Self, ParseIdError> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix("<@")
            .and_then(|rest| rest.strip_suffix('>'))
            .map(|rest| rest.trim_start_matches('!'));
        match inner {
            Some(digits) => digits.parse::<u64>().map(Self).map_err(|_| ParseIdError {
                kind: "member",
                input: s.to_string(),
            }),
            None => trimmed.parse(),
        }
    }

    /// Mention markup understood by the chat platform.
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

impl RoleId {
    pub fn mention(self) -> String {
        format!("<@&{}>", self.0)
    }
}

impl From<ThreadId> for ChannelId {
    fn from(thread: ThreadId) -> Self {
        ChannelId(thread.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_member_id_display() {
        let id = MemberId::new(42);
        assert_eq!(id.to_string(), "member:42");
        assert_eq!(id.mention(), "<@42>");
    }

    #[test]
    fn test_parse_prefixed_and_bare() {
        assert_eq!("role:7".parse::<RoleId>().unwrap(), RoleId::new(7));
        assert_eq!(" 7 ".parse::<RoleId>().unwrap(), RoleId::new(7));
        assert!("seven".parse::<RoleId>().is_err());
    }

    #[test]
    fn test_parse_mention() {
        assert_eq!(MemberId::parse_mention("<@!99>").unwrap(), MemberId::new(99));
        assert_eq!(MemberId::parse_mention("<@99>").unwrap(), MemberId::new(99));
        assert_eq!(MemberId::parse_mention("99").unwrap(), MemberId::new(99));
        assert!(MemberId::parse_mention("<@abc>").is_err());
    }

    #[test]
    fn test_ids_as_json_map_keys() {
        let mut map = BTreeMap::new();
        map.insert(MemberId::new(1150630510696075404), 1u8);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"1150630510696075404":1}"#);
        let back: BTreeMap<MemberId, u8> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    proptest::proptest! {
        #[test]
        fn prop_mentions_parse_back(raw in proptest::prelude::any::<u64>()) {
            let id = MemberId::new(raw);
            proptest::prop_assert_eq!(MemberId::parse_mention(&id.mention()).unwrap(), id);
            proptest::prop_assert_eq!(id.to_string().parse::<MemberId>().unwrap(), id);
        }
    }
}

//! Warden Types - Core types for community moderation automation
//!
//! Warden vets new members through multi-reviewer voting, temporarily
//! restricts ("incarcerates") members with timed release, and watches
//! message quality to gate role promotion.
//!
//! ## Key Concepts
//!
//! - **MemberId / RoleId**: platform snowflake ids, never interchangeable
//! - **IncarcerationRecord**: release deadline plus the roles to restore
//! - **UserMessageStats**: rolling per-member message bookkeeping
//! - **RoleCatalog / CustomRoles**: persisted role configuration
//! - **Events**: every user-visible outcome, forwarded to the audit log

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod catalog;
pub mod events;
pub mod ids;
pub mod records;
pub mod settings;
pub mod stats;
pub mod vote;

// Re-export main types
pub use catalog::{split_role_names, CategoryConflict, CustomRoles, RoleCatalog};
pub use events::{EventSeverity, EventSource, WardenEvent, WardenEventEnvelope};
pub use ids::{ChannelId, MemberId, ParseIdError, RoleId, ThreadId};
pub use records::{IncarcerationBook, IncarcerationRecord};
pub use settings::{CheckKind, CheckSet, MonitorSettings, Setting, UnknownSetting};
pub use stats::{StatsBook, UserMessageStats, FEEDBACK_MAX, FEEDBACK_MIN};
pub use vote::{RoleAction, VoteKind};

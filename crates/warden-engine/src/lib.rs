//! Warden Engine - Member state transition engine
//!
//! Four moving parts share one member's role set:
//!
//! - **Vetting**: reviewers vote on applicants; a quorum moves roles
//! - **Incarceration**: timed restriction with automatic release
//! - **Monitor**: message quality scoring that gates activity promotion
//! - **Role sync**: every role change is verified against the directory
//!
//! All of them serialize on a per-member lock and persist through
//! [`warden_store::Documents`]. [`Engine`] is the single entry point.

#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod custom_roles;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod incarceration;
pub mod ledger;
pub mod locks;
pub mod monitor;
pub mod sync;
pub mod vetting;
pub mod vetting_roles;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    EngineConfig, IncarcerationConfig, LockConfig, MonitorConfig, RoleLayout, SyncConfig,
    VettingConfig,
};
pub use custom_roles::CustomRoleRegistry;
pub use directory::{
    Directory, DirectoryError, DirectoryResult, InMemoryDirectory, MemberSnapshot, RoleInfo,
};
pub use engine::{Engine, LoadSummary, ShutdownReport};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use events::EventBus;
pub use incarceration::{parse_duration, IncarcerationScheduler, ReconcileReport};
pub use ledger::{ApprovalLedger, ApprovalRecord, Tally};
pub use locks::{MemberGuard, MemberLocks};
pub use monitor::{CleanupReport, InboundMessage, MessageMonitor, MessageVerdict};
pub use sync::{RoleDelta, RoleSynchronizer, SyncOutcome};
pub use vetting::{VettingService, VoteOutcome};
pub use vetting_roles::{RoleSelection, VettingRoleService};

//! Error types for the engine.
//!
//! Every variant maps onto one [`ErrorKind`]; callers use the kind to decide
//! whether to retry, and [`EngineError::user_message`] for what to show.

use thiserror::Error;
use warden_store::StoreError;
use warden_types::{MemberId, RoleId, ThreadId};

use crate::directory::DirectoryError;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; retrying the same request fails again.
    Validation,
    /// The request contradicts current state.
    Conflict,
    /// The remote directory misbehaved; state was not advanced.
    RemoteTransient,
    /// A document could not be read or written.
    Persistence,
    /// Anything else.
    Fatal,
}

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid duration {0:?}: use tokens like 1d, 2h or 30m")]
    MalformedDuration(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("{} has already voted on this review", .reviewer.mention())]
    DuplicateVote { reviewer: MemberId },

    #[error("the rejection window of {days} days after approval has closed")]
    RejectionWindowClosed { days: i64 },

    #[error("{} has not been approved yet and cannot be rejected", .0.mention())]
    NotApproved(MemberId),

    #[error("{} already has the electoral role", .0.mention())]
    AlreadyApproved(MemberId),

    #[error("role conflict in category {category}: member already has {existing} role(s) and is attempting to add {adding}")]
    CategoryConflict {
        category: String,
        existing: usize,
        adding: usize,
    },

    #[error("role {} is outside the assignable set", .0.mention())]
    RoleNotAssignable(RoleId),

    #[error("nothing to change: {0}")]
    NothingChanged(String),

    #[error("{} is not incarcerated", .0.mention())]
    NotIncarcerated(MemberId),

    #[error("member {} was not found", .0.mention())]
    MemberNotFound(MemberId),

    #[error("no applicant is known for review thread {}", .0.get())]
    UnknownThread(ThreadId),

    #[error("role update for {} could not be verified after {attempts} attempts", .member.mention())]
    RoleSyncFailed { member: MemberId, attempts: u32 },

    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MalformedDuration(_)
            | EngineError::UnknownRole(_)
            | EngineError::DuplicateVote { .. }
            | EngineError::RejectionWindowClosed { .. }
            | EngineError::NotApproved(_)
            | EngineError::RoleNotAssignable(_)
            | EngineError::NothingChanged(_)
            | EngineError::NotIncarcerated(_)
            | EngineError::MemberNotFound(_)
            | EngineError::UnknownThread(_) => ErrorKind::Validation,

            EngineError::AlreadyApproved(_) | EngineError::CategoryConflict { .. } => {
                ErrorKind::Conflict
            }

            EngineError::RoleSyncFailed { .. } => ErrorKind::RemoteTransient,
            EngineError::Directory(e) if e.is_transient() => ErrorKind::RemoteTransient,
            EngineError::Directory(_) => ErrorKind::Fatal,

            EngineError::Store(_) => ErrorKind::Persistence,
            EngineError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Text suitable for the person who issued the command.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Fatal => {
                "An unexpected error occurred. The incident has been logged.".to_string()
            }
            ErrorKind::Persistence => {
                "The change could not be saved. Please try again later.".to_string()
            }
            ErrorKind::RemoteTransient => format!("{self}. Please try again shortly."),
            ErrorKind::Validation | ErrorKind::Conflict => {
                let mut text = self.to_string();
                if let Some(first) = text.get(..1) {
                    let upper = first.to_uppercase();
                    text.replace_range(..1, &upper);
                }
                text.push('.');
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            EngineError::MalformedDuration("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            EngineError::AlreadyApproved(MemberId::new(1)).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            EngineError::RoleSyncFailed {
                member: MemberId::new(1),
                attempts: 3
            }
            .kind(),
            ErrorKind::RemoteTransient
        );
        assert_eq!(
            EngineError::Internal("boom".into()).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_user_messages() {
        let msg = EngineError::AlreadyApproved(MemberId::new(7)).user_message();
        assert_eq!(msg, "<@7> already has the electoral role.");

        let msg = EngineError::Internal("secret detail".into()).user_message();
        assert!(!msg.contains("secret"));

        let msg = EngineError::UnknownRole("chess".into()).user_message();
        assert_eq!(msg, "Unknown role: chess.");
    }
}

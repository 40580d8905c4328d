//! Event types for moderation outcomes
//!
//! Every user-visible outcome of the engine is published as a
//! [`WardenEvent`]. The daemon forwards them to the audit-log channel; the
//! `Display` impl renders the line that gets posted there.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{MemberId, RoleId, ThreadId};
use crate::settings::Setting;
use crate::vote::{RoleAction, VoteKind};

/// Envelope wrapping all engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    pub source: EventSource,
    pub severity: EventSeverity,

    /// Moderator or reviewer who triggered the event, if any
    pub actor: Option<MemberId>,

    pub event: WardenEvent,
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Review voting
    Vetting,
    /// Restriction and release
    Incarceration,
    /// Message quality monitor
    Monitor,
    /// Role catalog and custom roles
    Roles,
    /// Background sweeps
    Scheduler,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WardenEvent {
    // ═══════════════════════════════════════════════════════════════════
    // VETTING EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A review thread was taken in and needs reviewer attention
    ReviewOpened {
        thread_id: ThreadId,
        applicant: MemberId,
    },

    /// A vote was counted but no quorum was reached yet
    VoteRecorded {
        thread_id: ThreadId,
        member_id: MemberId,
        reviewer: MemberId,
        kind: VoteKind,
        remaining: u32,
    },

    MemberApproved {
        thread_id: ThreadId,
        member_id: MemberId,
        reviewers: Vec<MemberId>,
    },

    MemberRejected {
        thread_id: ThreadId,
        member_id: MemberId,
        reviewers: Vec<MemberId>,
    },

    /// The review controls should be redrawn with the new tallies
    ReviewRefreshed {
        thread_id: ThreadId,
        approvals: u32,
        rejections: u32,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INCARCERATION EVENTS
    // ═══════════════════════════════════════════════════════════════════
    MemberIncarcerated {
        member_id: MemberId,
        release_at: i64,
    },

    MemberReleased {
        member_id: MemberId,
        restored: Vec<RoleId>,
    },

    /// A scheduled release failed; the record was dropped anyway
    ReleaseFailed {
        member_id: MemberId,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // MONITOR EVENTS
    // ═══════════════════════════════════════════════════════════════════
    MemberPromoted {
        member_id: MemberId,
        valid_messages: i64,
    },

    /// A member holding the missing role spoke again
    MemberConverted {
        member_id: MemberId,
    },

    InvalidMessage {
        member_id: MemberId,
        violations: Vec<String>,
    },

    StatsCleaned {
        processed: usize,
        removed: usize,
    },

    SettingToggled {
        setting: Setting,
        enabled: bool,
    },

    // ═══════════════════════════════════════════════════════════════════
    // ROLE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    VettingRolesChanged {
        member_id: MemberId,
        action: RoleAction,
        roles: Vec<RoleId>,
    },

    CustomRolesChanged {
        action: RoleAction,
        names: Vec<String>,
    },
}

impl WardenEvent {
    pub fn source(&self) -> EventSource {
        match self {
            WardenEvent::ReviewOpened { .. }
            | WardenEvent::VoteRecorded { .. }
            | WardenEvent::MemberApproved { .. }
            | WardenEvent::MemberRejected { .. }
            | WardenEvent::ReviewRefreshed { .. } => EventSource::Vetting,

            WardenEvent::MemberIncarcerated { .. }
            | WardenEvent::MemberReleased { .. }
            | WardenEvent::ReleaseFailed { .. } => EventSource::Incarceration,

            WardenEvent::MemberConverted { .. }
            | WardenEvent::InvalidMessage { .. }
            | WardenEvent::SettingToggled { .. } => EventSource::Monitor,

            WardenEvent::MemberPromoted { .. } | WardenEvent::StatsCleaned { .. } => {
                EventSource::Scheduler
            }

            WardenEvent::VettingRolesChanged { .. } | WardenEvent::CustomRolesChanged { .. } => {
                EventSource::Roles
            }
        }
    }

    fn severity(&self) -> EventSeverity {
        match self {
            WardenEvent::ReleaseFailed { .. } => EventSeverity::Error,
            WardenEvent::InvalidMessage { .. } | WardenEvent::MemberRejected { .. } => {
                EventSeverity::Warning
            }
            WardenEvent::ReviewRefreshed { .. } => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }

    /// Whether the event belongs in the audit log.
    pub fn is_audited(&self) -> bool {
        self.severity() >= EventSeverity::Info
    }
}

fn mentions(ids: &[MemberId]) -> String {
    ids.iter()
        .map(|id| id.mention())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for WardenEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WardenEvent::ReviewOpened {
                thread_id,
                applicant,
            } => write!(
                f,
                "New review thread {} opened for {}.",
                thread_id.get(),
                applicant.mention()
            ),
            WardenEvent::VoteRecorded {
                member_id,
                reviewer,
                kind,
                remaining,
                ..
            } => write!(
                f,
                "{} voted to {} {}. {} more vote(s) needed.",
                reviewer.mention(),
                kind,
                member_id.mention(),
                remaining
            ),
            WardenEvent::MemberApproved {
                member_id,
                reviewers,
                ..
            } => write!(
                f,
                "{} has been approved. Reviewers: {}.",
                member_id.mention(),
                mentions(reviewers)
            ),
            WardenEvent::MemberRejected {
                member_id,
                reviewers,
                ..
            } => write!(
                f,
                "{} has been rejected. Reviewers: {}.",
                member_id.mention(),
                mentions(reviewers)
            ),
            WardenEvent::ReviewRefreshed {
                thread_id,
                approvals,
                rejections,
            } => write!(
                f,
                "Review {} now at {approvals} approval(s) and {rejections} rejection(s).",
                thread_id.get()
            ),
            WardenEvent::MemberIncarcerated {
                member_id,
                release_at,
            } => write!(
                f,
                "{} has been incarcerated until <t:{release_at}:F> (<t:{release_at}:R>).",
                member_id.mention()
            ),
            WardenEvent::MemberReleased {
                member_id,
                restored,
            } => {
                write!(f, "{} has been released", member_id.mention())?;
                if restored.is_empty() {
                    f.write_str(".")
                } else {
                    let roles: Vec<String> = restored.iter().map(|r| r.mention()).collect();
                    write!(f, " and had roles restored: {}.", roles.join(", "))
                }
            }
            WardenEvent::ReleaseFailed { member_id, reason } => write!(
                f,
                "Failed to release {}: {reason}. The record was removed.",
                member_id.mention()
            ),
            WardenEvent::MemberPromoted {
                member_id,
                valid_messages,
            } => write!(
                f,
                "{} was promoted for activity ({valid_messages} valid messages).",
                member_id.mention()
            ),
            WardenEvent::MemberConverted { member_id } => write!(
                f,
                "{} returned and was moved back to the temporary role.",
                member_id.mention()
            ),
            WardenEvent::InvalidMessage {
                member_id,
                violations,
            } => write!(
                f,
                "Flagged message from {}: {}.",
                member_id.mention(),
                violations.join(", ")
            ),
            WardenEvent::StatsCleaned { processed, removed } => write!(
                f,
                "Stats cleanup processed {processed} member(s) and removed {removed}."
            ),
            WardenEvent::SettingToggled { setting, enabled } => write!(
                f,
                "`{}` has been {}.",
                setting.label(),
                if *enabled { "enabled" } else { "disabled" }
            ),
            WardenEvent::VettingRolesChanged {
                member_id,
                action,
                roles,
            } => {
                let roles: Vec<String> = roles.iter().map(|r| r.mention()).collect();
                let verb = match action {
                    RoleAction::Add => "added to",
                    RoleAction::Remove => "removed from",
                };
                write!(f, "Roles {} {verb} {}.", roles.join(", "), member_id.mention())
            }
            WardenEvent::CustomRolesChanged { action, names } => {
                let verb = match action {
                    RoleAction::Add => "added",
                    RoleAction::Remove => "removed",
                };
                write!(f, "Custom roles {verb}: {}.", names.join(", "))
            }
        }
    }
}

impl WardenEventEnvelope {
    /// Create a new event envelope
    pub fn new(event: WardenEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: event.source(),
            severity: event.severity(),
            actor: None,
            event,
        }
    }

    pub fn with_actor(mut self, actor: MemberId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_infers_source_and_severity() {
        let envelope = WardenEventEnvelope::new(WardenEvent::ReleaseFailed {
            member_id: MemberId::new(1),
            reason: "gone".into(),
        });
        assert_eq!(envelope.source, EventSource::Incarceration);
        assert_eq!(envelope.severity, EventSeverity::Error);
        assert!(envelope.event.is_audited());
    }

    #[test]
    fn test_audit_lines() {
        let line = WardenEvent::MemberIncarcerated {
            member_id: MemberId::new(9),
            release_at: 1_700_000_000,
        }
        .to_string();
        assert!(line.starts_with("<@9> has been incarcerated until <t:1700000000:F>"));

        let line = WardenEvent::StatsCleaned {
            processed: 4,
            removed: 1,
        }
        .to_string();
        assert_eq!(line, "Stats cleanup processed 4 member(s) and removed 1.");

        assert!(!WardenEvent::ReviewRefreshed {
            thread_id: ThreadId::new(1),
            approvals: 1,
            rejections: 0
        }
        .is_audited());
    }
}

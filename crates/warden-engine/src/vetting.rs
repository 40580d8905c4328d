//! Review intake and vote handling

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{debug, info, instrument, warn};
use warden_types::{MemberId, ThreadId, VoteKind, WardenEvent};

use crate::clock::Clock;
use crate::config::RoleLayout;
use crate::directory::Directory;
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::ledger::{ApprovalLedger, ApprovalRecord, Tally};
use crate::locks::MemberLocks;
use crate::sync::{RoleDelta, RoleSynchronizer};

/// Result of a counted vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded { kind: VoteKind, remaining: u32 },
    Approved,
    Rejected,
}

/// Drives review threads from intake through quorum.
pub struct VettingService {
    directory: Arc<dyn Directory>,
    sync: Arc<RoleSynchronizer>,
    locks: Arc<MemberLocks>,
    ledger: ApprovalLedger,
    roles: RoleLayout,
    clock: Arc<dyn Clock>,
    events: EventBus,
    /// Threads already taken in.
    processed: DashSet<ThreadId>,
    /// Applicant per thread, filled at intake or on first lookup.
    applicants: DashMap<ThreadId, MemberId>,
}

impl VettingService {
    pub fn new(
        directory: Arc<dyn Directory>,
        sync: Arc<RoleSynchronizer>,
        locks: Arc<MemberLocks>,
        ledger: ApprovalLedger,
        roles: RoleLayout,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            directory,
            sync,
            locks,
            ledger,
            roles,
            clock,
            events,
            processed: DashSet::new(),
            applicants: DashMap::new(),
        }
    }

    /// Take in a new review thread. Returns `false` for a thread already
    /// seen; those are ignored.
    pub fn open_review(&self, thread: ThreadId, applicant: MemberId) -> bool {
        if !self.processed.insert(thread) {
            return false;
        }
        self.applicants.insert(thread, applicant);
        info!(thread_id = %thread, member_id = %applicant, "Review thread opened");
        self.events
            .emit(WardenEvent::ReviewOpened { thread_id: thread, applicant });
        true
    }

    /// Current tally for a thread.
    pub fn record(&self, thread: ThreadId) -> ApprovalRecord {
        self.ledger.record(thread)
    }

    /// Count a reviewer's vote and, at quorum, move the applicant's roles.
    ///
    /// The applicant's lock is held from the role read until the review
    /// controls have been refreshed.
    #[instrument(skip(self), fields(thread_id = %thread, reviewer = %reviewer))]
    pub async fn vote(
        &self,
        thread: ThreadId,
        reviewer: MemberId,
        kind: VoteKind,
    ) -> EngineResult<VoteOutcome> {
        let applicant = self.applicant(thread).await?;
        let _guard = self.locks.acquire(applicant).await;

        let result = self.vote_locked(thread, applicant, reviewer, kind).await;
        if let Err(e) = &result {
            warn!(member_id = %applicant, error = %e, "Vote not counted");
        }

        let record = self.ledger.record(thread);
        self.events.emit(WardenEvent::ReviewRefreshed {
            thread_id: thread,
            approvals: record.approval_count,
            rejections: record.rejection_count,
        });
        result
    }

    async fn vote_locked(
        &self,
        thread: ThreadId,
        applicant: MemberId,
        reviewer: MemberId,
        kind: VoteKind,
    ) -> EngineResult<VoteOutcome> {
        let snapshot = self
            .directory
            .fetch_member(applicant)
            .await?
            .ok_or(EngineError::MemberNotFound(applicant))?;

        let current = self.ledger.record(thread);
        let is_electoral = snapshot.has_role(self.roles.electoral);
        let (next, tally) = self.ledger.tally(
            &current,
            reviewer,
            kind,
            applicant,
            is_electoral,
            self.clock.now(),
        )?;

        match tally {
            Tally::Pending { remaining } => {
                self.ledger.store(thread, next);
                info!(member_id = %applicant, ?kind, remaining, "Vote recorded");
                self.events.emit_by(
                    reviewer,
                    WardenEvent::VoteRecorded {
                        thread_id: thread,
                        member_id: applicant,
                        reviewer,
                        kind,
                        remaining,
                    },
                );
                Ok(VoteOutcome::Recorded { kind, remaining })
            }
            Tally::Quorum => {
                let (delta, reason) = match kind {
                    VoteKind::Approve => (
                        RoleDelta::new()
                            .adding(self.roles.electoral)
                            .adding(self.roles.approved)
                            .removing(self.roles.temporary),
                        "Vetting approval reached quorum",
                    ),
                    VoteKind::Reject => (
                        RoleDelta::new()
                            .adding(self.roles.approved)
                            .removing(self.roles.electoral),
                        "Vetting rejection reached quorum",
                    ),
                };
                self.sync
                    .apply(applicant, &delta, &snapshot.roles, reason)
                    .await?;

                self.ledger.complete(thread, kind, &next);
                self.processed.remove(&thread);
                // An approved thread still takes rejections until its
                // window closes; `prune` forgets it after that.
                if kind == VoteKind::Reject {
                    self.applicants.remove(&thread);
                }

                let reviewers: Vec<MemberId> = next.reviewers.iter().copied().collect();
                let (event, outcome) = match kind {
                    VoteKind::Approve => (
                        WardenEvent::MemberApproved {
                            thread_id: thread,
                            member_id: applicant,
                            reviewers,
                        },
                        VoteOutcome::Approved,
                    ),
                    VoteKind::Reject => (
                        WardenEvent::MemberRejected {
                            thread_id: thread,
                            member_id: applicant,
                            reviewers,
                        },
                        VoteOutcome::Rejected,
                    ),
                };
                info!(member_id = %applicant, ?kind, "Review reached quorum");
                self.events.emit_by(reviewer, event);
                Ok(outcome)
            }
        }
    }

    /// Forget threads whose rejection window has closed. Returns how many
    /// were dropped.
    pub fn prune(&self) -> usize {
        let expired = self.ledger.prune_expired(self.clock.now());
        for thread in &expired {
            self.applicants.remove(thread);
        }
        if !expired.is_empty() {
            debug!(threads = expired.len(), "Pruned closed review threads");
        }
        expired.len()
    }

    async fn applicant(&self, thread: ThreadId) -> EngineResult<MemberId> {
        if let Some(applicant) = self.applicants.get(&thread) {
            return Ok(*applicant);
        }
        let owner = self
            .directory
            .fetch_thread_owner(thread)
            .await?
            .ok_or(EngineError::UnknownThread(thread))?;
        self.applicants.insert(thread, owner);
        Ok(owner)
    }
}

//! Review vote ledger
//!
//! One [`ApprovalRecord`] per review thread, created on the first vote and
//! deleted once a quorum transition completes. The ledger lives in memory
//! only; votes in flight are lost on restart.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use warden_types::{MemberId, ThreadId, VoteKind};

use crate::config::VettingConfig;
use crate::error::{EngineError, EngineResult};

/// Vote tally for one review thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub approval_count: u32,
    pub rejection_count: u32,
    /// Everyone who voted, whichever way.
    pub reviewers: BTreeSet<MemberId>,
    pub last_approval: Option<DateTime<Utc>>,
}

/// What a counted vote leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    /// More votes of this kind are needed.
    Pending { remaining: u32 },
    /// The threshold was reached; the role transition is due.
    Quorum,
}

/// Per-thread vote records plus the approval stamps that outlive them.
#[derive(Debug)]
pub struct ApprovalLedger {
    records: DashMap<ThreadId, ApprovalRecord>,
    /// When each thread's applicant was approved; bounds the rejection window.
    approvals: DashMap<ThreadId, DateTime<Utc>>,
    required_approvals: u32,
    required_rejections: u32,
    rejection_window: Duration,
    rejection_window_days: i64,
}

impl ApprovalLedger {
    pub fn new(config: &VettingConfig) -> Self {
        Self {
            records: DashMap::new(),
            approvals: DashMap::new(),
            required_approvals: config.required_approvals.max(1),
            required_rejections: config.required_rejections.max(1),
            rejection_window: Duration::days(config.rejection_window_days),
            rejection_window_days: config.rejection_window_days,
        }
    }

    /// Current record for a thread, or a fresh one carrying the approval
    /// stamp if the applicant was approved earlier.
    pub fn record(&self, thread: ThreadId) -> ApprovalRecord {
        if let Some(record) = self.records.get(&thread) {
            return record.clone();
        }
        ApprovalRecord {
            last_approval: self.approvals.get(&thread).map(|at| *at),
            ..ApprovalRecord::default()
        }
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.records.contains_key(&thread)
    }

    /// Count a vote against `record` without storing anything.
    pub fn tally(
        &self,
        record: &ApprovalRecord,
        reviewer: MemberId,
        kind: VoteKind,
        applicant: MemberId,
        applicant_is_electoral: bool,
        now: DateTime<Utc>,
    ) -> EngineResult<(ApprovalRecord, Tally)> {
        if record.reviewers.contains(&reviewer) {
            return Err(EngineError::DuplicateVote { reviewer });
        }

        let mut next = record.clone();
        next.reviewers.insert(reviewer);

        let tally = match kind {
            VoteKind::Approve => {
                if applicant_is_electoral {
                    return Err(EngineError::AlreadyApproved(applicant));
                }
                next.approval_count = (next.approval_count + 1).min(self.required_approvals);
                if next.approval_count >= self.required_approvals {
                    next.last_approval = Some(now);
                    Tally::Quorum
                } else {
                    Tally::Pending {
                        remaining: self.required_approvals - next.approval_count,
                    }
                }
            }
            VoteKind::Reject => {
                if !applicant_is_electoral {
                    return Err(EngineError::NotApproved(applicant));
                }
                if self.window_closed(record.last_approval, now) {
                    return Err(EngineError::RejectionWindowClosed {
                        days: self.rejection_window_days,
                    });
                }
                next.rejection_count = (next.rejection_count + 1).min(self.required_rejections);
                if next.rejection_count >= self.required_rejections {
                    Tally::Quorum
                } else {
                    Tally::Pending {
                        remaining: self.required_rejections - next.rejection_count,
                    }
                }
            }
        };

        Ok((next, tally))
    }

    /// Store a record that has not reached quorum.
    pub fn store(&self, thread: ThreadId, record: ApprovalRecord) {
        self.records.insert(thread, record);
    }

    /// Finish a quorum transition: the record is deleted, an approval is
    /// stamped for the rejection window, a rejection clears the stamp.
    pub fn complete(&self, thread: ThreadId, kind: VoteKind, record: &ApprovalRecord) {
        self.records.remove(&thread);
        match kind {
            VoteKind::Approve => {
                if let Some(at) = record.last_approval {
                    self.approvals.insert(thread, at);
                }
            }
            VoteKind::Reject => {
                self.approvals.remove(&thread);
            }
        }
    }

    /// Drop approval stamps whose rejection window has closed. Returns the
    /// threads that no longer have a stamp or an open record.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Vec<ThreadId> {
        let mut expired = Vec::new();
        self.approvals.retain(|thread, at| {
            let keep = !self.window_closed(Some(*at), now);
            if !keep {
                expired.push(*thread);
            }
            keep
        });
        expired.retain(|thread| !self.records.contains_key(thread));
        expired
    }

    fn window_closed(&self, last_approval: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        last_approval.is_some_and(|at| now.signed_duration_since(at) > self.rejection_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APPLICANT: MemberId = MemberId::new(1);
    const THREAD: ThreadId = ThreadId::new(10);

    fn ledger() -> ApprovalLedger {
        ApprovalLedger::new(&VettingConfig::default())
    }

    #[test]
    fn test_approvals_reach_quorum() {
        let ledger = ledger();
        let now = Utc::now();
        let mut record = ledger.record(THREAD);

        for (i, expected) in [
            Tally::Pending { remaining: 2 },
            Tally::Pending { remaining: 1 },
            Tally::Quorum,
        ]
        .into_iter()
        .enumerate()
        {
            let reviewer = MemberId::new(100 + i as u64);
            let (next, tally) = ledger
                .tally(&record, reviewer, VoteKind::Approve, APPLICANT, false, now)
                .unwrap();
            assert_eq!(tally, expected);
            record = next;
        }
        assert_eq!(record.approval_count, 3);
        assert_eq!(record.last_approval, Some(now));
    }

    #[test]
    fn test_duplicate_reviewer_rejected_across_kinds() {
        let ledger = ledger();
        let now = Utc::now();
        let reviewer = MemberId::new(100);
        let (record, _) = ledger
            .tally(&ledger.record(THREAD), reviewer, VoteKind::Approve, APPLICANT, false, now)
            .unwrap();
        let err = ledger
            .tally(&record, reviewer, VoteKind::Reject, APPLICANT, true, now)
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateVote { .. }));
    }

    #[test]
    fn test_rejection_guards() {
        let ledger = ledger();
        let now = Utc::now();
        let fresh = ledger.record(THREAD);
        assert!(matches!(
            ledger.tally(&fresh, MemberId::new(5), VoteKind::Reject, APPLICANT, false, now),
            Err(EngineError::NotApproved(_))
        ));
        assert!(matches!(
            ledger.tally(&fresh, MemberId::new(5), VoteKind::Approve, APPLICANT, true, now),
            Err(EngineError::AlreadyApproved(_))
        ));
    }

    #[test]
    fn test_approval_stamp_outlives_record() {
        let ledger = ledger();
        let approved_at = Utc::now();
        let record = ApprovalRecord {
            approval_count: 3,
            last_approval: Some(approved_at),
            ..Default::default()
        };
        ledger.complete(THREAD, VoteKind::Approve, &record);
        assert!(!ledger.contains(THREAD));

        let fresh = ledger.record(THREAD);
        assert_eq!(fresh.approval_count, 0);
        assert_eq!(fresh.last_approval, Some(approved_at));

        let late = approved_at + Duration::days(7) + Duration::seconds(1);
        assert!(matches!(
            ledger.tally(&fresh, MemberId::new(9), VoteKind::Reject, APPLICANT, true, late),
            Err(EngineError::RejectionWindowClosed { days: 7 })
        ));
        let on_time = approved_at + Duration::days(7);
        assert!(ledger
            .tally(&fresh, MemberId::new(9), VoteKind::Reject, APPLICANT, true, on_time)
            .is_ok());
    }

    #[test]
    fn test_expired_stamps_are_pruned() {
        let ledger = ledger();
        let approved_at = Utc::now();
        let stamped = ApprovalRecord {
            last_approval: Some(approved_at),
            ..Default::default()
        };
        ledger.complete(THREAD, VoteKind::Approve, &stamped);
        ledger.complete(ThreadId::new(11), VoteKind::Approve, &stamped);
        ledger.store(ThreadId::new(11), ApprovalRecord::default());

        assert!(ledger.prune_expired(approved_at + Duration::days(7)).is_empty());

        let expired = ledger.prune_expired(approved_at + Duration::days(8));
        assert_eq!(expired, vec![THREAD]);
        assert_eq!(ledger.record(THREAD).last_approval, None);
    }
}

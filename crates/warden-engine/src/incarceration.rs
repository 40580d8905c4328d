//! Timed restriction of members
//!
//! Incarceration swaps a member's watched roles for the restricted role and
//! records what to give back. Releases happen on command, on a one-shot
//! timer for deadlines inside the next polling interval, or during
//! reconciliation for anything already overdue. The persisted record set is
//! authoritative and is re-read on every pass, so deadlines survive restarts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use warden_store::Documents;
use warden_types::{IncarcerationBook, IncarcerationRecord, MemberId, RoleId, WardenEvent};

use crate::clock::Clock;
use crate::config::{IncarcerationConfig, RoleLayout};
use crate::directory::Directory;
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::locks::MemberLocks;
use crate::sync::{RoleDelta, RoleSynchronizer};

static DURATION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)(\d+)([dhm])").unwrap()
});

/// Parse `<integer><unit>` tokens (`d`, `h`, `m`, any case) and sum them.
///
/// Text between tokens is ignored, so `"1d 2h 30m"` and `"1d2h30m"` are
/// equal. No tokens, overflow, or a zero total is an error.
pub fn parse_duration(text: &str) -> EngineResult<ChronoDuration> {
    let malformed = || EngineError::MalformedDuration(text.to_string());

    let mut total: i64 = 0;
    let mut matched = false;
    for caps in DURATION_TOKEN.captures_iter(text) {
        matched = true;
        let value: i64 = caps[1].parse().map_err(|_| malformed())?;
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "d" => 86_400,
            "h" => 3_600,
            _ => 60,
        };
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(malformed)?;
    }

    if !matched || total <= 0 {
        return Err(malformed());
    }
    ChronoDuration::try_seconds(total).ok_or_else(malformed)
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub released: Vec<MemberId>,
    pub failed: Vec<MemberId>,
    pub scheduled: Vec<MemberId>,
}

/// Outcome of a deadline-driven release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DueRelease {
    Released,
    /// The record is gone or carries a different deadline.
    Skipped,
    Failed,
}

/// Marks a fired timer's release as running until dropped.
struct InFlight<'a> {
    releases: &'a watch::Sender<BTreeMap<MemberId, u32>>,
    member: MemberId,
}

impl<'a> InFlight<'a> {
    fn enter(releases: &'a watch::Sender<BTreeMap<MemberId, u32>>, member: MemberId) -> Self {
        releases.send_modify(|running| *running.entry(member).or_default() += 1);
        Self { releases, member }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.releases.send_modify(|running| {
            if let Some(count) = running.get_mut(&self.member) {
                *count -= 1;
                if *count == 0 {
                    running.remove(&self.member);
                }
            }
        });
    }
}

/// Restricts members and releases them when their time is up.
pub struct IncarcerationScheduler {
    documents: Documents,
    directory: Arc<dyn Directory>,
    sync: Arc<RoleSynchronizer>,
    locks: Arc<MemberLocks>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    roles: RoleLayout,
    config: IncarcerationConfig,
    /// One-shot release timers by member, keyed to the deadline they serve.
    pending: DashMap<MemberId, (i64, JoinHandle<()>)>,
    /// Timer releases that have left `pending` and not finished yet.
    in_flight: watch::Sender<BTreeMap<MemberId, u32>>,
}

impl IncarcerationScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Documents,
        directory: Arc<dyn Directory>,
        sync: Arc<RoleSynchronizer>,
        locks: Arc<MemberLocks>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        roles: RoleLayout,
        config: IncarcerationConfig,
    ) -> Self {
        Self {
            documents,
            directory,
            sync,
            locks,
            clock,
            events,
            roles,
            config,
            pending: DashMap::new(),
            in_flight: watch::channel(BTreeMap::new()).0,
        }
    }

    /// Restrict `member` for `duration_text`. Returns the confirmation text.
    ///
    /// Re-incarcerating replaces the deadline and keeps the roles recorded
    /// the first time.
    #[instrument(skip(self), fields(member_id = %member))]
    pub async fn incarcerate(&self, member: MemberId, duration_text: &str) -> EngineResult<String> {
        let duration = parse_duration(duration_text)?;
        let _guard = self.locks.acquire(member).await;

        let snapshot = self
            .directory
            .fetch_member(member)
            .await?
            .ok_or(EngineError::MemberNotFound(member))?;

        let book: IncarcerationBook = self.documents.load().await?;
        let original_roles: Vec<RoleId> = match book.get(&member) {
            Some(existing) => existing.original_roles.clone(),
            None => self
                .roles
                .watched()
                .into_iter()
                .filter(|role| snapshot.has_role(*role))
                .collect(),
        };

        let mut delta = RoleDelta::new().adding(self.roles.incarcerated);
        for role in self.roles.watched() {
            delta = delta.removing(role);
        }
        self.sync
            .apply(member, &delta, &snapshot.roles, "Incarcerated")
            .await?;

        let release_time = self
            .clock
            .now()
            .checked_add_signed(duration)
            .ok_or_else(|| EngineError::MalformedDuration(duration_text.to_string()))?;
        let record = IncarcerationRecord::new(release_time, original_roles);
        let release_at = record.release_at;
        self.documents
            .update(|book: &mut IncarcerationBook| book.insert(member, record))
            .await?;
        // A timer armed for the old deadline is stale now. One that already
        // fired skips itself once it sees the new deadline.
        self.cancel_deferred(member);

        info!(release_at, "Member incarcerated");
        self.events.emit(WardenEvent::MemberIncarcerated {
            member_id: member,
            release_at,
        });
        Ok(format!(
            "{} has been incarcerated until <t:{release_at}:F> (<t:{release_at}:R>).",
            member.mention()
        ))
    }

    /// Release `member` now. Returns the roles given back.
    #[instrument(skip(self), fields(member_id = %member))]
    pub async fn release(&self, member: MemberId) -> EngineResult<Vec<RoleId>> {
        self.cancel_deferred(member);
        let _guard = self.locks.acquire(member).await;
        let record = self.load_record(member).await?;
        self.release_locked(member, record).await
    }

    async fn load_record(&self, member: MemberId) -> EngineResult<IncarcerationRecord> {
        let book: IncarcerationBook = self.documents.load().await?;
        book.get(&member)
            .cloned()
            .ok_or(EngineError::NotIncarcerated(member))
    }

    async fn release_locked(
        &self,
        member: MemberId,
        record: IncarcerationRecord,
    ) -> EngineResult<Vec<RoleId>> {
        let snapshot = self
            .directory
            .fetch_member(member)
            .await?
            .ok_or(EngineError::MemberNotFound(member))?;

        let watched = self.roles.watched();
        let restore: Vec<RoleId> = record
            .original_roles
            .iter()
            .copied()
            .filter(|role| watched.contains(role) && !snapshot.has_role(*role))
            .collect();

        let mut delta = RoleDelta::new().removing(self.roles.incarcerated);
        for role in &restore {
            delta = delta.adding(*role);
        }
        self.sync
            .apply(member, &delta, &snapshot.roles, "Incarceration ended")
            .await?;

        self.documents
            .update(|book: &mut IncarcerationBook| book.remove(&member))
            .await?;

        info!(restored = ?restore, "Member released");
        self.events.emit(WardenEvent::MemberReleased {
            member_id: member,
            restored: restore.clone(),
        });
        Ok(restore)
    }

    /// Release a member whose `deadline` passed. Nothing happens unless the
    /// persisted record still carries that deadline. A failure is logged
    /// and reported, and the record is dropped regardless.
    async fn release_due(&self, member: MemberId, deadline: i64) -> DueRelease {
        let _guard = self.locks.acquire(member).await;

        let result = match self.load_record(member).await {
            Ok(record) if record.release_at != deadline => {
                debug!(
                    member_id = %member,
                    release_at = record.release_at,
                    stale = deadline,
                    "Deadline moved, release skipped"
                );
                return DueRelease::Skipped;
            }
            Ok(record) => self.release_locked(member, record).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => DueRelease::Released,
            Err(EngineError::NotIncarcerated(_)) => {
                debug!(member_id = %member, "Release already handled");
                DueRelease::Skipped
            }
            Err(e) => {
                error!(member_id = %member, error = %e, "Scheduled release failed, dropping record");
                self.events.emit(WardenEvent::ReleaseFailed {
                    member_id: member,
                    reason: e.to_string(),
                });
                if let Err(e) = self
                    .documents
                    .update(|book: &mut IncarcerationBook| {
                        if book.get(&member).is_some_and(|r| r.release_at == deadline) {
                            book.remove(&member);
                        }
                    })
                    .await
                {
                    error!(member_id = %member, error = %e, "Failed to drop incarceration record");
                }
                DueRelease::Failed
            }
        }
    }

    /// Re-read the persisted records, release what is overdue and arm
    /// timers for what falls due before the next pass.
    #[instrument(skip(self))]
    pub async fn reconcile(self: &Arc<Self>) -> EngineResult<ReconcileReport> {
        let book: IncarcerationBook = self.documents.load().await?;
        let now = self.clock.now();
        let horizon = self.config.poll_interval_secs as i64;
        let mut report = ReconcileReport::default();

        for (member, record) in &book {
            let remaining = record.remaining_secs(now);
            if remaining <= 0 {
                match self.release_due(*member, record.release_at).await {
                    DueRelease::Released => report.released.push(*member),
                    DueRelease::Failed => report.failed.push(*member),
                    DueRelease::Skipped => {}
                }
            } else if remaining <= horizon
                && self.schedule_deferred(*member, record.release_at, remaining as u64)
            {
                report.scheduled.push(*member);
            }
        }

        if report.released.is_empty() && report.failed.is_empty() {
            debug!(records = book.len(), "No releases due");
        } else {
            info!(
                released = report.released.len(),
                failed = report.failed.len(),
                "Reconciliation released members"
            );
        }
        Ok(report)
    }

    /// Arm a one-shot release for `deadline`. Returns `false` if one is
    /// already armed for it; a timer armed for another deadline is replaced.
    fn schedule_deferred(
        self: &Arc<Self>,
        member: MemberId,
        deadline: i64,
        after_secs: u64,
    ) -> bool {
        match self.pending.entry(member) {
            dashmap::mapref::entry::Entry::Occupied(slot) if slot.get().0 == deadline => false,
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                let handle = self.spawn_release(member, deadline, after_secs);
                let (_, stale) = slot.insert((deadline, handle));
                stale.abort();
                debug!(member_id = %member, after_secs, "Deferred release re-armed");
                true
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert((deadline, self.spawn_release(member, deadline, after_secs)));
                debug!(member_id = %member, after_secs, "Deferred release armed");
                true
            }
        }
    }

    fn spawn_release(
        self: &Arc<Self>,
        member: MemberId,
        deadline: i64,
        after_secs: u64,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(after_secs)).await;
            let _running = InFlight::enter(&this.in_flight, member);
            this.pending.remove_if(&member, |_, (armed, _)| *armed == deadline);
            this.release_due(member, deadline).await;
        })
    }

    fn cancel_deferred(&self, member: MemberId) {
        if let Some((_, (_, handle))) = self.pending.remove(&member) {
            handle.abort();
            debug!(member_id = %member, "Deferred release cancelled");
        }
    }

    /// Members with an armed release timer.
    pub fn pending_releases(&self) -> Vec<MemberId> {
        self.pending.iter().map(|entry| *entry.key()).collect()
    }

    /// Wait up to the drain timeout for armed and running releases, then
    /// abort what is left. Their records stay persisted for the next start.
    pub async fn shutdown(&self) -> usize {
        let members = self.pending_releases();
        let mut handles = Vec::with_capacity(members.len());
        for member in members {
            if let Some((_, (_, handle))) = self.pending.remove(&member) {
                handles.push((member, handle));
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.drain_timeout();
        let mut abandoned = BTreeSet::new();
        for (member, mut handle) in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                abandoned.insert(member);
                warn!(member_id = %member, "Deferred release did not finish before shutdown");
            }
        }

        // Timers that fired earlier have already left `pending`.
        let mut running = self.in_flight.subscribe();
        let timed_out = tokio::time::timeout_at(deadline, running.wait_for(BTreeMap::is_empty))
            .await
            .is_err();
        if timed_out {
            let stuck: Vec<MemberId> = self.in_flight.borrow().keys().copied().collect();
            for member in stuck {
                if abandoned.insert(member) {
                    warn!(member_id = %member, "Running release did not finish before shutdown");
                }
            }
        }
        abandoned.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_duration_sums_tokens() {
        assert_eq!(parse_duration("1d 2h 30m").unwrap(), ChronoDuration::seconds(95_400));
        assert_eq!(parse_duration("2H").unwrap(), ChronoDuration::hours(2));
        assert_eq!(parse_duration("10m10m").unwrap(), ChronoDuration::minutes(20));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for text in ["", "soon", "10", "0m", "5s", "99999999999999999999d"] {
            assert!(
                matches!(parse_duration(text), Err(EngineError::MalformedDuration(_))),
                "{text:?} should be rejected"
            );
        }
    }

    proptest! {
        #[test]
        fn prop_parse_duration_matches_sum(
            d in 0i64..400, h in 0i64..100, m in 0i64..1000
        ) {
            let text = format!("{d}d {h}h {m}m");
            let total = d * 86_400 + h * 3_600 + m * 60;
            match parse_duration(&text) {
                Ok(parsed) => prop_assert_eq!(parsed.num_seconds(), total),
                Err(_) => prop_assert_eq!(total, 0),
            }
        }
    }
}

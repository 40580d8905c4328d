//! Message monitor
//!
//! Scores messages from temporary members, keeps their rolling stats, moves
//! the shared thresholds, and runs the hourly cleanup and promotion sweeps.
//! Stats writes are debounced; the in-memory book is always current.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use warden_guard::{AnomalyDetector, GlobalThresholds, ThresholdAdapter, Violation};
use warden_store::Documents;
use warden_types::{MemberId, MonitorSettings, Setting, StatsBook, WardenEvent};

use crate::clock::Clock;
use crate::config::{MonitorConfig, RoleLayout};
use crate::directory::{Directory, MemberSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::locks::MemberLocks;
use crate::sync::{RoleDelta, RoleSynchronizer};

/// Feedback credited for a clean message.
const VALID_FEEDBACK: f64 = 0.5;
/// Feedback debited for a flagged message, on top of the per-violation debit.
const INVALID_FEEDBACK: f64 = -1.0;

/// A message as delivered by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub author: MemberId,
    pub content: String,
    /// Sent inside the community rather than in a direct message.
    pub in_guild: bool,
    pub is_bot: bool,
}

impl InboundMessage {
    pub fn new(author: MemberId, content: impl Into<String>) -> Self {
        Self {
            author,
            content: content.into(),
            in_guild: true,
            is_bot: false,
        }
    }
}

/// What the monitor did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageVerdict {
    /// Not monitored: bot, direct message, unknown author, monitoring off,
    /// or the author does not hold the temporary role.
    Ignored,
    /// The author held the missing role and was moved back to temporary.
    Converted,
    Valid,
    Invalid(BTreeSet<Violation>),
}

/// Result of a stats cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub processed: usize,
    pub removed: usize,
}

/// Tracks message quality for temporary members.
pub struct MessageMonitor {
    documents: Documents,
    directory: Arc<dyn Directory>,
    sync: Arc<RoleSynchronizer>,
    locks: Arc<MemberLocks>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    roles: RoleLayout,
    config: MonitorConfig,
    detector: AnomalyDetector,
    adapter: ThresholdAdapter,
    settings: Mutex<MonitorSettings>,
    stats: Mutex<StatsBook>,
    thresholds: Mutex<GlobalThresholds>,
    pending_save: Mutex<Option<JoinHandle<()>>>,
    /// Serializes snapshot-and-write so an older snapshot never lands last.
    save_lock: tokio::sync::Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MessageMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Documents,
        directory: Arc<dyn Directory>,
        sync: Arc<RoleSynchronizer>,
        locks: Arc<MemberLocks>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        roles: RoleLayout,
        config: MonitorConfig,
    ) -> Self {
        let detector = AnomalyDetector::new(config.guard.max_repeated_messages);
        let adapter = ThresholdAdapter::new(config.guard.clone());
        let thresholds = GlobalThresholds::from_config(&config.guard);
        Self {
            documents,
            directory,
            sync,
            locks,
            clock,
            events,
            roles,
            config,
            detector,
            adapter,
            settings: Mutex::new(MonitorSettings::default()),
            stats: Mutex::new(StatsBook::new()),
            thresholds: Mutex::new(thresholds),
            pending_save: Mutex::new(None),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the in-memory stats with the persisted document.
    pub async fn load_stats(&self) -> EngineResult<usize> {
        let book: StatsBook = self.documents.load().await?;
        let count = book.len();
        *lock(&self.stats) = book;
        info!(members = count, "Message stats loaded");
        Ok(count)
    }

    pub fn settings(&self) -> MonitorSettings {
        *lock(&self.settings)
    }

    pub fn thresholds(&self) -> GlobalThresholds {
        *lock(&self.thresholds)
    }

    /// Stats for one member, if tracked.
    pub fn stats_for(&self, member: MemberId) -> Option<warden_types::UserMessageStats> {
        lock(&self.stats).get(&member).cloned()
    }

    pub fn tracked_members(&self) -> usize {
        lock(&self.stats).len()
    }

    /// Flip monitoring or one of the checks.
    pub fn toggle(&self, setting: Setting, enabled: bool) -> MonitorSettings {
        let settings = {
            let mut settings = lock(&self.settings);
            settings.apply(setting, enabled);
            *settings
        };
        info!(%setting, enabled, "Monitor setting changed");
        self.events
            .emit(WardenEvent::SettingToggled { setting, enabled });
        settings
    }

    /// Handle one inbound message.
    pub async fn observe(self: &Arc<Self>, message: &InboundMessage) -> EngineResult<MessageVerdict> {
        if message.is_bot || !message.in_guild {
            return Ok(MessageVerdict::Ignored);
        }
        let Some(snapshot) = self.directory.fetch_member(message.author).await? else {
            return Ok(MessageVerdict::Ignored);
        };
        if snapshot.is_bot {
            return Ok(MessageVerdict::Ignored);
        }

        if snapshot.has_role(self.roles.missing) {
            self.convert_missing(message.author).await?;
            return Ok(MessageVerdict::Converted);
        }

        let settings = self.settings();
        if !settings.monitoring || !snapshot.has_role(self.roles.temporary) {
            return Ok(MessageVerdict::Ignored);
        }

        let verdict = self.score(message, &settings);
        if let MessageVerdict::Invalid(violations) = &verdict {
            debug!(member_id = %message.author, ?violations, "Message flagged");
            self.events.emit(WardenEvent::InvalidMessage {
                member_id: message.author,
                violations: violations.iter().map(ToString::to_string).collect(),
            });
        }
        self.schedule_save();
        Ok(verdict)
    }

    fn score(&self, message: &InboundMessage, settings: &MonitorSettings) -> MessageVerdict {
        let now = self.clock.now();
        let mut book = lock(&self.stats);
        let stats = book.entry(message.author).or_default();
        stats.record_message(now, self.config.window());

        // Surrounding whitespace is not part of the message.
        let text = message.content.trim();
        let violations = {
            let thresholds = lock(&self.thresholds);
            self.detector
                .evaluate(text, stats, &thresholds, &settings.checks)
        };

        if violations.is_empty() {
            stats.invalid_message_count = stats.invalid_message_count.saturating_sub(1);
            stats.recovery_streak += 1;
            if settings.checks.feedback {
                stats.nudge_feedback(VALID_FEEDBACK);
            }
        } else {
            stats.invalid_message_count += 1;
            stats.recovery_streak = 0;
            if settings.checks.feedback {
                stats.nudge_feedback(INVALID_FEEDBACK);
            }
        }

        if settings.adapts_thresholds() {
            let mut thresholds = lock(&self.thresholds);
            self.adapter
                .adjust(&mut thresholds, stats, &settings.checks, now);
        }

        if violations.is_empty() {
            MessageVerdict::Valid
        } else {
            MessageVerdict::Invalid(violations)
        }
    }

    /// Move a returning member from the missing role back to temporary.
    #[instrument(skip(self), fields(member_id = %member))]
    pub async fn convert_missing(&self, member: MemberId) -> EngineResult<()> {
        let _guard = self.locks.acquire(member).await;
        let snapshot = self.fetch(member).await?;
        if !snapshot.has_role(self.roles.missing) {
            return Ok(());
        }
        let delta = RoleDelta::single(Some(self.roles.temporary), Some(self.roles.missing));
        self.sync
            .apply(member, &delta, &snapshot.roles, "Missing member returned")
            .await?;
        info!("Missing member converted to temporary");
        self.events
            .emit(WardenEvent::MemberConverted { member_id: member });
        Ok(())
    }

    /// Cancel any pending save and arm a new one after the debounce delay.
    fn schedule_save(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let delay = self.config.save_debounce();
        let mut pending = lock(&self.pending_save);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = this.flush().await {
                error!(error = %e, "Debounced stats save failed");
            }
        }));
    }

    /// Write the current stats now.
    pub async fn flush(&self) -> EngineResult<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot = lock(&self.stats).clone();
        self.documents.save(&snapshot).await?;
        debug!(members = snapshot.len(), "Message stats saved");
        Ok(())
    }

    /// Drop the pending debounced save and write immediately.
    pub async fn flush_pending(&self) -> EngineResult<()> {
        let pending = lock(&self.pending_save).take();
        if let Some(handle) = pending {
            handle.abort();
        }
        self.flush().await
    }

    /// Forget members who left or who are no longer temporary-only.
    #[instrument(skip(self))]
    pub async fn cleanup_stats(&self) -> EngineResult<CleanupReport> {
        let members: Vec<MemberId> = lock(&self.stats).keys().copied().collect();
        let mut stale = Vec::new();

        for member in &members {
            match self.directory.fetch_member(*member).await {
                Ok(None) => stale.push(*member),
                Ok(Some(snapshot)) => {
                    let monitored = snapshot.has_role(self.roles.temporary)
                        && !snapshot.has_role(self.roles.approved);
                    if !monitored {
                        stale.push(*member);
                    }
                }
                Err(e) => {
                    warn!(member_id = %member, error = %e, "Skipping member during stats cleanup");
                }
            }
        }

        let removed = {
            let mut book = lock(&self.stats);
            stale.iter().filter(|m| book.remove(*m).is_some()).count()
        };
        if removed > 0 {
            self.flush().await?;
        }

        let report = CleanupReport {
            processed: members.len(),
            removed,
        };
        info!(processed = report.processed, removed, "Stats cleanup finished");
        self.events.emit(WardenEvent::StatsCleaned {
            processed: report.processed,
            removed,
        });
        Ok(report)
    }

    /// Promote temporary members with enough valid messages to approved.
    #[instrument(skip(self))]
    pub async fn promote_active_members(&self) -> EngineResult<Vec<MemberId>> {
        let threshold = self.config.promotion_threshold;
        let candidates: Vec<(MemberId, i64)> = lock(&self.stats)
            .iter()
            .map(|(member, stats)| (*member, stats.valid_message_count()))
            .filter(|(_, valid)| *valid >= threshold)
            .collect();

        let mut promoted = Vec::new();
        for (member, valid_messages) in candidates {
            match self.promote(member).await {
                Ok(true) => {
                    lock(&self.stats).remove(&member);
                    info!(member_id = %member, valid_messages, "Member promoted for activity");
                    self.events.emit(WardenEvent::MemberPromoted {
                        member_id: member,
                        valid_messages,
                    });
                    promoted.push(member);
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(member_id = %member, error = %e, "Activity promotion failed");
                }
            }
        }

        if !promoted.is_empty() {
            self.flush().await?;
        }
        debug!(promoted = promoted.len(), "Activity promotion finished");
        Ok(promoted)
    }

    async fn promote(&self, member: MemberId) -> EngineResult<bool> {
        let _guard = self.locks.acquire(member).await;
        let snapshot = self.fetch(member).await?;
        let eligible = snapshot.has_role(self.roles.temporary)
            && !snapshot.has_role(self.roles.approved)
            && !snapshot.has_role(self.roles.electoral);
        if !eligible {
            return Ok(false);
        }
        let delta = RoleDelta::single(Some(self.roles.approved), Some(self.roles.temporary));
        self.sync
            .apply(member, &delta, &snapshot.roles, "Activity promotion")
            .await?;
        Ok(true)
    }

    async fn fetch(&self, member: MemberId) -> EngineResult<MemberSnapshot> {
        self.directory
            .fetch_member(member)
            .await?
            .ok_or(EngineError::MemberNotFound(member))
    }
}

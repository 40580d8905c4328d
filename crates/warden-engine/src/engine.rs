//! The engine facade
//!
//! [`Engine`] owns every registry (member locks, vote ledger, release
//! timers, message stats) and wires the services to one directory, one
//! document store and one clock. Command surfaces and the daemon's loops
//! talk to the engine only.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use warden_guard::GlobalThresholds;
use warden_store::{DocumentStore, Documents};
use warden_types::{
    ChannelId, CustomRoles, IncarcerationBook, MemberId, MonitorSettings, RoleAction,
    RoleCatalog, RoleId, Setting, ThreadId, VoteKind, WardenEventEnvelope,
};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::custom_roles::CustomRoleRegistry;
use crate::directory::Directory;
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::incarceration::{IncarcerationScheduler, ReconcileReport};
use crate::ledger::{ApprovalLedger, ApprovalRecord};
use crate::locks::MemberLocks;
use crate::monitor::{CleanupReport, InboundMessage, MessageMonitor, MessageVerdict};
use crate::sync::RoleSynchronizer;
use crate::vetting::{VettingService, VoteOutcome};
use crate::vetting_roles::{RoleSelection, VettingRoleService};

/// Sizes of the documents read at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub catalog_categories: usize,
    pub custom_roles: usize,
    pub incarcerated: usize,
    pub tracked_members: usize,
}

/// What shutdown left behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stats_flushed: bool,
    pub releases_abandoned: usize,
}

pub struct Engine {
    config: EngineConfig,
    documents: Documents,
    events: EventBus,
    locks: Arc<MemberLocks>,
    vetting: VettingService,
    incarceration: Arc<IncarcerationScheduler>,
    monitor: Arc<MessageMonitor>,
    custom_roles: CustomRoleRegistry,
    vetting_roles: VettingRoleService,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        directory: Arc<dyn Directory>,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let documents = Documents::new(store).with_retry(config.store_retry);
        let events = EventBus::new(config.event_capacity, clock.clone());
        let locks = Arc::new(MemberLocks::new(config.locks.ttl()));
        let sync = Arc::new(RoleSynchronizer::new(directory.clone(), config.sync.clone()));

        let vetting = VettingService::new(
            directory.clone(),
            sync.clone(),
            locks.clone(),
            ApprovalLedger::new(&config.vetting),
            config.roles,
            clock.clone(),
            events.clone(),
        );
        let incarceration = Arc::new(IncarcerationScheduler::new(
            documents.clone(),
            directory.clone(),
            sync.clone(),
            locks.clone(),
            clock.clone(),
            events.clone(),
            config.roles,
            config.incarceration.clone(),
        ));
        let monitor = Arc::new(MessageMonitor::new(
            documents.clone(),
            directory.clone(),
            sync.clone(),
            locks.clone(),
            clock,
            events.clone(),
            config.roles,
            config.monitor.clone(),
        ));
        let custom_roles = CustomRoleRegistry::new(documents.clone(), events.clone());
        let vetting_roles =
            VettingRoleService::new(documents.clone(), directory, sync, locks.clone(), events.clone());

        Self {
            config,
            documents,
            events,
            locks,
            vetting,
            incarceration,
            monitor,
            custom_roles,
            vetting_roles,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read all four documents concurrently, creating any that are missing.
    #[instrument(skip(self))]
    pub async fn load(&self) -> EngineResult<LoadSummary> {
        let (catalog, custom, book, tracked_members) = tokio::try_join!(
            async { Ok::<_, EngineError>(self.documents.load::<RoleCatalog>().await?) },
            async { Ok::<_, EngineError>(self.documents.load::<CustomRoles>().await?) },
            async { Ok::<_, EngineError>(self.documents.load::<IncarcerationBook>().await?) },
            self.monitor.load_stats(),
        )?;

        let summary = LoadSummary {
            catalog_categories: catalog.assigned_roles.len(),
            custom_roles: custom.0.len(),
            incarcerated: book.len(),
            tracked_members,
        };
        info!(
            catalog_categories = summary.catalog_categories,
            custom_roles = summary.custom_roles,
            incarcerated = summary.incarcerated,
            tracked_members = summary.tracked_members,
            "Initial data loaded"
        );
        Ok(summary)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WardenEventEnvelope> {
        self.events.subscribe()
    }

    // Vetting

    /// Take in a thread created in `parent`. Threads outside the configured
    /// vetting forum are ignored.
    pub fn open_review(&self, thread: ThreadId, parent: ChannelId, applicant: MemberId) -> bool {
        if self.config.vetting_forum.is_some_and(|forum| forum != parent) {
            return false;
        }
        self.vetting.open_review(thread, applicant)
    }

    pub async fn vote(
        &self,
        thread: ThreadId,
        reviewer: MemberId,
        kind: VoteKind,
    ) -> EngineResult<VoteOutcome> {
        self.vetting.vote(thread, reviewer, kind).await
    }

    pub fn review(&self, thread: ThreadId) -> ApprovalRecord {
        self.vetting.record(thread)
    }

    pub async fn assign_vetting_roles(
        &self,
        member: MemberId,
        selections: &[RoleSelection],
    ) -> EngineResult<Vec<RoleId>> {
        self.vetting_roles
            .apply(member, selections, RoleAction::Add)
            .await
    }

    pub async fn remove_vetting_roles(
        &self,
        member: MemberId,
        selections: &[RoleSelection],
    ) -> EngineResult<Vec<RoleId>> {
        self.vetting_roles
            .apply(member, selections, RoleAction::Remove)
            .await
    }

    pub async fn role_catalog(&self) -> EngineResult<RoleCatalog> {
        self.vetting_roles.catalog().await
    }

    // Incarceration

    pub async fn incarcerate(&self, member: MemberId, duration: &str) -> EngineResult<String> {
        self.incarceration.incarcerate(member, duration).await
    }

    pub async fn release(&self, member: MemberId) -> EngineResult<Vec<RoleId>> {
        self.incarceration.release(member).await
    }

    pub async fn reconcile(&self) -> EngineResult<ReconcileReport> {
        self.incarceration.reconcile().await
    }

    pub fn pending_releases(&self) -> Vec<MemberId> {
        self.incarceration.pending_releases()
    }

    // Custom roles

    pub async fn configure_custom_role(
        &self,
        names: &str,
        action: RoleAction,
    ) -> EngineResult<Vec<String>> {
        self.custom_roles.configure(names, action).await
    }

    pub async fn update_custom_role_membership(
        &self,
        member: MemberId,
        name: &str,
        action: RoleAction,
    ) -> EngineResult<bool> {
        self.custom_roles
            .update_membership(member, name, action)
            .await
    }

    pub async fn custom_role_members(&self, name: &str) -> EngineResult<Vec<MemberId>> {
        self.custom_roles.members(name).await
    }

    // Monitor

    pub fn toggle_setting(&self, setting: Setting, enabled: bool) -> MonitorSettings {
        self.monitor.toggle(setting, enabled)
    }

    pub async fn observe_message(&self, message: &InboundMessage) -> EngineResult<MessageVerdict> {
        self.monitor.observe(message).await
    }

    pub fn monitor(&self) -> &MessageMonitor {
        &self.monitor
    }

    pub fn thresholds(&self) -> GlobalThresholds {
        self.monitor.thresholds()
    }

    pub async fn cleanup_stats(&self) -> EngineResult<CleanupReport> {
        self.monitor.cleanup_stats().await
    }

    pub async fn promote_active_members(&self) -> EngineResult<Vec<MemberId>> {
        self.monitor.promote_active_members().await
    }

    // Housekeeping

    pub fn sweep_locks(&self) -> usize {
        self.locks.sweep()
    }

    /// Drop review threads whose rejection window has closed.
    pub fn prune_reviews(&self) -> usize {
        self.vetting.prune()
    }

    /// Flush pending stats and drain deferred releases.
    pub async fn shutdown(&self) -> ShutdownReport {
        let stats_flushed = match self.monitor.flush_pending().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Final stats save failed");
                false
            }
        };
        let releases_abandoned = self.incarceration.shutdown().await;
        info!(stats_flushed, releases_abandoned, "Engine stopped");
        ShutdownReport {
            stats_flushed,
            releases_abandoned,
        }
    }
}

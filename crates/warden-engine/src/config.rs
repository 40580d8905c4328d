//! Engine configuration.
//!
//! Role ids have no sensible default and must always be supplied; every
//! other section falls back to the documented defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_guard::GuardConfig;
use warden_store::RetryPolicy;
use warden_types::{ChannelId, RoleId};

/// Role ids the engine moves members between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleLayout {
    /// Full voting member
    pub electoral: RoleId,
    /// Vetted but not (yet) electoral
    pub approved: RoleId,
    /// Newcomer awaiting vetting
    pub temporary: RoleId,
    /// Restricted member
    pub incarcerated: RoleId,
    /// Member who went quiet and was parked
    pub missing: RoleId,
}

impl RoleLayout {
    /// Roles snapshotted on incarceration, in restore order.
    pub fn watched(&self) -> [RoleId; 3] {
        [self.electoral, self.approved, self.temporary]
    }
}

/// Configuration for review voting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VettingConfig {
    #[serde(default = "default_required_votes")]
    pub required_approvals: u32,

    #[serde(default = "default_required_votes")]
    pub required_rejections: u32,

    /// Days after approval during which rejections are accepted.
    #[serde(default = "default_rejection_window_days")]
    pub rejection_window_days: i64,
}

fn default_required_votes() -> u32 {
    3
}

fn default_rejection_window_days() -> i64 {
    7
}

impl Default for VettingConfig {
    fn default() -> Self {
        Self {
            required_approvals: default_required_votes(),
            required_rejections: default_required_votes(),
            rejection_window_days: default_rejection_window_days(),
        }
    }
}

/// Configuration for role synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Verification attempts, including the first.
    #[serde(default = "default_sync_attempts")]
    pub max_attempts: u32,

    /// Sleep after each failed verification; the last entry repeats.
    #[serde(default = "default_sync_backoff_ms")]
    pub backoff_ms: Vec<u64>,
}

fn default_sync_attempts() -> u32 {
    3
}

fn default_sync_backoff_ms() -> Vec<u64> {
    vec![500, 1_000, 2_000]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_sync_attempts(),
            backoff_ms: default_sync_backoff_ms(),
        }
    }
}

impl SyncConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .backoff_ms
            .get(attempt as usize)
            .or_else(|| self.backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// Configuration for timed releases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncarcerationConfig {
    /// Reconciliation period; releases due within one period get a timer.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How long shutdown waits for pending releases.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_drain_timeout_secs() -> u64 {
    10
}

impl Default for IncarcerationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl IncarcerationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Configuration for per-member locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Idle time after which an unheld lock may be evicted.
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_lock_sweep_secs")]
    pub sweep_interval_secs: u64,
}

fn default_lock_ttl_secs() -> u64 {
    3_600
}

fn default_lock_sweep_secs() -> u64 {
    600
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_lock_ttl_secs(),
            sweep_interval_secs: default_lock_sweep_secs(),
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Configuration for the message monitor and its sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub guard: GuardConfig,

    /// Rolling window for message timestamps.
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,

    /// Valid messages needed for activity promotion.
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: i64,

    /// Quiet period before stats are written.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,

    #[serde(default = "default_sweep_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_sweep_secs")]
    pub promotion_interval_secs: u64,
}

fn default_window_secs() -> i64 {
    7_200
}

fn default_promotion_threshold() -> i64 {
    50
}

fn default_save_debounce_ms() -> u64 {
    5_000
}

fn default_sweep_secs() -> u64 {
    3_600
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            guard: GuardConfig::default(),
            window_secs: default_window_secs(),
            promotion_threshold: default_promotion_threshold(),
            save_debounce_ms: default_save_debounce_ms(),
            cleanup_interval_secs: default_sweep_secs(),
            promotion_interval_secs: default_sweep_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub roles: RoleLayout,

    #[serde(default)]
    pub vetting: VettingConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub incarceration: IncarcerationConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Backoff for document loads and saves.
    #[serde(default)]
    pub store_retry: RetryPolicy,

    /// Forum whose new threads are vetting reviews.
    #[serde(default)]
    pub vetting_forum: Option<ChannelId>,

    /// Capacity of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl EngineConfig {
    pub fn new(roles: RoleLayout) -> Self {
        Self {
            roles,
            vetting: VettingConfig::default(),
            sync: SyncConfig::default(),
            incarceration: IncarcerationConfig::default(),
            locks: LockConfig::default(),
            monitor: MonitorConfig::default(),
            store_retry: RetryPolicy::default(),
            vetting_forum: None,
            event_capacity: default_event_capacity(),
        }
    }
}

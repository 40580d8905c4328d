//! Per-member mutation locks
//!
//! Every operation that reads a member's roles and then changes them holds
//! the member's lock for the whole sequence. Locks are created on first use
//! and evicted by [`MemberLocks::sweep`] once unheld and idle past the TTL.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;
use warden_types::MemberId;

#[derive(Debug)]
struct LockSlot {
    lock: Arc<Mutex<()>>,
    last_used: Instant,
}

/// Registry of per-member locks.
#[derive(Debug)]
pub struct MemberLocks {
    slots: DashMap<MemberId, LockSlot>,
    ttl: Duration,
}

/// Held lock for one member. Released on drop.
pub type MemberGuard = OwnedMutexGuard<()>;

impl MemberLocks {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
        }
    }

    /// Wait for and take the member's lock.
    pub async fn acquire(&self, member: MemberId) -> MemberGuard {
        let lock = {
            let mut slot = self.slots.entry(member).or_insert_with(|| LockSlot {
                lock: Arc::new(Mutex::new(())),
                last_used: Instant::now(),
            });
            slot.last_used = Instant::now();
            slot.lock.clone()
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits on that have been idle past the TTL.
    /// Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            Arc::strong_count(&slot.lock) > 1 || slot.last_used.elapsed() <= self.ttl
        });
        let evicted = before.saturating_sub(self.slots.len());
        debug!(evicted, remaining = self.slots.len(), "Member lock sweep");
        evicted
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

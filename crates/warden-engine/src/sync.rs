//! Verified role mutation
//!
//! A role change is issued as at most two directory calls (remove, then
//! add), after which the member is re-read until the directory reflects the
//! change or the attempt budget runs out.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use warden_types::{MemberId, RoleId};

use crate::config::SyncConfig;
use crate::directory::Directory;
use crate::error::{EngineError, EngineResult};

/// Roles to add and remove on one member.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDelta {
    pub add: BTreeSet<RoleId>,
    pub remove: BTreeSet<RoleId>,
}

impl RoleDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// The classic single swap: one role in, one role out.
    pub fn single(add: Option<RoleId>, remove: Option<RoleId>) -> Self {
        Self {
            add: add.into_iter().collect(),
            remove: remove.into_iter().collect(),
        }
    }

    pub fn adding(mut self, role: RoleId) -> Self {
        self.remove.remove(&role);
        self.add.insert(role);
        self
    }

    pub fn removing(mut self, role: RoleId) -> Self {
        self.add.remove(&role);
        self.remove.insert(role);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// The part of this delta `held` does not already satisfy.
    pub fn against(&self, held: &BTreeSet<RoleId>) -> RoleDelta {
        RoleDelta {
            add: self.add.difference(held).copied().collect(),
            remove: self.remove.intersection(held).copied().collect(),
        }
    }

    pub fn is_satisfied_by(&self, held: &BTreeSet<RoleId>) -> bool {
        self.add.is_subset(held) && self.remove.is_disjoint(held)
    }
}

/// Result of a verified role update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Authoritative roles after the update.
    pub roles: BTreeSet<RoleId>,
    /// Verification reads performed.
    pub attempts: u32,
    /// Directory write calls issued.
    pub writes: u32,
}

/// Applies role deltas and verifies them against the directory.
pub struct RoleSynchronizer {
    directory: Arc<dyn Directory>,
    config: SyncConfig,
}

impl RoleSynchronizer {
    pub fn new(directory: Arc<dyn Directory>, config: SyncConfig) -> Self {
        Self { directory, config }
    }

    /// Apply `delta` to `member`, whose roles are believed to be `known`.
    ///
    /// Exhausting the attempts yields [`EngineError::RoleSyncFailed`]; the
    /// caller must not advance its own state in that case.
    #[instrument(skip(self, delta, known), fields(member_id = %member))]
    pub async fn apply(
        &self,
        member: MemberId,
        delta: &RoleDelta,
        known: &BTreeSet<RoleId>,
        reason: &str,
    ) -> EngineResult<SyncOutcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut pending = delta.against(known);
        let mut writes = self.issue(member, &pending, reason).await;

        for attempt in 0..max_attempts {
            match self.directory.fetch_member(member).await {
                Ok(Some(snapshot)) => {
                    if delta.is_satisfied_by(&snapshot.roles) {
                        info!(attempt = attempt + 1, writes, "Role update verified");
                        return Ok(SyncOutcome {
                            roles: snapshot.roles,
                            attempts: attempt + 1,
                            writes,
                        });
                    }
                    pending = delta.against(&snapshot.roles);
                    warn!(
                        attempt = attempt + 1,
                        missing_add = ?pending.add,
                        lingering_remove = ?pending.remove,
                        "Role verification failed"
                    );
                }
                Ok(None) => return Err(EngineError::MemberNotFound(member)),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Role verification read failed");
                }
            }

            if attempt + 1 < max_attempts {
                writes += self.issue(member, &pending, reason).await;
                tokio::time::sleep(self.config.backoff(attempt)).await;
            }
        }

        Err(EngineError::RoleSyncFailed {
            member,
            attempts: max_attempts,
        })
    }

    /// Issue the removal and the addition; returns the number of calls made.
    /// Failures are logged and left for verification to catch.
    async fn issue(&self, member: MemberId, delta: &RoleDelta, reason: &str) -> u32 {
        let mut calls = 0;
        if !delta.remove.is_empty() {
            let roles: Vec<RoleId> = delta.remove.iter().copied().collect();
            calls += 1;
            match self.directory.remove_roles(member, &roles, reason).await {
                Ok(()) => debug!(roles = ?roles, "Roles removed"),
                Err(e) => warn!(roles = ?roles, error = %e, "Role removal failed"),
            }
        }
        if !delta.add.is_empty() {
            let roles: Vec<RoleId> = delta.add.iter().copied().collect();
            calls += 1;
            match self.directory.add_roles(member, &roles, reason).await {
                Ok(()) => debug!(roles = ?roles, "Roles added"),
                Err(e) => warn!(roles = ?roles, error = %e, "Role addition failed"),
            }
        }
        calls
    }
}

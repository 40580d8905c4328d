//! Vetting role catalog operations
//!
//! Reviewers hand out catalog roles (one per category) to applicants. Names
//! are resolved against the persisted catalog and the change goes through
//! the synchronizer under the member's lock.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, instrument};
use warden_store::Documents;
use warden_types::{MemberId, RoleAction, RoleCatalog, RoleId, WardenEvent};

use crate::directory::Directory;
use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;
use crate::locks::MemberLocks;
use crate::sync::{RoleDelta, RoleSynchronizer};

/// A role picked by category and name, e.g. `("domicile", "north")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSelection {
    pub category: String,
    pub name: String,
}

impl RoleSelection {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }
}

pub struct VettingRoleService {
    documents: Documents,
    directory: Arc<dyn Directory>,
    sync: Arc<RoleSynchronizer>,
    locks: Arc<MemberLocks>,
    events: EventBus,
}

impl VettingRoleService {
    pub fn new(
        documents: Documents,
        directory: Arc<dyn Directory>,
        sync: Arc<RoleSynchronizer>,
        locks: Arc<MemberLocks>,
        events: EventBus,
    ) -> Self {
        Self {
            documents,
            directory,
            sync,
            locks,
            events,
        }
    }

    pub async fn catalog(&self) -> EngineResult<RoleCatalog> {
        Ok(self.documents.load().await?)
    }

    /// Give or take catalog roles. Returns the role ids that were applied.
    #[instrument(skip(self, selections), fields(member_id = %member))]
    pub async fn apply(
        &self,
        member: MemberId,
        selections: &[RoleSelection],
        action: RoleAction,
    ) -> EngineResult<Vec<RoleId>> {
        let catalog = self.catalog().await?;
        let roles = resolve(&catalog, selections)?;

        let _guard = self.locks.acquire(member).await;
        let snapshot = self
            .directory
            .fetch_member(member)
            .await?
            .ok_or(EngineError::MemberNotFound(member))?;

        let mut delta = RoleDelta::new();
        for role in &roles {
            delta = match action {
                RoleAction::Add => delta.adding(*role),
                RoleAction::Remove => delta.removing(*role),
            };
        }

        if action.is_add() {
            if let Some(conflict) = catalog.find_conflict(&snapshot.roles, &delta.add) {
                return Err(EngineError::CategoryConflict {
                    category: conflict.category,
                    existing: conflict.existing.len(),
                    adding: conflict.adding.len(),
                });
            }
        }
        if delta.against(&snapshot.roles).is_empty() {
            return Err(EngineError::NothingChanged(match action {
                RoleAction::Add => "the member already has those roles".into(),
                RoleAction::Remove => "the member has none of those roles".into(),
            }));
        }

        let reason = match action {
            RoleAction::Add => "Vetting roles assigned",
            RoleAction::Remove => "Vetting roles removed",
        };
        self.sync
            .apply(member, &delta, &snapshot.roles, reason)
            .await?;

        let applied: Vec<RoleId> = roles.into_iter().collect();
        info!(%action, roles = ?applied, "Vetting roles updated");
        self.events.emit(WardenEvent::VettingRolesChanged {
            member_id: member,
            action,
            roles: applied.clone(),
        });
        Ok(applied)
    }
}

fn resolve(catalog: &RoleCatalog, selections: &[RoleSelection]) -> EngineResult<BTreeSet<RoleId>> {
    if selections.is_empty() {
        return Err(EngineError::NothingChanged("no roles selected".into()));
    }
    let assignable = catalog.assignable_role_ids();
    selections
        .iter()
        .map(|selection| {
            let id = catalog
                .resolve(&selection.category, &selection.name)
                .ok_or_else(|| {
                    EngineError::UnknownRole(format!("{}/{}", selection.category, selection.name))
                })?;
            if assignable.contains(&id) {
                Ok(id)
            } else {
                Err(EngineError::RoleNotAssignable(id))
            }
        })
        .collect()
}

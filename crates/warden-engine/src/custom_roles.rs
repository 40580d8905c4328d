//! Custom role registry
//!
//! Custom roles are local named groups used for mentions; they never touch
//! the directory.

use tracing::info;
use warden_store::Documents;
use warden_types::{split_role_names, CustomRoles, MemberId, RoleAction, WardenEvent};

use crate::error::{EngineError, EngineResult};
use crate::events::EventBus;

pub struct CustomRoleRegistry {
    documents: Documents,
    events: EventBus,
}

impl CustomRoleRegistry {
    pub fn new(documents: Documents, events: EventBus) -> Self {
        Self { documents, events }
    }

    /// Create or delete roles from a comma-separated list of names.
    /// Returns the names that actually changed.
    pub async fn configure(&self, names: &str, action: RoleAction) -> EngineResult<Vec<String>> {
        let requested = split_role_names(names);
        if requested.is_empty() {
            return Err(EngineError::NothingChanged("no role names given".into()));
        }

        let (_, changed) = self
            .documents
            .update(|roles: &mut CustomRoles| match action {
                RoleAction::Add => roles.add_roles(requested.iter().copied()),
                RoleAction::Remove => roles.remove_roles(requested.iter().copied()),
            })
            .await?;

        if changed.is_empty() {
            let reason = match action {
                RoleAction::Add => "all of those roles already exist",
                RoleAction::Remove => "none of those roles exist",
            };
            return Err(EngineError::NothingChanged(reason.into()));
        }

        info!(%action, names = ?changed, "Custom roles configured");
        self.events.emit(WardenEvent::CustomRolesChanged {
            action,
            names: changed.clone(),
        });
        Ok(changed)
    }

    /// Add `member` to or drop them from a role. Returns whether membership
    /// changed; dropping the last member deletes the role.
    pub async fn update_membership(
        &self,
        member: MemberId,
        name: &str,
        action: RoleAction,
    ) -> EngineResult<bool> {
        let name = name.trim();
        let (_, changed) = self
            .documents
            .update(|roles: &mut CustomRoles| roles.update_member(name, member, action.is_add()))
            .await?;
        let changed = changed.ok_or_else(|| EngineError::UnknownRole(name.to_string()))?;
        if changed {
            info!(member_id = %member, role = name, %action, "Custom role membership updated");
        }
        Ok(changed)
    }

    /// Members of a role, for building a mention.
    pub async fn members(&self, name: &str) -> EngineResult<Vec<MemberId>> {
        let name = name.trim();
        let roles: CustomRoles = self.documents.load().await?;
        roles
            .members(name)
            .map(|members| members.iter().copied().collect())
            .ok_or_else(|| EngineError::UnknownRole(name.to_string()))
    }

    pub async fn names(&self) -> EngineResult<Vec<String>> {
        let roles: CustomRoles = self.documents.load().await?;
        Ok(roles.names().map(str::to_string).collect())
    }
}

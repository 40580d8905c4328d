//! Vetting role catalog and custom role membership
//!
//! Both are persisted documents. The catalog names the roles reviewers may
//! hand out by category (ideology, domicile, status, ...); custom roles are
//! free-form named groups that only exist locally and are used for mentions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{MemberId, RoleId};

/// The `vetting-roles` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleCatalog {
    /// category -> role name -> role id
    pub assigned_roles: BTreeMap<String, BTreeMap<String, RoleId>>,

    /// authorized role name -> role id
    pub authorized_roles: BTreeMap<String, RoleId>,

    /// authorized role name -> role names it may assign
    pub assignable_roles: BTreeMap<String, Vec<String>>,
}

/// Two roles of one category would end up on the same member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryConflict {
    pub category: String,
    pub existing: BTreeSet<RoleId>,
    pub adding: BTreeSet<RoleId>,
}

impl RoleCatalog {
    /// Look up a role id by category and name.
    pub fn resolve(&self, category: &str, name: &str) -> Option<RoleId> {
        self.assigned_roles.get(category)?.get(name).copied()
    }

    /// Every catalog role whose name appears in some assignable list.
    pub fn assignable_role_ids(&self) -> BTreeSet<RoleId> {
        self.assigned_roles
            .values()
            .flat_map(|roles| roles.iter())
            .filter(|(name, _)| {
                self.assignable_roles
                    .values()
                    .any(|names| names.iter().any(|n| n == *name))
            })
            .map(|(_, id)| *id)
            .collect()
    }

    pub fn category_role_ids(&self, category: &str) -> BTreeSet<RoleId> {
        self.assigned_roles
            .get(category)
            .map(|roles| roles.values().copied().collect())
            .unwrap_or_default()
    }

    /// First category where the member already holds a role and the addition
    /// would leave them with more than one role of that category.
    pub fn find_conflict(
        &self,
        held: &BTreeSet<RoleId>,
        adding: &BTreeSet<RoleId>,
    ) -> Option<CategoryConflict> {
        self.assigned_roles.keys().find_map(|category| {
            let ids = self.category_role_ids(category);
            let existing: BTreeSet<RoleId> = held.intersection(&ids).copied().collect();
            let incoming: BTreeSet<RoleId> = adding.intersection(&ids).copied().collect();
            if existing.is_empty() || incoming.is_empty() {
                return None;
            }
            if existing.union(&incoming).count() > 1 {
                Some(CategoryConflict {
                    category: category.clone(),
                    existing,
                    adding: incoming,
                })
            } else {
                None
            }
        })
    }
}

/// The `custom-roles` document: role name -> members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomRoles(pub BTreeMap<String, BTreeSet<MemberId>>);

impl CustomRoles {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn members(&self, name: &str) -> Option<&BTreeSet<MemberId>> {
        self.0.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Create empty entries for names not yet present. Returns the new names.
    pub fn add_roles<'a, I>(&mut self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut added = Vec::new();
        for name in names {
            if !self.0.contains_key(name) {
                self.0.insert(name.to_string(), BTreeSet::new());
                added.push(name.to_string());
            }
        }
        added
    }

    /// Delete existing entries. Returns the removed names.
    pub fn remove_roles<'a, I>(&mut self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter(|name| self.0.remove(*name).is_some())
            .map(str::to_string)
            .collect()
    }

    /// Add or drop a member. Removing the last member deletes the role.
    ///
    /// Returns `None` when the role does not exist, otherwise whether the
    /// membership changed.
    pub fn update_member(&mut self, name: &str, member: MemberId, add: bool) -> Option<bool> {
        let members = self.0.get_mut(name)?;
        let changed = if add {
            members.insert(member)
        } else {
            members.remove(&member)
        };
        if !add && members.is_empty() {
            self.0.remove(name);
        }
        Some(changed)
    }
}

/// Split a comma-separated list of role names, trimming blanks.
pub fn split_role_names(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> RoleCatalog {
        let mut catalog = RoleCatalog::default();
        catalog.assigned_roles.insert(
            "ideology".into(),
            BTreeMap::from([("left".into(), RoleId::new(1)), ("right".into(), RoleId::new(2))]),
        );
        catalog.assigned_roles.insert(
            "domicile".into(),
            BTreeMap::from([("north".into(), RoleId::new(3))]),
        );
        catalog
            .assignable_roles
            .insert("reviewer".into(), vec!["left".into(), "north".into()]);
        catalog
    }

    #[test]
    fn test_resolve_and_assignable() {
        let catalog = catalog();
        assert_eq!(catalog.resolve("ideology", "right"), Some(RoleId::new(2)));
        assert_eq!(catalog.resolve("ideology", "centre"), None);
        assert_eq!(
            catalog.assignable_role_ids(),
            BTreeSet::from([RoleId::new(1), RoleId::new(3)])
        );
    }

    #[test]
    fn test_category_conflict() {
        let catalog = catalog();
        let held = BTreeSet::from([RoleId::new(1)]);

        let conflict = catalog
            .find_conflict(&held, &BTreeSet::from([RoleId::new(2)]))
            .unwrap();
        assert_eq!(conflict.category, "ideology");

        // Re-adding the held role, or a role in another category, is fine.
        assert!(catalog.find_conflict(&held, &held).is_none());
        assert!(catalog
            .find_conflict(&held, &BTreeSet::from([RoleId::new(3)]))
            .is_none());
    }

    #[test]
    fn test_custom_role_lifecycle() {
        let mut roles = CustomRoles::default();
        assert_eq!(roles.add_roles(split_role_names(" chess, go ,, ")), vec!["chess", "go"]);
        assert!(roles.add_roles(["chess"]).is_empty());

        let member = MemberId::new(5);
        assert_eq!(roles.update_member("chess", member, true), Some(true));
        assert_eq!(roles.update_member("chess", member, true), Some(false));
        assert_eq!(roles.update_member("poker", member, true), None);

        assert_eq!(roles.update_member("chess", member, false), Some(true));
        assert!(!roles.contains("chess"));

        assert_eq!(roles.remove_roles(["go", "poker"]), vec!["go"]);
        assert_eq!(roles.names().count(), 0);
    }

    #[test]
    fn test_custom_roles_document_shape() {
        let roles: CustomRoles = serde_json::from_str(r#"{"chess": [7, 8]}"#).unwrap();
        assert_eq!(roles.members("chess").map(|m| m.len()), Some(2));
    }
}

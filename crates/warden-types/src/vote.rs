//! Review votes and role actions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A reviewer's vote on a vetting thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Approve,
    Reject,
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteKind::Approve => f.write_str("approve"),
            VoteKind::Reject => f.write_str("reject"),
        }
    }
}

/// Add or remove, used by role configuration commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleAction {
    Add,
    Remove,
}

impl RoleAction {
    pub fn is_add(self) -> bool {
        matches!(self, RoleAction::Add)
    }
}

impl fmt::Display for RoleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleAction::Add => f.write_str("add"),
            RoleAction::Remove => f.write_str("remove"),
        }
    }
}

impl FromStr for RoleAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(RoleAction::Add),
            "remove" => Ok(RoleAction::Remove),
            other => Err(format!("unknown role action: {other:?}")),
        }
    }
}

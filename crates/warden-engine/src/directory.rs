//! Remote member directory
//!
//! The chat platform is the single source of truth for role membership.
//! Writes are acknowledged before they are visible, so callers re-read
//! after mutating (see [`crate::sync::RoleSynchronizer`]).

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use warden_types::{ChannelId, MemberId, RoleId, ThreadId};

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Directory errors.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    /// The platform answered with an error status.
    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The answer could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl DirectoryError {
    /// Whether trying again later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DirectoryError::Http { status, .. } => *status >= 500,
            DirectoryError::Transport(_) | DirectoryError::RateLimited { .. } => true,
            DirectoryError::Decode(_) => false,
        }
    }
}

/// A member as currently seen by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub id: MemberId,
    pub roles: BTreeSet<RoleId>,
    #[serde(default)]
    pub is_bot: bool,
}

impl MemberSnapshot {
    pub fn new(id: MemberId, roles: impl IntoIterator<Item = RoleId>) -> Self {
        Self {
            id,
            roles: roles.into_iter().collect(),
            is_bot: false,
        }
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub id: RoleId,
    pub name: String,
}

/// Operations the engine needs from the chat platform.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Fetch a member. `None` when they are not in the community.
    async fn fetch_member(&self, member: MemberId) -> DirectoryResult<Option<MemberSnapshot>>;

    async fn fetch_role(&self, role: RoleId) -> DirectoryResult<Option<RoleInfo>>;

    /// Owner of a review thread, i.e. the applicant.
    async fn fetch_thread_owner(&self, thread: ThreadId) -> DirectoryResult<Option<MemberId>>;

    async fn add_roles(&self, member: MemberId, roles: &[RoleId], reason: &str)
        -> DirectoryResult<()>;

    async fn remove_roles(
        &self,
        member: MemberId,
        roles: &[RoleId],
        reason: &str,
    ) -> DirectoryResult<()>;

    async fn send_message(&self, channel: ChannelId, content: &str) -> DirectoryResult<()>;
}

/// In-process directory for development and testing.
///
/// Role writes can be made to fail, or to be acknowledged without taking
/// effect, to exercise the synchronizer's verification path.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    members: RwLock<HashMap<MemberId, MemberSnapshot>>,
    roles: RwLock<HashMap<RoleId, RoleInfo>>,
    threads: RwLock<HashMap<ThreadId, MemberId>>,
    messages: RwLock<Vec<(ChannelId, String)>>,
    writes: AtomicU64,
    dropped_writes: AtomicU32,
    failed_writes: AtomicU32,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_member(&self, snapshot: MemberSnapshot) {
        self.members.write().await.insert(snapshot.id, snapshot);
    }

    pub async fn remove_member(&self, member: MemberId) {
        self.members.write().await.remove(&member);
    }

    pub async fn insert_role(&self, id: RoleId, name: impl Into<String>) {
        self.roles.write().await.insert(
            id,
            RoleInfo {
                id,
                name: name.into(),
            },
        );
    }

    pub async fn insert_thread(&self, thread: ThreadId, owner: MemberId) {
        self.threads.write().await.insert(thread, owner);
    }

    /// Current roles of a member, if present.
    pub async fn member_roles(&self, member: MemberId) -> Option<BTreeSet<RoleId>> {
        self.members
            .read()
            .await
            .get(&member)
            .map(|m| m.roles.clone())
    }

    pub async fn sent_messages(&self) -> Vec<(ChannelId, String)> {
        self.messages.read().await.clone()
    }

    /// Role writes issued so far, including dropped and failed ones.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Acknowledge the next `n` role writes without applying them.
    pub fn drop_next_writes(&self, n: u32) {
        self.dropped_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` role writes.
    pub fn fail_next_writes(&self, n: u32) {
        self.failed_writes.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn write_roles(&self, member: MemberId, roles: &[RoleId], add: bool) -> DirectoryResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.failed_writes) {
            return Err(DirectoryError::Http {
                status: 503,
                message: "injected failure".into(),
            });
        }
        if Self::take(&self.dropped_writes) {
            return Ok(());
        }

        let mut members = self.members.write().await;
        let snapshot = members.get_mut(&member).ok_or_else(|| DirectoryError::Http {
            status: 404,
            message: format!("unknown member {member}"),
        })?;
        for role in roles {
            if add {
                snapshot.roles.insert(*role);
            } else {
                snapshot.roles.remove(role);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn fetch_member(&self, member: MemberId) -> DirectoryResult<Option<MemberSnapshot>> {
        Ok(self.members.read().await.get(&member).cloned())
    }

    async fn fetch_role(&self, role: RoleId) -> DirectoryResult<Option<RoleInfo>> {
        Ok(self.roles.read().await.get(&role).cloned())
    }

    async fn fetch_thread_owner(&self, thread: ThreadId) -> DirectoryResult<Option<MemberId>> {
        Ok(self.threads.read().await.get(&thread).copied())
    }

    async fn add_roles(
        &self,
        member: MemberId,
        roles: &[RoleId],
        _reason: &str,
    ) -> DirectoryResult<()> {
        self.write_roles(member, roles, true).await
    }

    async fn remove_roles(
        &self,
        member: MemberId,
        roles: &[RoleId],
        _reason: &str,
    ) -> DirectoryResult<()> {
        self.write_roles(member, roles, false).await
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> DirectoryResult<()> {
        self.messages
            .write()
            .await
            .push((channel, content.to_string()));
        Ok(())
    }
}

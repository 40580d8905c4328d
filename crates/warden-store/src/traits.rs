//! Storage trait definitions

use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use warden_types::{CustomRoles, IncarcerationBook, RoleCatalog, StatsBook};

use crate::error::StoreResult;

/// The four persisted documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentKey {
    VettingRoles,
    CustomRoles,
    IncarcerationRecords,
    UserStats,
}

impl DocumentKey {
    pub const ALL: [DocumentKey; 4] = [
        DocumentKey::VettingRoles,
        DocumentKey::CustomRoles,
        DocumentKey::IncarcerationRecords,
        DocumentKey::UserStats,
    ];

    /// File name under the state directory.
    pub fn file_name(self) -> &'static str {
        match self {
            DocumentKey::VettingRoles => "vetting.json",
            DocumentKey::CustomRoles => "custom.json",
            DocumentKey::IncarcerationRecords => "incarcerated_members.json",
            DocumentKey::UserStats => "stats.json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKey::VettingRoles => "vetting-roles",
            DocumentKey::CustomRoles => "custom-roles",
            DocumentKey::IncarcerationRecords => "incarceration-records",
            DocumentKey::UserStats => "user-stats",
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw byte storage for documents.
///
/// Implementations serialize writes per key; a read issued after a write
/// completes observes that write.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document. `None` when it has never been written.
    async fn load_raw(&self, key: DocumentKey) -> StoreResult<Option<Vec<u8>>>;

    /// Replace a document.
    async fn save_raw(&self, key: DocumentKey, bytes: Vec<u8>) -> StoreResult<()>;
}

/// A typed document bound to its key.
pub trait Document: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    const KEY: DocumentKey;
}

impl Document for RoleCatalog {
    const KEY: DocumentKey = DocumentKey::VettingRoles;
}

impl Document for CustomRoles {
    const KEY: DocumentKey = DocumentKey::CustomRoles;
}

impl Document for IncarcerationBook {
    const KEY: DocumentKey = DocumentKey::IncarcerationRecords;
}

impl Document for StatsBook {
    const KEY: DocumentKey = DocumentKey::UserStats;
}

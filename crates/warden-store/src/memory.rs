//! In-memory storage implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::traits::{DocumentKey, DocumentStore};

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStore {
    docs: Arc<RwLock<HashMap<DocumentKey, Vec<u8>>>>,
    fail_loads: AtomicU32,
    fail_saves: AtomicU32,
    saves: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document with raw bytes, bypassing serialization.
    pub async fn put_raw(&self, key: DocumentKey, bytes: impl Into<Vec<u8>>) {
        self.docs.write().await.insert(key, bytes.into());
    }

    /// Current bytes of a document.
    pub async fn get_raw(&self, key: DocumentKey) -> Option<Vec<u8>> {
        self.docs.read().await.get(&key).cloned()
    }

    /// Make the next `n` loads fail.
    pub fn fail_next_loads(&self, n: u32) {
        self.fail_loads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` saves fail.
    pub fn fail_next_saves(&self, n: u32) {
        self.fail_saves.store(n, Ordering::SeqCst);
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn load_raw(&self, key: DocumentKey) -> StoreResult<Option<Vec<u8>>> {
        if Self::take_failure(&self.fail_loads) {
            return Err(StoreError::Backend {
                key,
                reason: "injected load failure".into(),
            });
        }
        Ok(self.docs.read().await.get(&key).cloned())
    }

    async fn save_raw(&self, key: DocumentKey, bytes: Vec<u8>) -> StoreResult<()> {
        if Self::take_failure(&self.fail_saves) {
            return Err(StoreError::Backend {
                key,
                reason: "injected save failure".into(),
            });
        }
        self.docs.write().await.insert(key, bytes);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

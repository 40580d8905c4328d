//! Typed document access with retry and tolerant loading

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::{Document, DocumentKey, DocumentStore};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

fn default_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Exponential backoff between store attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay before the second attempt; doubles each time
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Hard ceiling on a single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

/// Typed facade over a [`DocumentStore`].
///
/// Loads never fail because of bad content: a missing document is created
/// with its default, a malformed one goes through a lenient parse and, if
/// that also fails, is reset to its default. Only backend failures that
/// survive every retry are returned.
#[derive(Clone)]
pub struct Documents {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    update_locks: Arc<DashMap<DocumentKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Documents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Documents")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Documents {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            update_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load a document, creating or repairing it as needed.
    pub async fn load<T: Document>(&self) -> StoreResult<T> {
        let key = T::KEY;
        let raw = self
            .retrying(key, "load", || self.store.load_raw(key))
            .await?;

        let Some(bytes) = raw else {
            warn!(document = %key, "Document missing, creating default");
            let doc = T::default();
            self.save(&doc).await?;
            return Ok(doc);
        };

        match parse_document::<T>(&bytes) {
            Parsed::Clean(doc) => Ok(doc),
            Parsed::Recovered(doc) => {
                warn!(document = %key, "Document recovered by lenient parse");
                Ok(doc)
            }
            Parsed::Unreadable(reason) => {
                error!(document = %key, error = %reason, "Document unreadable, resetting to default");
                let doc = T::default();
                self.save(&doc).await?;
                Ok(doc)
            }
        }
    }

    /// Persist a document as pretty-printed JSON.
    pub async fn save<T: Document>(&self, doc: &T) -> StoreResult<()> {
        let key = T::KEY;
        let bytes = serde_json::to_vec_pretty(doc).map_err(|e| StoreError::Serialization {
            key,
            reason: e.to_string(),
        })?;
        self.retrying(key, "save", || self.store.save_raw(key, bytes.clone()))
            .await
    }

    /// Read-modify-write a document under its update lock.
    ///
    /// Concurrent updates of the same document are applied one after the
    /// other, each on top of the previous one's result. Returns the saved
    /// document together with the closure's output.
    pub async fn update<T, R, F>(&self, mutate: F) -> StoreResult<(T, R)>
    where
        T: Document,
        F: FnOnce(&mut T) -> R,
    {
        let lock = self
            .update_locks
            .entry(T::KEY)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let mut doc = self.load::<T>().await?;
        let out = mutate(&mut doc);
        self.save(&doc).await?;
        Ok((doc, out))
    }

    async fn retrying<T, F, Fut>(
        &self,
        key: DocumentKey,
        operation: &'static str,
        mut op: F,
    ) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        document = %key,
                        operation,
                        attempt = attempt + 1,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Store operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(document = %key, operation, attempts, error = %e, "Store operation failed");
                    return Err(StoreError::RetriesExhausted {
                        key,
                        operation,
                        attempts,
                        last: Box::new(e),
                    });
                }
            }
        }
    }
}

enum Parsed<T> {
    Clean(T),
    Recovered(T),
    Unreadable(String),
}

fn parse_document<T: Document>(bytes: &[u8]) -> Parsed<T> {
    let primary = match serde_json::from_slice::<T>(bytes) {
        Ok(doc) => return Parsed::Clean(doc),
        Err(e) => e,
    };

    // A BOM or trailing bytes from an interrupted write still leave the
    // first value readable.
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut stream = serde_json::Deserializer::from_slice(body).into_iter::<T>();
    match stream.next() {
        Some(Ok(doc)) => Parsed::Recovered(doc),
        _ => Parsed::Unreadable(primary.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use warden_types::{CustomRoles, IncarcerationBook, MemberId, StatsBook};

    fn documents() -> (Arc<InMemoryStore>, Documents) {
        let store = Arc::new(InMemoryStore::new());
        let docs = Documents::new(store.clone());
        (store, docs)
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_missing_document_is_created() {
        let (store, docs) = documents();
        let book: IncarcerationBook = docs.load().await.unwrap();
        assert!(book.is_empty());
        let raw = store.get_raw(DocumentKey::IncarcerationRecords).await.unwrap();
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&raw).unwrap(), serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_trailing_garbage_is_recovered() {
        let (store, docs) = documents();
        store
            .put_raw(DocumentKey::CustomRoles, "\u{feff}{\"chess\": [1]}}garbage")
            .await;
        let roles: CustomRoles = docs.load().await.unwrap();
        assert!(roles.members("chess").unwrap().contains(&MemberId::new(1)));
        // Recovery does not rewrite the document.
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_document_is_reset() {
        let (store, docs) = documents();
        store.put_raw(DocumentKey::UserStats, "[[[not json").await;
        let stats: StatsBook = docs.load().await.unwrap();
        assert!(stats.is_empty());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let (_store, docs) = documents();
        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let docs = docs.clone();
                tokio::spawn(async move {
                    docs.update(|roles: &mut CustomRoles| {
                        roles.add_roles([format!("role-{i}").as_str()])
                    })
                    .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let roles: CustomRoles = docs.load().await.unwrap();
        assert_eq!(roles.names().count(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let (store, docs) = documents();
        store.fail_next_saves(2);
        let started = tokio::time::Instant::now();
        docs.save(&CustomRoles::default()).await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_the_last_error() {
        let (store, docs) = documents();
        store.fail_next_loads(3);
        let err = docs.load::<CustomRoles>().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::RetriesExhausted { attempts: 3, operation: "load", .. }
        ));
    }
}

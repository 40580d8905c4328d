//! JSON file backend

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreResult;
use crate::traits::{DocumentKey, DocumentStore};

/// Stores each document as a file under a state directory.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write leaves the previous version intact.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    locks: DashMap<DocumentKey, Arc<Mutex<()>>>,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            locks: DashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: DocumentKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    fn lock_for(&self, key: DocumentKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn load_raw(&self, key: DocumentKey) -> StoreResult<Option<Vec<u8>>> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_raw(&self, key: DocumentKey, bytes: Vec<u8>) -> StoreResult<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(document = %key, bytes = bytes.len(), "Document written");
        Ok(())
    }
}

//! Monitor persistence.

use crate::types::{MonitorDocument, MonitorId, TimingUpdate};
use async_trait::async_trait;
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("monitor {0} not found")]
    NotFound(MonitorId),

    #[error("monitor {0} already exists")]
    Duplicate(MonitorId),

    #[error("store IO error: {0}")]
    Io(#[from] io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for monitor documents
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Every monitor, ordered by id
    async fn find_all(&self) -> Result<Vec<MonitorDocument>, StoreError>;

    async fn find_by_id(&self, id: &MonitorId) -> Result<MonitorDocument, StoreError>;

    async fn insert(&self, monitor: MonitorDocument) -> Result<(), StoreError>;

    async fn update_by_id(&self, id: &MonitorId, monitor: MonitorDocument) -> Result<(), StoreError>;

    /// Apply a timing change to the stored document and return the result.
    ///
    /// Concurrent edits to the rest of the document are preserved.
    async fn update_timing(&self, id: &MonitorId, update: TimingUpdate) -> Result<MonitorDocument, StoreError>;

    async fn remove_by_id(&self, id: &MonitorId) -> Result<(), StoreError>;
}

/// In-memory store, optionally mirrored to a JSON file
#[derive(Debug, Default)]
pub struct MemoryStore {
    monitors: DashMap<MonitorId, MonitorDocument>,
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `path` if it exists and write every change back to it
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let monitors = DashMap::new();

        match tokio::fs::read(&path).await {
            Ok(contents) => {
                let documents: Vec<MonitorDocument> = serde_json::from_slice(&contents)?;
                info!(path = %path.display(), count = documents.len(), "Loaded monitors");
                for document in documents {
                    monitors.insert(document.id, document);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No monitor file yet, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            monitors,
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    fn snapshot(&self) -> Vec<MonitorDocument> {
        let mut documents: Vec<_> = self.monitors.iter().map(|entry| entry.value().clone()).collect();
        documents.sort_by_key(|d| d.id);
        documents
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let contents = serde_json::to_vec_pretty(&self.snapshot())?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), "Persisted monitors");
        Ok(())
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn find_all(&self) -> Result<Vec<MonitorDocument>, StoreError> {
        Ok(self.snapshot())
    }

    async fn find_by_id(&self, id: &MonitorId) -> Result<MonitorDocument, StoreError> {
        self.monitors
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(*id))
    }

    async fn insert(&self, monitor: MonitorDocument) -> Result<(), StoreError> {
        match self.monitors.entry(monitor.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(StoreError::Duplicate(monitor.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(monitor);
            }
        }
        self.persist().await
    }

    async fn update_by_id(&self, id: &MonitorId, monitor: MonitorDocument) -> Result<(), StoreError> {
        match self.monitors.get_mut(id) {
            Some(mut entry) => *entry = monitor,
            None => return Err(StoreError::NotFound(*id)),
        }
        self.persist().await
    }

    async fn update_timing(&self, id: &MonitorId, update: TimingUpdate) -> Result<MonitorDocument, StoreError> {
        let updated = match self.monitors.get_mut(id) {
            Some(mut entry) => {
                update.apply(&mut entry);
                entry.value().clone()
            }
            None => return Err(StoreError::NotFound(*id)),
        };
        self.persist().await?;
        Ok(updated)
    }

    async fn remove_by_id(&self, id: &MonitorId) -> Result<(), StoreError> {
        if self.monitors.remove(id).is_none() {
            return Err(StoreError::NotFound(*id));
        }
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MonitorSpec;
    use std::time::Duration;
    use vigil::JobDocument;

    fn monitor() -> MonitorDocument {
        MonitorDocument::new(
            MonitorId::generate(),
            MonitorSpec {
                host: None,
                interval: Duration::from_secs(10),
                agent: JobDocument::new("noop", Duration::ZERO, serde_json::json!({})),
            },
        )
    }

    #[tokio::test]
    async fn test_crud() {
        let store = MemoryStore::new();
        let mut doc = monitor();

        store.insert(doc.clone()).await.unwrap();
        assert!(matches!(store.insert(doc.clone()).await, Err(StoreError::Duplicate(_))));

        doc.interval = Duration::from_secs(20);
        store.update_by_id(&doc.id, doc.clone()).await.unwrap();
        assert_eq!(store.find_by_id(&doc.id).await.unwrap().interval, Duration::from_secs(20));

        store.remove_by_id(&doc.id).await.unwrap();
        assert!(matches!(store.find_by_id(&doc.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.remove_by_id(&doc.id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.update_by_id(&doc.id, doc.clone()).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_timing_keeps_edits() {
        let store = MemoryStore::new();
        let mut doc = monitor();
        store.insert(doc.clone()).await.unwrap();

        doc.interval = Duration::from_secs(3600);
        store.update_by_id(&doc.id, doc.clone()).await.unwrap();

        let at = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let updated = store.update_timing(&doc.id, TimingUpdate::Reschedule(at)).await.unwrap();
        assert_eq!(updated.next_check, at);
        assert_eq!(updated.interval, Duration::from_secs(3600));

        let updated = store
            .update_timing(
                &doc.id,
                TimingUpdate::Completed {
                    tick: at,
                    result: vigil::CheckResult::ok("fine"),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.last_check, at);
        assert_eq!(updated.next_check, at + Duration::from_secs(3600));
        assert_eq!(store.find_by_id(&doc.id).await.unwrap(), updated);

        store.remove_by_id(&doc.id).await.unwrap();
        assert!(matches!(
            store.update_timing(&doc.id, TimingUpdate::Reschedule(at)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_all_sorted() {
        let store = MemoryStore::new();
        for _ in 0..5 {
            store.insert(monitor()).await.unwrap();
        }

        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_file_write_through() {
        let path = std::env::temp_dir().join(format!("vigil-store-{}.json", MonitorId::generate()));

        let doc = monitor();
        {
            let store = MemoryStore::open(&path).await.unwrap();
            assert!(store.is_empty());
            store.insert(doc.clone()).await.unwrap();
        }

        let reopened = MemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.find_by_id(&doc.id).await.unwrap(), doc);

        tokio::fs::remove_file(&path).await.unwrap();
    }
}

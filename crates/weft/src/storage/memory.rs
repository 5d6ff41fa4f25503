use super::ThreadStore;
use crate::error::{Result, ThreadError};
use crate::thread::{Thread, serializer};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// In-process store holding serialized snapshots.
///
/// Snapshots are kept as bytes so that a load always returns an independent
/// copy that went through the same encode/decode path as on disk.
#[derive(Default)]
pub struct MemoryThreadStore {
    threads: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.threads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.threads.read().await.is_empty()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn save(&self, id: &str, thread: &Thread) -> Result<()> {
        serializer::validate(thread).into_result()?;
        let bytes = serializer::serialize(thread)?;
        debug!("saving thread {id} ({} events, {} bytes)", thread.events.len(), bytes.len());
        self.threads.write().await.insert(id.to_string(), bytes);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Thread> {
        let guard = self.threads.read().await;
        let bytes = guard
            .get(id)
            .ok_or_else(|| ThreadError::NotFound(id.to_string()))?;
        serializer::deserialize(bytes)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.threads.write().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.threads.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.threads.read().await.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadManager;

    fn thread(id: &str) -> Thread {
        let mut mgr = ThreadManager::new(id);
        mgr.start_conversation("Plan the offsite").unwrap();
        mgr.into_thread()
    }

    #[tokio::test]
    async fn save_load_roundtrip() {
        let store = MemoryThreadStore::new();
        let t = thread("t1");
        store.save("t1", &t).await.unwrap();
        assert_eq!(store.load("t1").await.unwrap(), t);
        assert!(store.exists("t1").await.unwrap());
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let store = MemoryThreadStore::new();
        let err = store.load("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn invalid_thread_is_never_written() {
        let store = MemoryThreadStore::new();
        let mut t = thread("t1");
        t.events.clear();
        assert!(matches!(store.save("t1", &t).await, Err(ThreadError::Validation(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = MemoryThreadStore::new();
        let mut mgr = ThreadManager::new("t1");
        mgr.start_conversation("first").unwrap();
        store.save("t1", mgr.thread()).await.unwrap();
        mgr.add_assistant_message("second").unwrap();
        store.save("t1", mgr.thread()).await.unwrap();
        assert_eq!(store.load("t1").await.unwrap().events.len(), 3);
    }

    #[tokio::test]
    async fn list_is_sorted_and_delete_is_idempotent() {
        let store = MemoryThreadStore::new();
        for id in ["b", "a", "c"] {
            store.save(id, &thread(id)).await.unwrap();
        }
        assert_eq!(store.list().await.unwrap(), vec!["a", "b", "c"]);
        store.delete("b").await.unwrap();
        store.delete("b").await.unwrap();
        assert_eq!(store.len().await, 2);
    }
}

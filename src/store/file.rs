//! Local-storage fallback: a memory replica persisted to a JSON file.

use super::{MemoryStore, SharedStore, StoreEvent, StoreResult, StoreSnapshot, Subscription};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct FileStore {
    file: PathBuf,
    memory: MemoryStore,
    /// Serializes snapshot writes; every put shares one temp file
    writer: Mutex<()>,
}

impl FileStore {
    /// Open the store at `file`, loading the previous snapshot if one exists
    pub async fn open(file: impl AsRef<Path>, replica: impl Into<String>) -> StoreResult<Self> {
        let file = file.as_ref().to_path_buf();
        let memory = MemoryStore::new(replica);

        match tokio::fs::read(&file).await {
            Ok(bytes) => {
                let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
                tracing::info!(
                    "Loaded store snapshot from {} ({} nodes, exported {})",
                    file.display(),
                    snapshot.nodes.len(),
                    snapshot.exported_at
                );
                memory.restore(snapshot).await?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No store snapshot at {}, starting empty", file.display());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            file,
            memory,
            writer: Mutex::new(()),
        })
    }

    async fn persist(&self) -> StoreResult<()> {
        let _writer = self.writer.lock().await;
        let snapshot = self.memory.snapshot().await;
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = self.file.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.file).await?;
        Ok(())
    }
}

#[async_trait]
impl SharedStore for FileStore {
    async fn put(&self, path: &str, value: Value) -> StoreResult<()> {
        self.memory.put(path, value).await?;
        self.persist().await
    }

    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        self.memory.get(path).await
    }

    async fn on(&self, path: &str) -> StoreResult<Subscription> {
        self.memory.on(path).await
    }

    async fn once(&self, path: &str) -> StoreResult<Vec<StoreEvent>> {
        self.memory.once(path).await
    }

    async fn off(&self, path: &str) {
        self.memory.off(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("calcchat.json");

        {
            let store = FileStore::open(&file, "local").await.unwrap();
            store
                .put("messages/lobby/01", json!({ "text": "hello" }))
                .await
                .unwrap();
            store
                .put("wordle", json!({ "active": true, "word": "CRANE" }))
                .await
                .unwrap();
        }

        let reopened = FileStore::open(&file, "local").await.unwrap();
        assert_eq!(
            reopened.get("messages/lobby/01/text").await.unwrap(),
            Some(json!("hello"))
        );
        assert_eq!(
            reopened.get("wordle/word").await.unwrap(),
            Some(json!("CRANE"))
        );

        // New writes still win over restored stamps
        reopened
            .put("wordle", json!({ "active": false, "word": null }))
            .await
            .unwrap();
        assert_eq!(reopened.get("wordle/word").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_puts_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("calcchat.json");
        let store = std::sync::Arc::new(FileStore::open(&file, "local").await.unwrap());

        let writers: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put(&format!("messages/lobby/{:02}", i), json!({ "text": i }))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }
        drop(store);

        let reopened = FileStore::open(&file, "local").await.unwrap();
        assert_eq!(reopened.once("messages/lobby").await.unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_file_store_starts_empty_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("missing.json"), "local")
            .await
            .unwrap();
        assert!(store.once("messages").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("corrupt.json");
        tokio::fs::write(&file, b"not json").await.unwrap();

        assert!(FileStore::open(&file, "local").await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_write_fails_when_directory_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("store.json");
        let store = FileStore::open(&file, "local").await.unwrap();

        let result = store.put("wordle", json!({ "active": true })).await;
        assert!(result.is_err());
    }
}

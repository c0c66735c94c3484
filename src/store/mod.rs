//! Shared key-value store contract.
//!
//! Every client of the chat holds a replica of the same hierarchical store.
//! Nodes are addressed by `/`-separated paths and hold a set of fields; each
//! field is an independent last-write-wins register. The game coordinator only
//! ever talks to the [`SharedStore`] trait, so the same game logic runs against
//! the in-memory replica, the file-backed local fallback, or any other adapter.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, StampedWrite, StoreSnapshot};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by store adapters
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
}

/// Write stamp used for last-write-wins conflict resolution.
///
/// Ordered by logical clock first, then by replica id so that two writes with
/// the same clock still resolve identically on every replica.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub clock: u64,
    pub replica: String,
}

/// A change notification delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    /// Full path of the node that changed
    pub path: String,
    /// Last segment of `path`
    pub key: String,
    /// Current live fields of the node, `None` once every field is deleted
    pub value: Option<Value>,
}

/// Live subscription created by [`SharedStore::on`].
///
/// Ends (yields `None`) once the store detaches it through [`SharedStore::off`].
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<StoreEvent>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<StoreEvent>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    /// Drain whatever is already queued without waiting
    pub fn drain(&mut self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// The four-operation store contract the game logic is written against.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Upsert `value` at `path`.
    ///
    /// Objects merge field by field into the node at `path` and a `null`
    /// field deletes that field. A scalar sets the field named by the last
    /// segment on the parent node. A bare `null` deletes the node and every
    /// node beneath it.
    async fn put(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Current value of a node, or of a single field
    async fn get(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Subscribe to every node rooted at `path`, past and future
    async fn on(&self, path: &str) -> StoreResult<Subscription>;

    /// One-shot read of every live node rooted at `path`
    async fn once(&self, path: &str) -> StoreResult<Vec<StoreEvent>>;

    /// Detach all subscriptions rooted at or beneath `path`
    async fn off(&self, path: &str);
}

/// Write with a single retry after `delay`.
///
/// Store writes are fire-and-forget from the game's point of view: the same
/// payload is retried once and a second failure is only logged and returned.
pub async fn put_with_retry(
    store: &dyn SharedStore,
    path: &str,
    value: Value,
    delay: Duration,
) -> StoreResult<()> {
    match store.put(path, value.clone()).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::warn!("Write to '{}' failed, retrying in {:?}: {}", path, delay, e);
            tokio::time::sleep(delay).await;
            store.put(path, value).await.map_err(|e| {
                tracing::error!("Write to '{}' failed after retry: {}", path, e);
                e
            })
        }
    }
}

/// Path helpers shared by adapters and callers
pub mod path {
    use super::{StoreError, StoreResult};

    /// Validate a path and return its segments
    pub fn segments(path: &str) -> StoreResult<Vec<&str>> {
        if path.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        let parts: Vec<&str> = path.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(parts)
    }

    pub fn join(parent: &str, child: &str) -> String {
        format!("{}/{}", parent, child)
    }

    /// Last segment of a path
    pub fn key(path: &str) -> &str {
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Parent path, `None` for a root segment
    pub fn parent(path: &str) -> Option<&str> {
        path.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// True when `path` is `root` itself or lies beneath it
    pub fn is_within(path: &str, root: &str) -> bool {
        path == root
            || (path.len() > root.len()
                && path.starts_with(root)
                && path.as_bytes()[root.len()] == b'/')
    }

    /// A single segment must not contain the separator
    pub fn is_valid_segment(segment: &str) -> bool {
        !segment.is_empty() && !segment.contains('/')
    }
}

use super::{path, Stamp, StoreError, StoreEvent, StoreResult, SharedStore, Subscription};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, Mutex};

/// Snapshot format version
/// Version 1: nodes with per-field stamps
/// Version 2: subtree delete stamps
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 2;

/// One last-write-wins register. A `null` value is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub value: Value,
    pub stamp: Stamp,
}

type Node = BTreeMap<String, FieldEntry>;

/// A write together with the stamp it was issued under.
///
/// Replicas exchange these; applying the same write twice, or applying an
/// older write after a newer one, leaves the store unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedWrite {
    pub path: String,
    pub value: Value,
    pub stamp: Stamp,
}

/// Serializable copy of the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub schema_version: u32,
    /// Export timestamp (ISO8601)
    pub exported_at: String,
    pub clock: u64,
    pub nodes: BTreeMap<String, BTreeMap<String, FieldEntry>>,
    /// Newest bare-`null` delete per path
    #[serde(default)]
    pub deletes: BTreeMap<String, Stamp>,
}

struct Subscriber {
    root: String,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    /// Subtree tombstones: writes at or below a path older than its stamp lose
    deletes: BTreeMap<String, Stamp>,
    clock: u64,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn node_value(&self, node_path: &str) -> Option<Value> {
        let node = self.nodes.get(node_path)?;
        let live: Map<String, Value> = node
            .iter()
            .filter(|(_, f)| !f.value.is_null())
            .map(|(k, f)| (k.clone(), f.value.clone()))
            .collect();
        if live.is_empty() {
            None
        } else {
            Some(Value::Object(live))
        }
    }

    fn event(&self, node_path: &str) -> StoreEvent {
        StoreEvent {
            path: node_path.to_string(),
            key: path::key(node_path).to_string(),
            value: self.node_value(node_path),
        }
    }

    fn events_within(&self, root: &str) -> Vec<StoreEvent> {
        self.nodes
            .keys()
            .filter(|p| path::is_within(p, root))
            .map(|p| self.event(p))
            .filter(|e| e.value.is_some())
            .collect()
    }

    /// True when a subtree delete at or above `node_path` outranks `stamp`
    fn shadowed(&self, node_path: &str, stamp: &Stamp) -> bool {
        self.deletes
            .iter()
            .any(|(root, deleted)| deleted >= stamp && path::is_within(node_path, root))
    }

    /// Merge one field, returning true when its live value changed
    fn merge_field(&mut self, node_path: &str, key: &str, value: Value, stamp: &Stamp) -> bool {
        if self.shadowed(node_path, stamp) {
            return false;
        }
        let node = self.nodes.entry(node_path.to_string()).or_default();
        let (replace, changed) = match node.get(key) {
            Some(existing) if existing.stamp >= *stamp => (false, false),
            Some(existing) => (true, existing.value != value),
            // A delete of an unseen field still leaves a tombstone
            None => (true, !value.is_null()),
        };
        if replace {
            node.insert(
                key.to_string(),
                FieldEntry {
                    value,
                    stamp: stamp.clone(),
                },
            );
        }
        changed
    }

    /// Apply a stamped write and return the node paths that changed
    fn apply(&mut self, write: &StampedWrite) -> StoreResult<Vec<String>> {
        path::segments(&write.path)?;
        self.clock = self.clock.max(write.stamp.clock);

        let mut changed = Vec::new();
        match &write.value {
            Value::Object(fields) => {
                let mut any = false;
                for (key, value) in fields {
                    any |= self.merge_field(&write.path, key, value.clone(), &write.stamp);
                }
                if any {
                    changed.push(write.path.clone());
                }
            }
            Value::Null => {
                let newest = match self.deletes.get(&write.path) {
                    Some(existing) if *existing >= write.stamp => existing.clone(),
                    _ => write.stamp.clone(),
                };
                self.deletes.insert(write.path.clone(), newest);
                let doomed: Vec<(String, Vec<String>)> = self
                    .nodes
                    .iter()
                    .filter(|(p, _)| path::is_within(p, &write.path))
                    .map(|(p, node)| (p.clone(), node.keys().cloned().collect()))
                    .collect();
                for (node_path, keys) in doomed {
                    let mut any = false;
                    for key in keys {
                        any |= self.merge_field(&node_path, &key, Value::Null, &write.stamp);
                    }
                    if any {
                        changed.push(node_path);
                    }
                }
            }
            scalar => {
                let parent = path::parent(&write.path)
                    .ok_or_else(|| StoreError::InvalidPath(write.path.clone()))?;
                let key = path::key(&write.path);
                if self.merge_field(parent, key, scalar.clone(), &write.stamp) {
                    changed.push(parent.to_string());
                }
            }
        }
        Ok(changed)
    }

    fn notify(&mut self, changed: &[String]) {
        for node_path in changed {
            let event = self.event(node_path);
            self.subscribers.retain(|sub| {
                if path::is_within(node_path, &sub.root) {
                    sub.tx.send(event.clone()).is_ok()
                } else {
                    !sub.tx.is_closed()
                }
            });
        }
    }
}

/// In-memory replica with last-write-wins fields and a Lamport clock.
///
/// Deterministic: the same sequence of writes always produces the same
/// state and the same events, which makes concurrent game scenarios
/// reproducible in tests via [`MemoryStore::apply`].
pub struct MemoryStore {
    replica: String,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(replica: impl Into<String>) -> Self {
        Self {
            replica: replica.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Issue a local write and return it stamped, ready to ship to peers
    pub async fn put_stamped(&self, path: &str, value: Value) -> StoreResult<StampedWrite> {
        let mut inner = self.inner.lock().await;
        let write = StampedWrite {
            path: path.to_string(),
            value,
            stamp: Stamp {
                clock: inner.clock + 1,
                replica: self.replica.clone(),
            },
        };
        let changed = inner.apply(&write)?;
        tracing::debug!(
            "put {} @{} changed {} node(s)",
            path,
            write.stamp.clock,
            changed.len()
        );
        inner.notify(&changed);
        Ok(write)
    }

    /// Apply a write issued by another replica.
    ///
    /// Returns true when at least one node changed.
    pub async fn apply(&self, write: &StampedWrite) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let changed = inner.apply(write)?;
        inner.notify(&changed);
        Ok(!changed.is_empty())
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock().await;
        StoreSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            clock: inner.clock,
            nodes: inner.nodes.clone(),
            deletes: inner.deletes.clone(),
        }
    }

    /// Replace the contents with a snapshot, keeping live subscriptions
    pub async fn restore(&self, snapshot: StoreSnapshot) -> StoreResult<()> {
        if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                found: snapshot.schema_version,
                supported: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        let mut inner = self.inner.lock().await;
        let changed: Vec<String> = inner
            .nodes
            .keys()
            .chain(snapshot.nodes.keys())
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        inner.nodes = snapshot.nodes;
        inner.deletes = snapshot.deletes;
        inner.clock = inner.clock.max(snapshot.clock);
        inner.notify(&changed);
        Ok(())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn put(&self, path: &str, value: Value) -> StoreResult<()> {
        self.put_stamped(path, value).await.map(|_| ())
    }

    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        path::segments(path)?;
        let inner = self.inner.lock().await;
        if let Some(value) = inner.node_value(path) {
            return Ok(Some(value));
        }
        let field = path::parent(path)
            .and_then(|parent| inner.nodes.get(parent))
            .and_then(|node| node.get(path::key(path)))
            .filter(|f| !f.value.is_null())
            .map(|f| f.value.clone());
        Ok(field)
    }

    async fn on(&self, path: &str) -> StoreResult<Subscription> {
        path::segments(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        for event in inner.events_within(path) {
            // Receiver is alive: it is returned below
            let _ = tx.send(event);
        }
        inner.subscribers.push(Subscriber {
            root: path.to_string(),
            tx,
        });
        Ok(Subscription::new(rx))
    }

    async fn once(&self, path: &str) -> StoreResult<Vec<StoreEvent>> {
        path::segments(path)?;
        Ok(self.inner.lock().await.events_within(path))
    }

    async fn off(&self, path: &str) {
        let mut inner = self.inner.lock().await;
        let before = inner.subscribers.len();
        inner
            .subscribers
            .retain(|sub| !path::is_within(&sub.root, path));
        tracing::debug!(
            "off {} detached {} subscription(s)",
            path,
            before - inner.subscribers.len()
        );
    }
}

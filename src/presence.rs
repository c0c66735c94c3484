//! Who is currently connected.

use crate::store::{path, put_with_retry, SharedStore, StoreResult};
use crate::types::Username;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const PRESENCE_ROOT: &str = "presence";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceEntry {
    pub online: bool,
    /// ISO timestamp of the last heartbeat
    pub last_seen: String,
}

pub async fn announce(
    store: &dyn SharedStore,
    username: &str,
    retry_delay: Duration,
) -> StoreResult<()> {
    put_with_retry(
        store,
        &path::join(PRESENCE_ROOT, username),
        json!({ "online": true, "last_seen": Utc::now().to_rfc3339() }),
        retry_delay,
    )
    .await
}

pub async fn leave(
    store: &dyn SharedStore,
    username: &str,
    retry_delay: Duration,
) -> StoreResult<()> {
    put_with_retry(
        store,
        &path::join(PRESENCE_ROOT, username),
        json!({ "online": false, "last_seen": Utc::now().to_rfc3339() }),
        retry_delay,
    )
    .await
}

/// Users marked online whose last heartbeat is within `window` of `now`
pub async fn online_users_at(
    store: &dyn SharedStore,
    window: Duration,
    now: DateTime<Utc>,
) -> StoreResult<Vec<Username>> {
    let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(3650));
    let mut users: Vec<Username> = store
        .once(PRESENCE_ROOT)
        .await?
        .into_iter()
        .filter(|event| event.path != PRESENCE_ROOT)
        .filter_map(|event| {
            let entry: PresenceEntry = serde_json::from_value(event.value?).ok()?;
            let seen = DateTime::parse_from_rfc3339(&entry.last_seen)
                .ok()?
                .with_timezone(&Utc);
            (entry.online && now.signed_duration_since(seen) <= window).then_some(event.key)
        })
        .collect();
    users.sort();
    Ok(users)
}

pub async fn online_users(store: &dyn SharedStore, window: Duration) -> StoreResult<Vec<Username>> {
    online_users_at(store, window, Utc::now()).await
}

/// Refresh `username`'s heartbeat every `interval` until aborted
pub fn spawn_heartbeat(
    store: Arc<dyn SharedStore>,
    username: Username,
    interval: Duration,
    retry_delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = announce(store.as_ref(), &username, retry_delay).await {
                tracing::warn!("Presence heartbeat for {} failed: {}", username, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_announce_and_leave() {
        let store = MemoryStore::new("test");
        let delay = Duration::from_millis(1);
        announce(&store, "bob", delay).await.unwrap();
        announce(&store, "alice", delay).await.unwrap();

        let online = online_users(&store, Duration::from_secs(60)).await.unwrap();
        assert_eq!(online, vec!["alice", "bob"]);

        leave(&store, "bob", delay).await.unwrap();
        let online = online_users(&store, Duration::from_secs(60)).await.unwrap();
        assert_eq!(online, vec!["alice"]);
    }

    #[tokio::test]
    async fn test_stale_heartbeat_is_offline() {
        let store = MemoryStore::new("test");
        announce(&store, "alice", Duration::from_millis(1)).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(120);
        let online = online_users_at(&store, Duration::from_secs(60), later)
            .await
            .unwrap();
        assert!(online.is_empty());
    }
}

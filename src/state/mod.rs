use crate::config::{AppConfig, StoreBackend};
use crate::game::Coordinator;
use crate::store::{FileStore, MemoryStore, SharedStore, StoreResult};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The store every connection's coordinator talks to
    pub store: Arc<dyn SharedStore>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn SharedStore>, config: AppConfig) -> Self {
        Self { store, config }
    }

    /// Open the configured store backend
    pub async fn from_config(config: AppConfig) -> StoreResult<Self> {
        let replica = ulid::Ulid::new().to_string();
        let store: Arc<dyn SharedStore> = match &config.store {
            StoreBackend::Memory => {
                tracing::info!("Using in-memory store (replica {})", replica);
                Arc::new(MemoryStore::new(replica))
            }
            StoreBackend::File(file) => {
                tracing::info!("Using file store at {}", file.display());
                Arc::new(FileStore::open(file, replica).await?)
            }
        };
        Ok(Self::new(store, config))
    }

    /// Game coordinator acting on behalf of `username`
    pub fn coordinator(&self, username: &str) -> Arc<Coordinator> {
        Arc::new(Coordinator::new(
            username,
            self.store.clone(),
            self.config.game.clone(),
        ))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new("local")), AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, ImposterStatus};

    #[tokio::test]
    async fn test_coordinators_share_the_store() {
        let state = AppState::default();
        let alice = state.coordinator("alice");
        let bob = state.coordinator("bob");

        alice.handle_line(&Channel::Lobby, "/imposter").await.unwrap();
        let session = bob.imposter_session().await.unwrap();
        assert_eq!(session.status, ImposterStatus::Lobby);
    }

    #[tokio::test]
    async fn test_from_config_opens_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("chat.json");
        let config = AppConfig {
            store: StoreBackend::File(file.clone()),
            ..Default::default()
        };

        let state = AppState::from_config(config.clone()).await.unwrap();
        state.coordinator("alice")
            .handle_line(&Channel::Lobby, "hello")
            .await
            .unwrap();

        // A second process sees the persisted history
        let reopened = AppState::from_config(config).await.unwrap();
        let history = reopened
            .coordinator("bob")
            .relay()
            .history(&Channel::Lobby)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hello");
    }
}

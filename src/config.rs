//! Runtime configuration loaded from environment variables

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be a socket address, got '{value}'")]
    InvalidAddr { var: &'static str, value: String },

    #[error("CALCCHAT_STORE must be 'memory' or 'file:<path>', got '{0}'")]
    InvalidStore(String),
}

/// Which store adapter backs the server
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    /// Local JSON snapshot at the given path
    File(PathBuf),
}

impl StoreBackend {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "" | "memory" => Ok(StoreBackend::Memory),
            other => match other.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Ok(StoreBackend::File(PathBuf::from(path))),
                _ => Err(ConfigError::InvalidStore(other.to_string())),
            },
        }
    }
}

/// Game timing and rule knobs
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub discussion_seconds: u64,
    pub min_players: usize,
    pub wordle_reveal_delay: Duration,
    pub write_retry_delay: Duration,
    pub presence_interval: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            discussion_seconds: 60,
            min_players: 3,
            wordle_reveal_delay: Duration::from_millis(3000),
            write_retry_delay: Duration::from_millis(500),
            presence_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub addr: SocketAddr,
    pub store: StoreBackend,
    pub game: GameConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            store: StoreBackend::Memory,
            game: GameConfig::default(),
        }
    }
}

fn read_var(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_u64(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match read_var(var) {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        None => Ok(None),
    }
}

/// Apply `f` to a parsed value, keeping the default on error
fn apply_u64(var: &'static str, f: impl FnOnce(u64)) {
    match parse_u64(var) {
        Ok(Some(v)) => f(v),
        Ok(None) => {}
        Err(e) => tracing::warn!("{}; using default", e),
    }
}

impl AppConfig {
    /// Load config from environment variables, falling back to defaults
    /// for anything unset or invalid
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = read_var("CALCCHAT_ADDR") {
            match value.parse::<SocketAddr>() {
                Ok(addr) => config.addr = addr,
                Err(_) => tracing::warn!(
                    "{}; using default",
                    ConfigError::InvalidAddr {
                        var: "CALCCHAT_ADDR",
                        value
                    }
                ),
            }
        }

        if let Some(value) = read_var("CALCCHAT_STORE") {
            match StoreBackend::parse(&value) {
                Ok(store) => config.store = store,
                Err(e) => tracing::warn!("{}; using in-memory store", e),
            }
        }

        let game = &mut config.game;
        apply_u64("CALCCHAT_DISCUSSION_SECONDS", |v| game.discussion_seconds = v);
        apply_u64("CALCCHAT_MIN_PLAYERS", |v| game.min_players = v.max(1) as usize);
        apply_u64("CALCCHAT_WORDLE_REVEAL_DELAY_MS", |v| {
            game.wordle_reveal_delay = Duration::from_millis(v)
        });
        apply_u64("CALCCHAT_WRITE_RETRY_MS", |v| {
            game.write_retry_delay = Duration::from_millis(v)
        });
        apply_u64("CALCCHAT_PRESENCE_INTERVAL_SECS", |v| {
            game.presence_interval = Duration::from_secs(v.max(1))
        });

        config
    }
}

// Public API for integration tests and potential library usage

pub mod api;
pub mod config;
pub mod game;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;

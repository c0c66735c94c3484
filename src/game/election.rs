//! Coordination-free choice of the one client that performs a transition.
//!
//! Every client sees the same player set, so every client computes the same
//! leader without exchanging messages. If the leader disconnects the
//! transition is never performed; players recover with a cancel command.

use crate::types::Player;

/// Lexicographically first username, `None` for an empty game
pub fn elect_leader(players: &[Player]) -> Option<&str> {
    players.iter().map(|p| p.username.as_str()).min()
}

/// Whether `username` is the elected executor for `players`
pub fn is_leader(players: &[Player], username: &str) -> bool {
    elect_leader(players) == Some(username)
}

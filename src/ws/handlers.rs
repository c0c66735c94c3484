//! WebSocket message dispatch
//!
//! Client requests are routed to the connection's game coordinator; game
//! state changes observed in the store are turned into private updates.

use crate::game::{Coordinator, GameError, LineOutcome};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::*;

use super::is_valid_username;

fn bad_recipient(recipient: &str) -> ServerMessage {
    ServerMessage::Error {
        code: "INVALID_RECIPIENT".to_string(),
        msg: format!("Cannot message '{}'", recipient),
    }
}

fn channel_for(coordinator: &Coordinator, recipient: Option<&str>) -> Result<Channel, ServerMessage> {
    match recipient {
        Some(r) if !is_valid_username(r) => Err(bad_recipient(r)),
        other => Ok(Channel::for_recipient(coordinator.username(), other)),
    }
}

/// Turn a game error into the private reply, if the user should see one
fn game_error_reply(e: GameError) -> Option<ServerMessage> {
    if e.is_user_facing() {
        tracing::warn!("Rejected: {}", e);
        Some(ServerMessage::Notice {
            text: e.to_string(),
        })
    } else {
        tracing::error!("Game action failed: {:?}", e);
        None
    }
}

/// Handle client messages and return optional response
pub async fn handle_message(msg: ClientMessage, coordinator: &Coordinator) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Say { text, recipient } => {
            let channel = match channel_for(coordinator, recipient.as_deref()) {
                Ok(channel) => channel,
                Err(reply) => return Some(reply),
            };
            if text.trim().is_empty() {
                return None;
            }
            match coordinator.handle_line(&channel, text.trim()).await {
                Ok(LineOutcome::Command { notice }) => notice.map(|text| ServerMessage::Notice { text }),
                Ok(LineOutcome::Clue) | Ok(LineOutcome::Chat) => None,
                Err(e) => game_error_reply(e),
            }
        }

        ClientMessage::React {
            message_id,
            emoji,
            recipient,
        } => {
            let channel = match channel_for(coordinator, recipient.as_deref()) {
                Ok(channel) => channel,
                Err(reply) => return Some(reply),
            };
            if emoji.is_empty() || emoji.contains('/') {
                return Some(ServerMessage::Error {
                    code: "INVALID_EMOJI".to_string(),
                    msg: "Invalid reaction".to_string(),
                });
            }

            let relay = coordinator.relay();
            let known = match relay.history(&channel).await {
                Ok(history) => history.iter().any(|m| m.id == message_id),
                Err(e) => {
                    tracing::error!("Failed to read {} history: {}", channel.key(), e);
                    return None;
                }
            };
            if !known {
                return Some(ServerMessage::Error {
                    code: "NOT_FOUND".to_string(),
                    msg: format!("No message {} in this chat", message_id),
                });
            }

            // The reactions feed delivers the new totals
            if let Err(e) = relay.react(&message_id, coordinator.username(), &emoji).await {
                tracing::error!("Failed to react: {}", e);
            }
            None
        }

        ClientMessage::History { recipient } => {
            let channel = match channel_for(coordinator, recipient.as_deref()) {
                Ok(channel) => channel,
                Err(reply) => return Some(reply),
            };
            match coordinator.relay().history(&channel).await {
                Ok(messages) => Some(ServerMessage::History {
                    channel: channel.key(),
                    messages,
                }),
                Err(e) => {
                    tracing::error!("Failed to read {} history: {}", channel.key(), e);
                    None
                }
            }
        }
    }
}

/// What this connection has already been told about the Imposter game
#[derive(Debug, Default)]
pub struct RevealTracker {
    revealed: Option<Assignment>,
    in_game: bool,
}

/// Private updates after the Imposter session changed: the role reveal
/// (once per assignment) and a reset notice when the game ends.
pub async fn game_updates(coordinator: &Coordinator, tracker: &mut RevealTracker) -> Vec<ServerMessage> {
    let session = match coordinator.imposter_session().await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to read game session: {}", e);
            return Vec::new();
        }
    };

    let mut updates = Vec::new();
    if session.status == ImposterStatus::Idle {
        if tracker.in_game {
            updates.push(ServerMessage::GameReset);
        }
        *tracker = RevealTracker::default();
        return updates;
    }
    tracker.in_game = true;

    if session.assignment.is_some() && session.assignment != tracker.revealed {
        if let Some(me) = session.player(coordinator.username()) {
            if let (Some(role), Some(topic)) = (me.role, me.topic.clone()) {
                updates.push(ServerMessage::RoleAssignment {
                    role: role.display_name().to_string(),
                    topic,
                });
            }
        }
        tracker.revealed = session.assignment.clone();
    }
    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::store::{MemoryStore, SharedStore};
    use std::sync::Arc;

    fn coordinators(names: &[&str]) -> Vec<Coordinator> {
        let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new("test"));
        names
            .iter()
            .map(|n| Coordinator::new(*n, store.clone(), GameConfig::default()))
            .collect()
    }

    fn say(text: &str) -> ClientMessage {
        ClientMessage::Say {
            text: text.to_string(),
            recipient: None,
        }
    }

    #[tokio::test]
    async fn test_rejection_becomes_private_notice() {
        let c = coordinators(&["alice"]);
        let reply = handle_message(say("/imposter join"), &c[0]).await;
        match reply {
            Some(ServerMessage::Notice { text }) => {
                assert_eq!(text, "No game is currently forming. Use /imposter to start one.")
            }
            other => panic!("Expected notice, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_has_no_reply() {
        let c = coordinators(&["alice"]);
        assert!(handle_message(say("hello"), &c[0]).await.is_none());
        assert!(handle_message(say("   "), &c[0]).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_recipient() {
        let c = coordinators(&["alice"]);
        let reply = handle_message(
            ClientMessage::Say {
                text: "hi".to_string(),
                recipient: Some("evil/path".to_string()),
            },
            &c[0],
        )
        .await;
        assert!(matches!(reply, Some(ServerMessage::Error { ref code, .. }) if code == "INVALID_RECIPIENT"));
    }

    #[tokio::test]
    async fn test_history_of_direct_channel() {
        let c = coordinators(&["alice", "bob"]);
        handle_message(
            ClientMessage::Say {
                text: "psst".to_string(),
                recipient: Some("bob".to_string()),
            },
            &c[0],
        )
        .await;

        let reply = handle_message(
            ClientMessage::History {
                recipient: Some("alice".to_string()),
            },
            &c[1],
        )
        .await;
        match reply {
            Some(ServerMessage::History { channel, messages }) => {
                assert_eq!(channel, "alice:bob");
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].text, "psst");
            }
            other => panic!("Expected history, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_react_requires_message_in_channel() {
        let c = coordinators(&["alice", "bob"]);
        let reply = handle_message(
            ClientMessage::React {
                message_id: "missing".to_string(),
                emoji: "👍".to_string(),
                recipient: None,
            },
            &c[0],
        )
        .await;
        assert!(matches!(reply, Some(ServerMessage::Error { ref code, .. }) if code == "NOT_FOUND"));

        handle_message(say("nice"), &c[0]).await;
        let id = c[0].relay().history(&Channel::Lobby).await.unwrap()[0].id.clone();
        let reply = handle_message(
            ClientMessage::React {
                message_id: id.clone(),
                emoji: "👍".to_string(),
                recipient: None,
            },
            &c[1],
        )
        .await;
        assert!(reply.is_none());
        let reactions = c[0].relay().reactions(&id).await.unwrap();
        assert_eq!(reactions[0].users, vec!["bob"]);
    }

    #[tokio::test]
    async fn test_role_revealed_once_then_reset() {
        let c = coordinators(&["alice", "bob", "carol"]);
        c[0].handle_line(&Channel::Lobby, "/imposter").await.unwrap();
        for coordinator in &c {
            coordinator.handle_line(&Channel::Lobby, "/imposter join").await.unwrap();
        }

        let mut tracker = RevealTracker::default();
        assert!(game_updates(&c[1], &mut tracker).await.is_empty());

        c[0].handle_line(&Channel::Lobby, "/imposter start").await.unwrap();
        let updates = game_updates(&c[1], &mut tracker).await;
        assert_eq!(updates.len(), 1);
        let (role, topic) = c[1].my_assignment().await.unwrap().unwrap();
        match &updates[0] {
            ServerMessage::RoleAssignment { role: r, topic: t } => {
                assert_eq!(r, role.display_name());
                assert_eq!(t, &topic);
            }
            other => panic!("Expected role assignment, got {:?}", other),
        }

        // Further changes in the same game do not repeat the reveal
        assert!(game_updates(&c[1], &mut tracker).await.is_empty());

        c[2].handle_line(&Channel::Lobby, "/imposter cancel").await.unwrap();
        let updates = game_updates(&c[1], &mut tracker).await;
        assert!(matches!(updates.as_slice(), [ServerMessage::GameReset]));
    }
}

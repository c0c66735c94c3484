pub mod handlers;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::game::imposter::IMPOSTER_ROOT;
use crate::presence::{self, PRESENCE_ROOT};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::relay::{message_from_event, MESSAGES_ROOT, REACTIONS_ROOT};
use crate::state::AppState;
use crate::store::{path, StoreResult, Subscription};
use crate::types::*;
use handlers::RevealTracker;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub username: Option<String>,
}

/// Usernames become store path segments and channel keys
pub fn is_valid_username(name: &str) -> bool {
    path::is_valid_segment(name) && !name.contains(':') && name.len() <= 32
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let username = match params.username {
        Some(name) if is_valid_username(&name) => name,
        other => {
            tracing::warn!("Rejected WebSocket connection with username {:?}", other);
            return (StatusCode::BAD_REQUEST, "invalid or missing username").into_response();
        }
    };

    tracing::info!("WebSocket connection request from {}", username);
    ws.on_upgrade(move |socket| handle_socket(socket, username, state))
}

async fn send(sender: &mut SplitSink<WebSocket, WsMessage>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(WsMessage::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize {:?}: {}", msg, e);
            true
        }
    }
}

/// Store subscriptions backing one connection
struct Feeds {
    messages: Subscription,
    reactions: Subscription,
    imposter: Subscription,
    presence: Subscription,
}

impl Feeds {
    async fn open(state: &AppState) -> StoreResult<Self> {
        Ok(Self {
            messages: state.store.on(MESSAGES_ROOT).await?,
            reactions: state.store.on(REACTIONS_ROOT).await?,
            imposter: state.store.on(IMPOSTER_ROOT).await?,
            presence: state.store.on(PRESENCE_ROOT).await?,
        })
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, username: Username, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let game = &state.config.game;
    let coordinator = state.coordinator(&username);

    let mut feeds = match Feeds::open(&state).await {
        Ok(feeds) => feeds,
        Err(e) => {
            tracing::error!("Failed to subscribe for {}: {}", username, e);
            let error = ServerMessage::Error {
                code: "STORE_UNAVAILABLE".to_string(),
                msg: e.to_string(),
            };
            send(&mut sender, &error).await;
            return;
        }
    };

    // The replay of existing messages is the lobby history
    let mut visible: HashSet<MessageId> = HashSet::new();
    let mut history: Vec<Message> = feeds
        .messages
        .drain()
        .into_iter()
        .filter_map(|event| message_from_event(&event.path, event.value.as_ref()?))
        .filter(|(channel, _)| channel.is_lobby())
        .map(|(_, message)| message)
        .collect();
    history.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    visible.extend(history.iter().map(|m| m.id.clone()));
    feeds.reactions.drain();
    feeds.presence.drain();

    let welcome = ServerMessage::Welcome {
        username: username.clone(),
        server_now: chrono::Utc::now().to_rfc3339(),
        history,
    };
    if !send(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    if let Err(e) = presence::announce(state.store.as_ref(), &username, game.write_retry_delay).await {
        tracing::warn!("Failed to announce {}: {}", username, e);
    }
    let heartbeat = presence::spawn_heartbeat(
        state.store.clone(),
        username.clone(),
        game.presence_interval,
        game.write_retry_delay,
    );
    let watcher = coordinator.spawn_watcher();
    let mut reveal = RevealTracker::default();
    let presence_window = game.presence_interval * 2;

    loop {
        tokio::select! {
            event = feeds.messages.next() => {
                let Some(event) = event else { break };
                let Some(value) = event.value.as_ref() else { continue };
                if let Some((channel, message)) = message_from_event(&event.path, value) {
                    if channel.includes(&username) {
                        visible.insert(message.id.clone());
                        if !send(&mut sender, &ServerMessage::Message { message }).await {
                            break;
                        }
                    }
                }
            }

            event = feeds.reactions.next() => {
                let Some(event) = event else { break };
                // reactions/<message>/<emoji>
                let Some(message_id) = event.path.split('/').nth(1) else { continue };
                if !visible.contains(message_id) {
                    continue;
                }
                match coordinator.relay().reactions(message_id).await {
                    Ok(reactions) => {
                        let msg = ServerMessage::Reactions {
                            message_id: message_id.to_string(),
                            reactions,
                        };
                        if !send(&mut sender, &msg).await {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to read reactions: {}", e),
                }
            }

            event = feeds.imposter.next() => {
                if event.is_none() {
                    break;
                }
                feeds.imposter.drain();
                let mut closed = false;
                for msg in handlers::game_updates(&coordinator, &mut reveal).await {
                    if !send(&mut sender, &msg).await {
                        closed = true;
                        break;
                    }
                }
                if closed {
                    break;
                }
            }

            event = feeds.presence.next() => {
                if event.is_none() {
                    break;
                }
                feeds.presence.drain();
                match presence::online_users(state.store.as_ref(), presence_window).await {
                    Ok(online) => {
                        if !send(&mut sender, &ServerMessage::Presence { online }).await {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Failed to read presence: {}", e),
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        tracing::debug!("Received message from {}: {}", username, text);

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) =
                                    handlers::handle_message(client_msg, &coordinator).await
                                {
                                    if !send(&mut sender, &response).await {
                                        tracing::error!("Failed to send response");
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                let error = ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                };
                                send(&mut sender, &error).await;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    watcher.abort();
    heartbeat.abort();
    if let Err(e) = presence::leave(state.store.as_ref(), &username, game.write_retry_delay).await {
        tracing::warn!("Failed to mark {} offline: {}", username, e);
    }
    tracing::info!("WebSocket connection closed for {}", username);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_validation() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("Bob_99"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("a/b"));
        assert!(!is_valid_username("a:b"));
        assert!(!is_valid_username(&"x".repeat(33)));
    }
}

//! Chat relay: routes lines to the lobby or a private channel.
//!
//! Every post is a single store write of one message node, so every client
//! subscribed to `messages/` sees it. Game announcements reuse the same path
//! with a system or bot sender.

use crate::store::{path, put_with_retry, SharedStore, StoreResult};
use crate::types::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

pub const MESSAGES_ROOT: &str = "messages";
pub const REACTIONS_ROOT: &str = "reactions";

/// Sender name used for system announcements
pub const SYSTEM_SENDER: &str = "System";

/// Ids increase within a millisecond so same-millisecond lines from this
/// process keep their posting order
fn next_message_id() -> String {
    static IDS: OnceLock<Mutex<ulid::Generator>> = OnceLock::new();
    let mut ids = IDS
        .get_or_init(|| Mutex::new(ulid::Generator::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    ids.generate()
        .unwrap_or_else(|_| ulid::Ulid::new())
        .to_string()
}

#[derive(Clone)]
pub struct ChatRelay {
    store: Arc<dyn SharedStore>,
    retry_delay: Duration,
}

impl ChatRelay {
    pub fn new(store: Arc<dyn SharedStore>, retry_delay: Duration) -> Self {
        Self { store, retry_delay }
    }

    fn message_path(channel: &Channel, id: &str) -> String {
        format!("{}/{}/{}", MESSAGES_ROOT, channel.key(), id)
    }

    async fn post(
        &self,
        channel: &Channel,
        sender: &str,
        text: &str,
        kind: MessageKind,
        seq: u32,
    ) -> StoreResult<Message> {
        let message = Message {
            id: next_message_id(),
            channel: channel.key(),
            sender: sender.to_string(),
            text: text.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            seq,
            kind,
        };
        let value = serde_json::to_value(&message)?;
        put_with_retry(
            self.store.as_ref(),
            &Self::message_path(channel, &message.id),
            value,
            self.retry_delay,
        )
        .await?;
        Ok(message)
    }

    /// Announcement visible to everyone in the lobby
    pub async fn post_system_message(&self, text: &str) -> StoreResult<Message> {
        tracing::info!("[system] {}", text);
        self.post(&Channel::Lobby, SYSTEM_SENDER, text, MessageKind::System, 0)
            .await
    }

    /// Bot-authored lobby line; `offset` orders it after a human line posted
    /// in the same millisecond
    pub async fn post_bot_message(
        &self,
        identity: &str,
        text: &str,
        offset: u32,
    ) -> StoreResult<Message> {
        self.post(&Channel::Lobby, identity, text, MessageKind::Bot, offset)
            .await
    }

    /// A player's line in the lobby, optionally tagged as a game clue
    pub async fn post_player_line(
        &self,
        username: &str,
        text: &str,
        tagged_as_game: bool,
    ) -> StoreResult<Message> {
        let kind = if tagged_as_game {
            MessageKind::Game
        } else {
            MessageKind::Chat
        };
        self.post(&Channel::Lobby, username, text, kind, 0).await
    }

    /// Ordinary chat line on any channel
    pub async fn post_chat(
        &self,
        channel: &Channel,
        sender: &str,
        text: &str,
    ) -> StoreResult<Message> {
        self.post(channel, sender, text, MessageKind::Chat, 0).await
    }

    /// All messages on a channel in display order
    pub async fn history(&self, channel: &Channel) -> StoreResult<Vec<Message>> {
        let root = path::join(MESSAGES_ROOT, &channel.key());
        let mut messages: Vec<Message> = self
            .store
            .once(&root)
            .await?
            .into_iter()
            .filter_map(|event| event.value)
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        messages.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(messages)
    }

    fn reaction_path(message_id: &str, emoji: &str) -> String {
        format!("{}/{}/{}", REACTIONS_ROOT, message_id, emoji)
    }

    /// Toggle `username`'s `emoji` reaction on a message.
    ///
    /// Returns the message's reactions after the change.
    pub async fn react(
        &self,
        message_id: &str,
        username: &str,
        emoji: &str,
    ) -> StoreResult<Vec<Reaction>> {
        let node = Self::reaction_path(message_id, emoji);
        path::segments(&node)?;
        let already = self
            .store
            .get(&path::join(&node, username))
            .await?
            .is_some();
        let value = if already { Value::Null } else { json!(true) };
        let mut fields = serde_json::Map::new();
        fields.insert(username.to_string(), value);
        put_with_retry(
            self.store.as_ref(),
            &node,
            Value::Object(fields),
            self.retry_delay,
        )
        .await?;
        self.reactions(message_id).await
    }

    /// Aggregated reactions on a message, ordered by emoji
    pub async fn reactions(&self, message_id: &str) -> StoreResult<Vec<Reaction>> {
        let root = path::join(REACTIONS_ROOT, message_id);
        let mut by_emoji: BTreeMap<String, Vec<Username>> = BTreeMap::new();
        for event in self.store.once(&root).await? {
            if let Some(Value::Object(users)) = event.value {
                let entry = by_emoji.entry(event.key.clone()).or_default();
                entry.extend(users.keys().cloned());
            }
        }
        Ok(by_emoji
            .into_iter()
            .filter(|(_, users)| !users.is_empty())
            .map(|(emoji, users)| Reaction {
                emoji,
                count: users.len() as u32,
                users,
            })
            .collect())
    }
}

/// Decode a store event under `messages/` into a message and its channel
pub fn message_from_event(event_path: &str, value: &Value) -> Option<(Channel, Message)> {
    let rest = event_path.strip_prefix(MESSAGES_ROOT)?.strip_prefix('/')?;
    let (channel_key, _id) = rest.split_once('/')?;
    let channel = Channel::from_key(channel_key)?;
    let message = serde_json::from_value(value.clone()).ok()?;
    Some((channel, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn relay() -> ChatRelay {
        ChatRelay::new(Arc::new(MemoryStore::new("test")), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_lobby_and_direct_channels_are_separate() {
        let relay = relay();
        relay
            .post_chat(&Channel::Lobby, "alice", "hello everyone")
            .await
            .unwrap();
        relay
            .post_chat(&Channel::between("alice", "bob"), "alice", "hi bob")
            .await
            .unwrap();

        let lobby = relay.history(&Channel::Lobby).await.unwrap();
        assert_eq!(lobby.len(), 1);
        assert_eq!(lobby[0].text, "hello everyone");

        // Same channel addressed from either side
        let dm = relay.history(&Channel::between("bob", "alice")).await.unwrap();
        assert_eq!(dm.len(), 1);
        assert_eq!(dm[0].text, "hi bob");
        assert_eq!(dm[0].channel, "alice:bob");
    }

    #[tokio::test]
    async fn test_bot_reply_sorts_after_human_line() {
        let relay = relay();
        let human = relay.post_player_line("alice", "guess crane", false).await.unwrap();
        let bot = relay.post_bot_message("Wordle", "⬛⬛🟨⬛🟩 CRANE", 1).await.unwrap();

        let history = relay.history(&Channel::Lobby).await.unwrap();
        let ids: Vec<_> = history.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![human.id, bot.id]);
        assert_eq!(history[1].kind, MessageKind::Bot);
    }

    #[test]
    fn test_sort_key_uses_seq_within_same_millisecond() {
        let human = Message {
            id: "ZZZ".to_string(),
            channel: "lobby".to_string(),
            sender: "alice".to_string(),
            text: "guess crane".to_string(),
            timestamp: 1000,
            seq: 0,
            kind: MessageKind::Chat,
        };
        let bot = Message {
            id: "AAA".to_string(),
            seq: 1,
            sender: "Wordle".to_string(),
            kind: MessageKind::Bot,
            ..human.clone()
        };
        assert!(human.sort_key() < bot.sort_key());
    }

    #[tokio::test]
    async fn test_player_line_tagging() {
        let relay = relay();
        let clue = relay.post_player_line("bob", "it roars", true).await.unwrap();
        assert_eq!(clue.kind, MessageKind::Game);
        let system = relay.post_system_message("Roles have been assigned.").await.unwrap();
        assert_eq!(system.sender, SYSTEM_SENDER);
        assert_eq!(system.kind, MessageKind::System);
    }

    #[tokio::test]
    async fn test_reactions_toggle() {
        let relay = relay();
        let msg = relay.post_chat(&Channel::Lobby, "alice", "lol").await.unwrap();

        relay.react(&msg.id, "bob", "😂").await.unwrap();
        let reactions = relay.react(&msg.id, "carol", "😂").await.unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].count, 2);
        assert_eq!(reactions[0].users, vec!["bob", "carol"]);

        // Second tap removes bob's reaction
        let reactions = relay.react(&msg.id, "bob", "😂").await.unwrap();
        assert_eq!(reactions[0].count, 1);
        assert_eq!(reactions[0].users, vec!["carol"]);

        let reactions = relay.react(&msg.id, "carol", "😂").await.unwrap();
        assert!(reactions.is_empty());
    }

    #[test]
    fn test_message_ids_increase() {
        let ids: Vec<String> = (0..50).map(|_| next_message_id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_message_from_event() {
        let value = json!({
            "id": "01",
            "channel": "alice:bob",
            "sender": "alice",
            "text": "hi",
            "timestamp": 5,
            "seq": 0,
            "kind": "chat"
        });
        let (channel, message) = message_from_event("messages/alice:bob/01", &value).unwrap();
        assert_eq!(channel, Channel::between("alice", "bob"));
        assert_eq!(message.text, "hi");

        assert!(message_from_event("presence/alice", &value).is_none());
    }
}

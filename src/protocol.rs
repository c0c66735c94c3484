use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A typed line; lobby when `recipient` is absent
    Say {
        text: String,
        #[serde(default)]
        recipient: Option<Username>,
    },
    React {
        message_id: MessageId,
        emoji: String,
        #[serde(default)]
        recipient: Option<Username>,
    },
    History {
        #[serde(default)]
        recipient: Option<Username>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        username: Username,
        server_now: String,
        /// Lobby history at connect time
        history: Vec<Message>,
    },
    /// A message appeared on a channel the user can read
    Message {
        message: Message,
    },
    Reactions {
        message_id: MessageId,
        reactions: Vec<Reaction>,
    },
    /// Private reply shown only to this user
    Notice {
        text: String,
    },
    /// Private role reveal, sent once per game
    RoleAssignment {
        role: String,
        topic: String,
    },
    /// The Imposter game returned to idle
    GameReset,
    Presence {
        online: Vec<Username>,
    },
    History {
        channel: String,
        messages: Vec<Message>,
    },
    Error {
        code: String,
        msg: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tags() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"t":"say","text":"/imposter join"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Say { ref text, recipient: None } if text == "/imposter join"));

        let msg: ClientMessage = serde_json::from_str(
            r#"{"t":"react","message_id":"01","emoji":"👍","recipient":"bob"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::React { recipient: Some(ref r), .. } if r == "bob"));
    }

    #[test]
    fn test_server_message_tags() {
        let json = serde_json::to_value(ServerMessage::RoleAssignment {
            role: "Imposter".to_string(),
            topic: "Large Feline".to_string(),
        })
        .unwrap();
        assert_eq!(json["t"], "role_assignment");
        assert_eq!(json["topic"], "Large Feline");

        let json = serde_json::to_value(ServerMessage::GameReset).unwrap();
        assert_eq!(json, serde_json::json!({ "t": "game_reset" }));
    }

    #[test]
    fn test_unknown_client_message_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"t":"host_start_round"}"#).is_err());
    }
}

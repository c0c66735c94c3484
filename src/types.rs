use serde::{Deserialize, Serialize};

/// Opaque ID types for readability
pub type Username = String;
pub type MessageId = String;
pub type SessionId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImposterStatus {
    #[default]
    Idle,
    Lobby,
    Turns,
    Discussion,
    Voting,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Crew,
    Imposter,
}

impl Role {
    /// Name shown to the player in the private reveal
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Crew => "Crewmate",
            Role::Imposter => "Imposter",
        }
    }
}

/// Matched specific/vague concept pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicPair {
    pub crew: String,
    pub imposter: String,
}

/// Who the imposter is and which topics were dealt.
///
/// Written as one field so that concurrent `start` commands can only ever
/// leave one consistent assignment behind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub imposter: Username,
    pub topic: TopicPair,
}

/// A participant of the current Imposter game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub username: Username,
    /// Number of players seen when this player joined; defines turn order
    pub seat: u32,
    #[serde(default)]
    pub has_spoken: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<Username>,
    /// Derived from the session assignment, never stored per player
    #[serde(skip)]
    pub role: Option<Role>,
    #[serde(skip)]
    pub topic: Option<String>,
}

impl Player {
    pub fn new(username: Username, seat: u32) -> Self {
        Self {
            username,
            seat,
            has_spoken: false,
            vote: None,
            role: None,
            topic: None,
        }
    }
}

/// Imposter game session as seen by one client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImposterSession {
    pub status: ImposterStatus,
    /// Sorted by `(seat, username)`, i.e. join order
    pub players: Vec<Player>,
    pub turn_index: usize,
    pub assignment: Option<Assignment>,
    /// ISO timestamp at which discussion ends
    pub discussion_end_time: Option<String>,
}

impl ImposterSession {
    pub fn player(&self, username: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.username == username)
    }

    pub fn is_player(&self, username: &str) -> bool {
        self.player(username).is_some()
    }

    /// Player whose turn it is, valid only while in `turns`
    pub fn current_player(&self) -> Option<&Player> {
        if self.status != ImposterStatus::Turns {
            return None;
        }
        self.players.get(self.turn_index)
    }

    /// Case-insensitive lookup returning the canonical player
    pub fn find_player_ignore_case(&self, username: &str) -> Option<&Player> {
        self.players
            .iter()
            .find(|p| p.username.eq_ignore_ascii_case(username))
    }

    pub fn all_voted(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(|p| p.vote.is_some())
    }

    pub fn votes_cast(&self) -> usize {
        self.players.iter().filter(|p| p.vote.is_some()).count()
    }
}

/// Wordle session as seen by one client
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordleSession {
    pub active: bool,
    pub session: Option<SessionId>,
    /// Cleared (not hidden) once the session ends
    pub word: Option<String>,
    /// Team-wide guess total for the current session
    pub guesses: u32,
    pub start_time: Option<String>,
    /// Set by the first correct guess; the session stays active until the reveal closes it
    pub solved_by: Option<Username>,
}

impl WordleSession {
    /// Accepting guesses: active and not yet solved
    pub fn is_open(&self) -> bool {
        self.active && self.solved_by.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LetterFeedback {
    Exact,
    Present,
    Absent,
}

impl LetterFeedback {
    pub fn square(&self) -> char {
        match self {
            LetterFeedback::Exact => '🟩',
            LetterFeedback::Present => '🟨',
            LetterFeedback::Absent => '⬛',
        }
    }
}

/// Chat channel: the public lobby or one private channel per user pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Lobby,
    /// Normalized so that `a < b`
    Direct(Username, Username),
}

impl Channel {
    pub fn between(a: &str, b: &str) -> Self {
        if a <= b {
            Channel::Direct(a.to_string(), b.to_string())
        } else {
            Channel::Direct(b.to_string(), a.to_string())
        }
    }

    /// Lobby when `recipient` is absent, otherwise the private channel
    pub fn for_recipient(me: &str, recipient: Option<&str>) -> Self {
        match recipient {
            Some(other) => Channel::between(me, other),
            None => Channel::Lobby,
        }
    }

    /// Store key of the channel
    pub fn key(&self) -> String {
        match self {
            Channel::Lobby => "lobby".to_string(),
            Channel::Direct(a, b) => format!("{}:{}", a, b),
        }
    }

    /// Inverse of [`Channel::key`]
    pub fn from_key(key: &str) -> Option<Self> {
        if key == "lobby" {
            return Some(Channel::Lobby);
        }
        let (a, b) = key.split_once(':')?;
        if a.is_empty() || b.is_empty() {
            return None;
        }
        Some(Channel::between(a, b))
    }

    pub fn is_lobby(&self) -> bool {
        matches!(self, Channel::Lobby)
    }

    /// Whether `username` may read this channel
    pub fn includes(&self, username: &str) -> bool {
        match self {
            Channel::Lobby => true,
            Channel::Direct(a, b) => a == username || b == username,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Chat,
    /// A player's clue during the turns phase
    Game,
    System,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Channel key, see [`Channel::key`]
    pub channel: String,
    pub sender: String,
    pub text: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Tie-break within one millisecond; replies carry a higher value than
    /// the line that triggered them
    #[serde(default)]
    pub seq: u32,
    pub kind: MessageKind,
}

impl Message {
    pub fn sort_key(&self) -> (i64, u32, &str) {
        (self.timestamp, self.seq, self.id.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reaction {
    pub emoji: String,
    pub count: u32,
    pub users: Vec<Username>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_channel_is_unordered() {
        assert_eq!(Channel::between("bob", "alice"), Channel::between("alice", "bob"));
        assert_eq!(Channel::between("bob", "alice").key(), "alice:bob");
    }

    #[test]
    fn test_channel_key_roundtrip() {
        let dm = Channel::between("zed", "amy");
        assert_eq!(Channel::from_key(&dm.key()), Some(dm));
        assert_eq!(Channel::from_key("lobby"), Some(Channel::Lobby));
        assert_eq!(Channel::from_key("nonsense"), None);
    }

    #[test]
    fn test_channel_membership() {
        let dm = Channel::between("alice", "bob");
        assert!(dm.includes("alice"));
        assert!(!dm.includes("carol"));
        assert!(Channel::Lobby.includes("carol"));
    }

    #[test]
    fn test_session_case_insensitive_lookup() {
        let session = ImposterSession {
            status: ImposterStatus::Voting,
            players: vec![Player::new("Bob".to_string(), 0)],
            ..Default::default()
        };
        assert_eq!(
            session.find_player_ignore_case("bOB").map(|p| p.username.as_str()),
            Some("Bob")
        );
        assert!(session.find_player_ignore_case("alice").is_none());
    }

    #[test]
    fn test_current_player_only_during_turns() {
        let mut session = ImposterSession {
            status: ImposterStatus::Lobby,
            players: vec![Player::new("a".to_string(), 0)],
            ..Default::default()
        };
        assert!(session.current_player().is_none());
        session.status = ImposterStatus::Turns;
        assert_eq!(session.current_player().unwrap().username, "a");
    }
}

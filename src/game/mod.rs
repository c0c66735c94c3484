//! Game coordinator: the Imposter and Wordle games layered over the chat.
//!
//! There is no game server. Every connected client runs its own
//! [`Coordinator`] against the shared store; commands are applied by the
//! client that typed them, and the two transitions nobody types (discussion
//! ending, votes being complete) are performed by the elected leader only.

pub mod catalog;
pub mod command;
pub mod election;
pub mod imposter;
pub mod wordle;

use crate::config::GameConfig;
use crate::relay::ChatRelay;
use crate::store::{put_with_retry, SharedStore, StoreError};
use crate::types::*;
use chrono::{DateTime, Utc};
use command::Command;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub use imposter::{tally_votes, VoteOutcome};
pub use wordle::{evaluate_guess, render_feedback};

/// Why a line was rejected. `Display` is the private reply shown to the
/// sender.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("An Imposter game is already in progress!")]
    GameAlreadyRunning,

    #[error("No game is currently forming. Use /imposter to start one.")]
    NoLobby,

    #[error("You're already in the game.")]
    AlreadyJoined,

    #[error("Need at least {needed} players to start.")]
    NotEnoughPlayers { needed: usize },

    #[error("There is no Imposter game to cancel.")]
    NoGame,

    #[error("It's not your turn. Waiting for {current}.")]
    NotYourTurn { current: Username },

    #[error("You are not playing in this game.")]
    NotAPlayer,

    #[error("You have already voted.")]
    AlreadyVoted,

    #[error("Invalid player to vote for.")]
    InvalidVoteTarget(String),

    #[error("Unknown command '/imposter {0}'. Try /imposter, /imposter join, /imposter start or /imposter cancel.")]
    UnknownImposterCommand(String),

    #[error("A Wordle game is already running! Type 'guess <word>' to play.")]
    WordleAlreadyActive,

    #[error("There is no Wordle game to cancel.")]
    NoWordle,

    #[error("The word was already guessed by {0}.")]
    WordleSolved(Username),

    #[error("Guesses must be exactly 5 letters.")]
    InvalidGuess(String),

    #[error("Unknown command '/wordle {0}'. Try /wordle or /wordle cancel.")]
    UnknownWordleCommand(String),

    #[error("Something went wrong, please try again.")]
    Store(#[from] StoreError),
}

impl GameError {
    /// Store failures are only logged; everything else is told to the sender
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, GameError::Store(_))
    }
}

pub type GameResult<T> = Result<T, GameError>;

/// What happened to a line the user typed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// A command was applied; `notice` is a private confirmation, if any
    Command { notice: Option<String> },
    /// Posted as a clue for the current turn
    Clue,
    /// Posted as ordinary chat
    Chat,
}

impl LineOutcome {
    fn silent() -> Self {
        LineOutcome::Command { notice: None }
    }
}

/// A leader-only transition performed by [`Coordinator::reconcile_at`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    VotingStarted,
    Resolved(VoteOutcome),
}

/// Per-client game logic bound to one username
pub struct Coordinator {
    username: Username,
    store: Arc<dyn SharedStore>,
    relay: ChatRelay,
    config: GameConfig,
    /// Serializes this client's read-check-write transitions
    transition_lock: Mutex<()>,
}

impl Coordinator {
    pub fn new(username: impl Into<Username>, store: Arc<dyn SharedStore>, config: GameConfig) -> Self {
        let relay = ChatRelay::new(store.clone(), config.write_retry_delay);
        Self {
            username: username.into(),
            store,
            relay,
            config,
            transition_lock: Mutex::new(()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn relay(&self) -> &ChatRelay {
        &self.relay
    }

    async fn write(&self, path: &str, value: Value) -> GameResult<()> {
        put_with_retry(self.store.as_ref(), path, value, self.config.write_retry_delay).await?;
        Ok(())
    }

    async fn announce(&self, text: &str) -> GameResult<()> {
        self.relay.post_system_message(text).await?;
        Ok(())
    }

    /// Route one line typed by this client's user.
    ///
    /// Commands are only recognized in the lobby. `vote` and `guess` lines
    /// are commands only while their game is in the matching phase and are
    /// plain chat (or a clue) otherwise.
    pub async fn handle_line(&self, channel: &Channel, line: &str) -> GameResult<LineOutcome> {
        if !channel.is_lobby() {
            self.relay.post_chat(channel, &self.username, line).await?;
            return Ok(LineOutcome::Chat);
        }

        match command::parse(line) {
            Some(Command::ImposterNew) => return self.new_imposter_game().await,
            Some(Command::ImposterJoin) => return self.join_imposter_game().await,
            Some(Command::ImposterStart) => return self.start_imposter_game().await,
            Some(Command::ImposterCancel) => return self.cancel_imposter_game().await,
            Some(Command::ImposterUnknown(sub)) => {
                return Err(GameError::UnknownImposterCommand(sub))
            }
            Some(Command::WordleStart) => return self.start_wordle().await,
            Some(Command::WordleCancel) => return self.cancel_wordle().await,
            Some(Command::WordleUnknown(sub)) => return Err(GameError::UnknownWordleCommand(sub)),
            Some(Command::Vote(target)) => {
                let session = self.imposter_session().await?;
                if session.status == ImposterStatus::Voting {
                    return self.cast_vote(&session, &target).await;
                }
            }
            Some(Command::Guess(word)) => {
                let session = self.wordle_session().await?;
                if session.is_open() {
                    return self.submit_guess(&session, line, &word).await;
                }
            }
            None => {}
        }

        let session = self.imposter_session().await?;
        if session.status == ImposterStatus::Turns && session.is_player(&self.username) {
            return match session.current_player() {
                Some(current) if current.username == self.username => {
                    self.take_turn(&session, line).await
                }
                Some(current) => Err(GameError::NotYourTurn {
                    current: current.username.clone(),
                }),
                None => Err(GameError::NotAPlayer),
            };
        }

        self.relay.post_chat(channel, &self.username, line).await?;
        Ok(LineOutcome::Chat)
    }

    /// Perform any transition this client is responsible for right now
    pub async fn reconcile(&self) -> GameResult<Option<Transition>> {
        self.reconcile_at(Utc::now()).await
    }

    /// [`Coordinator::reconcile`] with an explicit clock.
    ///
    /// Only the elected leader acts: discussion becomes voting once
    /// `now` passes the deadline, and a fully voted game is resolved.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> GameResult<Option<Transition>> {
        let _guard = self.transition_lock.lock().await;
        let session = self.imposter_session().await?;
        if !election::is_leader(&session.players, &self.username) {
            return Ok(None);
        }

        match session.status {
            ImposterStatus::Discussion if imposter::discussion_over(&session, now) => {
                self.begin_voting().await?;
                Ok(Some(Transition::VotingStarted))
            }
            ImposterStatus::Voting if session.all_voted() => {
                let outcome = self.resolve_votes(&session).await?;
                Ok(Some(Transition::Resolved(outcome)))
            }
            _ => Ok(None),
        }
    }

    /// Watch the Imposter session and reconcile whenever it changes or the
    /// discussion deadline passes. Runs until the store detaches the
    /// subscription or the task is aborted.
    pub fn spawn_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = coordinator.watch().await {
                error!("Game watcher for {} stopped: {}", coordinator.username, e);
            }
        })
    }

    async fn watch(&self) -> GameResult<()> {
        let mut subscription = self.store.on(imposter::IMPOSTER_ROOT).await?;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                event = subscription.next() => {
                    if event.is_none() {
                        debug!("Game watcher for {} detached", self.username);
                        return Ok(());
                    }
                    // One reconcile covers a burst of changes
                    subscription.drain();
                }
                _ = sleep_until(deadline) => {}
            }

            if let Err(e) = self.reconcile().await {
                error!("Reconcile failed for {}: {}", self.username, e);
            }
            deadline = self.discussion_deadline().await;
        }
    }

    /// Local instant at which the current discussion ends, if any
    async fn discussion_deadline(&self) -> Option<tokio::time::Instant> {
        let session = self.imposter_session().await.ok()?;
        if session.status != ImposterStatus::Discussion {
            return None;
        }
        let end = imposter::parse_deadline(&session)?;
        let remaining = (end - Utc::now()).to_std().unwrap_or_default();
        // Small grace so the wall clock has passed the deadline on wake
        Some(tokio::time::Instant::now() + remaining + std::time::Duration::from_millis(20))
    }

    /// This user's role and topic in the running game
    pub async fn my_assignment(&self) -> GameResult<Option<(Role, String)>> {
        let session = self.imposter_session().await?;
        Ok(session
            .player(&self.username)
            .and_then(|p| Some((p.role?, p.topic.clone()?))))
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

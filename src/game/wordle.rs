//! Cooperative Wordle in the lobby.
//!
//! Store layout:
//! - `wordle` holds `active`, `word`, `session`, `start_time` and `solved_by`
//! - `wordle/tally/<session>` holds one guess count per username
//!
//! Each client only ever writes its own tally field, so the team total is
//! the sum of the fields and concurrent guesses are never lost.

use super::catalog::WORDS;
use super::{Coordinator, GameError, GameResult, LineOutcome};
use crate::store::{path, put_with_retry, SharedStore};
use crate::types::*;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const WORDLE_ROOT: &str = "wordle";
pub const TALLY_ROOT: &str = "wordle/tally";

/// Sender name of the Wordle replies
pub const WORDLE_BOT: &str = "WordleBot";

pub const WORD_LENGTH: usize = 5;

/// Score a guess against the target.
///
/// Exact matches are taken first; each remaining target letter can then
/// satisfy at most one present match, scanning the guess left to right.
pub fn evaluate_guess(guess: &str, target: &str) -> Vec<LetterFeedback> {
    let guess: Vec<char> = guess.to_uppercase().chars().collect();
    let mut remaining: Vec<Option<char>> = target.to_uppercase().chars().map(Some).collect();
    let mut feedback = vec![LetterFeedback::Absent; guess.len()];

    for (i, letter) in guess.iter().enumerate() {
        if let Some(slot) = remaining.get_mut(i) {
            if *slot == Some(*letter) {
                feedback[i] = LetterFeedback::Exact;
                *slot = None;
            }
        }
    }

    for (i, letter) in guess.iter().enumerate() {
        if feedback[i] == LetterFeedback::Exact {
            continue;
        }
        if let Some(slot) = remaining.iter_mut().find(|slot| **slot == Some(*letter)) {
            feedback[i] = LetterFeedback::Present;
            *slot = None;
        }
    }

    feedback
}

/// `🟩🟨⬛⬛⬛`
pub fn render_feedback(feedback: &[LetterFeedback]) -> String {
    feedback.iter().map(LetterFeedback::square).collect()
}

fn is_valid_word(word: &str) -> bool {
    word.chars().count() == WORD_LENGTH && word.chars().all(|c| c.is_ascii_alphabetic())
}

#[derive(Debug, Default, Deserialize)]
struct RootFields {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    word: Option<String>,
    #[serde(default)]
    session: Option<SessionId>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    solved_by: Option<Username>,
}

/// Deactivate `session` unless a newer session has replaced it
async fn close_session(
    store: &dyn SharedStore,
    session: &str,
    retry_delay: Duration,
) -> GameResult<()> {
    let current: RootFields = store
        .get(WORDLE_ROOT)
        .await?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    if current.session.as_deref() != Some(session) {
        return Ok(());
    }
    put_with_retry(
        store,
        WORDLE_ROOT,
        json!({ "active": false, "word": null, "session": null, "start_time": null, "solved_by": null }),
        retry_delay,
    )
    .await?;
    Ok(())
}

impl Coordinator {
    /// Current Wordle session with the team's guess total
    pub async fn wordle_session(&self) -> GameResult<WordleSession> {
        let root: RootFields = self
            .store
            .get(WORDLE_ROOT)
            .await?
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let guesses = match &root.session {
            Some(session) => self.tally(session).await?,
            None => 0,
        };

        Ok(WordleSession {
            active: root.active,
            session: root.session,
            word: root.word,
            guesses,
            start_time: root.start_time,
            solved_by: root.solved_by,
        })
    }

    async fn tally(&self, session: &str) -> GameResult<u32> {
        let counts = self.store.get(&path::join(TALLY_ROOT, session)).await?;
        Ok(match counts {
            Some(Value::Object(fields)) => fields
                .values()
                .filter_map(Value::as_u64)
                .map(|n| n as u32)
                .sum(),
            _ => 0,
        })
    }

    /// `/wordle` with a random word
    pub(super) async fn start_wordle(&self) -> GameResult<LineOutcome> {
        let word = {
            let mut rng = rand::rng();
            WORDS.choose(&mut rng).copied().unwrap_or("CRANE")
        };
        self.start_wordle_with(word).await
    }

    /// Start a session with a known word
    pub async fn start_wordle_with(&self, word: &str) -> GameResult<LineOutcome> {
        let current = self.wordle_session().await?;
        if current.active {
            return Err(GameError::WordleAlreadyActive);
        }
        if !is_valid_word(word) {
            return Err(GameError::InvalidGuess(word.to_string()));
        }

        let session = ulid::Ulid::new().to_string();
        self.write(
            WORDLE_ROOT,
            json!({
                "active": true,
                "word": word.to_uppercase(),
                "session": session,
                "start_time": chrono::Utc::now().to_rfc3339(),
                "solved_by": null,
            }),
        )
        .await?;
        info!("{} started Wordle session {}", self.username, session);
        self.announce("A Wordle game has started! Guess the 5-letter word by typing 'guess <word>'.")
            .await?;
        Ok(LineOutcome::silent())
    }

    /// `/wordle cancel`
    pub(super) async fn cancel_wordle(&self) -> GameResult<LineOutcome> {
        let current = self.wordle_session().await?;
        if !current.active {
            return Err(GameError::NoWordle);
        }

        self.write(
            WORDLE_ROOT,
            json!({ "active": false, "word": null, "session": null, "start_time": null, "solved_by": null }),
        )
        .await?;
        info!("{} cancelled Wordle", self.username);
        self.announce(&format!(
            "Wordle cancelled! The word was {}.",
            current.word.as_deref().unwrap_or("unknown")
        ))
        .await?;
        Ok(LineOutcome::silent())
    }

    /// `guess <word>` while a session is open
    pub(super) async fn submit_guess(
        &self,
        session: &WordleSession,
        line: &str,
        guess: &str,
    ) -> GameResult<LineOutcome> {
        let guess = guess.to_uppercase();
        if !is_valid_word(&guess) {
            return Err(GameError::InvalidGuess(guess));
        }
        let (Some(session_id), Some(word)) = (&session.session, &session.word) else {
            return Err(GameError::NoWordle);
        };
        if let Some(winner) = &session.solved_by {
            return Err(GameError::WordleSolved(winner.clone()));
        }

        // Count the guess before scoring it
        let tally_node = path::join(TALLY_ROOT, session_id);
        let mine = self
            .store
            .get(&path::join(&tally_node, &self.username))
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let mut fields = serde_json::Map::new();
        fields.insert(self.username.clone(), json!(mine + 1));
        self.write(&tally_node, Value::Object(fields)).await?;
        let total = self.tally(session_id).await?;

        self.relay
            .post_player_line(&self.username, line, false)
            .await?;

        let feedback = evaluate_guess(&guess, word);
        if feedback.iter().all(|f| *f == LetterFeedback::Exact) {
            // Another guess may have landed while this one was being counted
            let latest = self.wordle_session().await?;
            if latest.session.as_deref() != Some(session_id.as_str()) || latest.solved_by.is_some()
            {
                return Ok(LineOutcome::silent());
            }
            self.write(WORDLE_ROOT, json!({ "solved_by": self.username }))
                .await?;
            info!(
                "{} solved Wordle session {} after {} team guesses",
                self.username, session_id, total
            );
            self.relay
                .post_bot_message(
                    WORDLE_BOT,
                    &format!(
                        "{} 🎉 {} guessed it! The word was {}. Team guesses: {}.",
                        render_feedback(&feedback),
                        self.username,
                        word,
                        total
                    ),
                    1,
                )
                .await?;
            self.schedule_close(session_id.clone());
        } else {
            self.relay
                .post_bot_message(
                    WORDLE_BOT,
                    &format!("{} {}", render_feedback(&feedback), guess),
                    1,
                )
                .await?;
        }
        Ok(LineOutcome::silent())
    }

    /// Deactivate the solved session after the reveal delay
    fn schedule_close(&self, session: SessionId) {
        let store: Arc<dyn SharedStore> = self.store.clone();
        let delay = self.config.wordle_reveal_delay;
        let retry_delay = self.config.write_retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = close_session(store.as_ref(), &session, retry_delay).await {
                error!("Closing Wordle session {} failed: {}", session, e);
            }
        });
    }
}

//! Imposter: a social-deduction round played through the lobby chat.
//!
//! Store layout:
//! - `imposter` holds `status`, `turn_index`, `assignment` and
//!   `discussion_end_time`
//! - `imposter/players/<username>` holds one player's `username`, `seat`,
//!   `has_spoken` and `vote`
//!
//! Every transition is a read of the session followed by field writes; the
//! role assignment is a single field so that concurrent starts converge on
//! one imposter.

use super::catalog::TOPICS;
use super::{Coordinator, GameError, GameResult, LineOutcome};
use crate::store::path;
use crate::types::*;
use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

pub const IMPOSTER_ROOT: &str = "imposter";
pub const PLAYERS_ROOT: &str = "imposter/players";

/// Result of counting the votes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Two or more players share the highest count
    Tie { votes: u32 },
    VotedOut { username: Username, votes: u32 },
}

/// Count votes and pick the player to eject.
///
/// Candidates are visited in player order; a later candidate only takes the
/// lead with strictly more votes, and matching the lead marks a tie.
pub fn tally_votes(players: &[Player]) -> VoteOutcome {
    let mut counts: Vec<(&str, u32)> = Vec::new();
    for vote in players.iter().filter_map(|p| p.vote.as_deref()) {
        match counts.iter_mut().find(|(name, _)| *name == vote) {
            Some((_, count)) => *count += 1,
            None => counts.push((vote, 1)),
        }
    }

    let mut leader: Option<&str> = None;
    let mut max = 0;
    let mut tie = false;
    for (name, count) in counts {
        if count > max {
            max = count;
            leader = Some(name);
            tie = false;
        } else if count == max {
            tie = true;
        }
    }

    match leader {
        Some(name) if !tie => VoteOutcome::VotedOut {
            username: name.to_string(),
            votes: max,
        },
        _ => VoteOutcome::Tie { votes: max },
    }
}

/// Pick the imposter and a topic pair
pub fn deal<R: Rng + ?Sized>(players: &[Player], rng: &mut R) -> Option<Assignment> {
    let imposter = players.choose(rng)?;
    let (crew, vague) = TOPICS.choose(rng)?;
    Some(Assignment {
        imposter: imposter.username.clone(),
        topic: TopicPair {
            crew: crew.to_string(),
            imposter: vague.to_string(),
        },
    })
}

/// Derive each player's role and topic from the assignment
pub fn apply_assignment(players: &mut [Player], assignment: &Assignment) {
    for player in players {
        if player.username == assignment.imposter {
            player.role = Some(Role::Imposter);
            player.topic = Some(assignment.topic.imposter.clone());
        } else {
            player.role = Some(Role::Crew);
            player.topic = Some(assignment.topic.crew.clone());
        }
    }
}

pub(super) fn parse_deadline(session: &ImposterSession) -> Option<DateTime<Utc>> {
    let end = session.discussion_end_time.as_deref()?;
    DateTime::parse_from_rfc3339(end)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// A missing or unreadable deadline counts as passed so the game cannot stall
pub(super) fn discussion_over(session: &ImposterSession, now: DateTime<Utc>) -> bool {
    parse_deadline(session).map_or(true, |end| now >= end)
}

/// "1 minute", "90 seconds"
fn describe_seconds(seconds: u64) -> String {
    match seconds {
        60 => "1 minute".to_string(),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "1 second".to_string(),
        s => format!("{} seconds", s),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RootFields {
    #[serde(default)]
    status: ImposterStatus,
    #[serde(default)]
    turn_index: usize,
    #[serde(default)]
    assignment: Option<Assignment>,
    #[serde(default)]
    discussion_end_time: Option<String>,
}

impl Coordinator {
    /// Current session as observed in the store
    pub async fn imposter_session(&self) -> GameResult<ImposterSession> {
        let root: RootFields = match self.store.get(IMPOSTER_ROOT).await? {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Unreadable imposter session, treating as idle: {}", e);
                RootFields::default()
            }),
            None => RootFields::default(),
        };

        if root.status == ImposterStatus::Idle {
            return Ok(ImposterSession::default());
        }

        // Nodes left behind by late writes after a reset lack a seat and
        // are skipped
        let mut players: Vec<Player> = self
            .store
            .once(PLAYERS_ROOT)
            .await?
            .into_iter()
            .filter(|event| path::parent(&event.path) == Some(PLAYERS_ROOT))
            .filter_map(|event| serde_json::from_value(event.value?).ok())
            .collect();
        players.sort_by(|a, b| (a.seat, &a.username).cmp(&(b.seat, &b.username)));

        if let Some(assignment) = &root.assignment {
            apply_assignment(&mut players, assignment);
        }

        Ok(ImposterSession {
            status: root.status,
            players,
            turn_index: root.turn_index,
            assignment: root.assignment,
            discussion_end_time: root.discussion_end_time,
        })
    }

    fn player_path(username: &str) -> String {
        path::join(PLAYERS_ROOT, username)
    }

    /// Back to idle with no players
    async fn reset_imposter(&self) -> GameResult<()> {
        self.write(PLAYERS_ROOT, serde_json::Value::Null).await?;
        self.write(
            IMPOSTER_ROOT,
            json!({
                "status": ImposterStatus::Idle,
                "turn_index": 0,
                "assignment": null,
                "discussion_end_time": null,
            }),
        )
        .await
    }

    /// `/imposter`: open a lobby
    pub(super) async fn new_imposter_game(&self) -> GameResult<LineOutcome> {
        let session = self.imposter_session().await?;
        if session.status != ImposterStatus::Idle {
            return Err(GameError::GameAlreadyRunning);
        }

        self.write(PLAYERS_ROOT, serde_json::Value::Null).await?;
        self.write(
            IMPOSTER_ROOT,
            json!({
                "status": ImposterStatus::Lobby,
                "turn_index": 0,
                "assignment": null,
                "discussion_end_time": null,
            }),
        )
        .await?;
        info!("{} opened an Imposter lobby", self.username);
        self.announce("A new Imposter game is forming! Type /imposter join to participate.")
            .await?;
        Ok(LineOutcome::silent())
    }

    /// `/imposter join`
    pub(super) async fn join_imposter_game(&self) -> GameResult<LineOutcome> {
        let session = self.imposter_session().await?;
        if session.status != ImposterStatus::Lobby {
            return Err(GameError::NoLobby);
        }
        if session.is_player(&self.username) {
            return Err(GameError::AlreadyJoined);
        }

        let player = Player::new(self.username.clone(), session.players.len() as u32);
        self.write(
            &Self::player_path(&self.username),
            serde_json::to_value(&player).map_err(crate::store::StoreError::from)?,
        )
        .await?;

        let count = session.players.len() + 1;
        self.announce(&format!(
            "{} has joined the game! ({} players)",
            self.username, count
        ))
        .await?;
        if count >= self.config.min_players {
            self.announce("We have enough players! Type /imposter start to begin.")
                .await?;
        }
        Ok(LineOutcome::silent())
    }

    /// `/imposter start`: deal roles and begin the turns
    pub(super) async fn start_imposter_game(&self) -> GameResult<LineOutcome> {
        let session = self.imposter_session().await?;
        match session.status {
            ImposterStatus::Lobby => {}
            ImposterStatus::Idle => return Err(GameError::NoLobby),
            _ => return Err(GameError::GameAlreadyRunning),
        }
        if session.players.len() < self.config.min_players {
            return Err(GameError::NotEnoughPlayers {
                needed: self.config.min_players,
            });
        }

        let assignment = {
            let mut rng = rand::rng();
            deal(&session.players, &mut rng)
        }
        .ok_or(GameError::NotEnoughPlayers {
            needed: self.config.min_players,
        })?;

        self.write(
            IMPOSTER_ROOT,
            json!({
                "status": ImposterStatus::Turns,
                "turn_index": 0,
                "assignment": assignment,
            }),
        )
        .await?;
        info!(
            "{} started an Imposter game with {} players",
            self.username,
            session.players.len()
        );

        self.announce("The Imposter game is starting!").await?;
        self.announce("Roles have been assigned. Check your private message for your topic.")
            .await?;
        self.announce(&format!("It's {}'s turn.", session.players[0].username))
            .await?;
        Ok(LineOutcome::silent())
    }

    /// The current player's clue
    pub(super) async fn take_turn(
        &self,
        session: &ImposterSession,
        line: &str,
    ) -> GameResult<LineOutcome> {
        self.write(
            &Self::player_path(&self.username),
            json!({ "has_spoken": true }),
        )
        .await?;
        self.relay
            .post_player_line(&self.username, line, true)
            .await?;

        // A cancel or restart may have landed while the clue was posted
        let latest = self.imposter_session().await?;
        if latest.status != ImposterStatus::Turns
            || latest.turn_index != session.turn_index
            || latest.assignment != session.assignment
        {
            info!("{}'s clue landed after the round changed", self.username);
            return Ok(LineOutcome::Clue);
        }

        let next = session.turn_index + 1;
        match session.players.get(next) {
            Some(player) => {
                self.write(IMPOSTER_ROOT, json!({ "turn_index": next })).await?;
                self.announce(&format!("It's {}'s turn.", player.username))
                    .await?;
            }
            None => {
                let end = Utc::now()
                    + chrono::Duration::seconds(self.config.discussion_seconds as i64);
                self.write(
                    IMPOSTER_ROOT,
                    json!({
                        "status": ImposterStatus::Discussion,
                        "turn_index": next,
                        "discussion_end_time": end.to_rfc3339(),
                    }),
                )
                .await?;
                self.announce(&format!(
                    "All players have spoken! Discussion phase starts now. You have {} to discuss.",
                    describe_seconds(self.config.discussion_seconds)
                ))
                .await?;
            }
        }
        Ok(LineOutcome::Clue)
    }

    /// Leader only: discussion is over
    pub(super) async fn begin_voting(&self) -> GameResult<()> {
        self.write(IMPOSTER_ROOT, json!({ "status": ImposterStatus::Voting }))
            .await?;
        info!("{} opened voting", self.username);
        self.announce(
            "Discussion over! Voting phase starts now. Type 'vote <username>' to cast your vote.",
        )
        .await
    }

    /// `vote <name>` while voting
    pub(super) async fn cast_vote(
        &self,
        session: &ImposterSession,
        target: &str,
    ) -> GameResult<LineOutcome> {
        let voter = session
            .player(&self.username)
            .ok_or(GameError::NotAPlayer)?;
        if voter.vote.is_some() {
            return Err(GameError::AlreadyVoted);
        }
        let target = session
            .find_player_ignore_case(target)
            .ok_or_else(|| GameError::InvalidVoteTarget(target.to_string()))?
            .username
            .clone();

        self.write(
            &Self::player_path(&self.username),
            json!({ "vote": target }),
        )
        .await?;
        self.announce(&format!(
            "{} has voted. ({}/{})",
            self.username,
            session.votes_cast() + 1,
            session.players.len()
        ))
        .await?;

        // Resolves immediately when this client is the leader
        self.reconcile().await?;
        Ok(LineOutcome::Command {
            notice: Some(format!("You voted for {}.", target)),
        })
    }

    /// Leader only: announce the result and reset
    pub(super) async fn resolve_votes(&self, session: &ImposterSession) -> GameResult<VoteOutcome> {
        let outcome = tally_votes(&session.players);
        let (imposter, crew_topic) = match &session.assignment {
            Some(a) => (a.imposter.as_str(), a.topic.crew.as_str()),
            None => ("unknown", "unknown"),
        };
        let imposter = imposter.to_string();
        let crew_topic = crew_topic.to_string();

        self.reset_imposter().await?;
        info!("{} resolved the Imposter game: {:?}", self.username, outcome);

        match &outcome {
            VoteOutcome::Tie { .. } => {
                self.announce("It's a tie! No one was voted out.").await?;
                self.announce(&format!(
                    "The Imposter survives! {} wins! The topic was \"{}\".",
                    imposter, crew_topic
                ))
                .await?;
            }
            VoteOutcome::VotedOut { username, .. } => {
                self.announce(&format!("{} was voted out!", username))
                    .await?;
                if *username == imposter {
                    self.announce("They WERE the Imposter! Crewmates win!")
                        .await?;
                } else {
                    self.announce(&format!(
                        "They were NOT the Imposter. {} wins! The topic was \"{}\".",
                        imposter, crew_topic
                    ))
                    .await?;
                }
            }
        }
        Ok(outcome)
    }

    /// `/imposter cancel`: abandon the game from any phase
    pub(super) async fn cancel_imposter_game(&self) -> GameResult<LineOutcome> {
        let session = self.imposter_session().await?;
        if session.status == ImposterStatus::Idle {
            return Err(GameError::NoGame);
        }

        let (imposter, topic) = match &session.assignment {
            Some(a) => (a.imposter.clone(), a.topic.imposter.clone()),
            None => ("unknown".to_string(), "unknown".to_string()),
        };
        self.reset_imposter().await?;
        info!("{} cancelled the Imposter game", self.username);
        self.announce(&format!(
            "Game cancelled! The imposter was {} and their topic was \"{}\".",
            imposter, topic
        ))
        .await?;
        Ok(LineOutcome::silent())
    }
}

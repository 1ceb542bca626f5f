//! Common types used throughout the matchbot

use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for players (their lobby user name)
pub type PlayerName = String;

/// Match identifier, monotonic within one queue
pub type MatchId = u64;

/// Identifier of an in-flight ready check
pub type SessionId = uuid::Uuid;

/// Identifies one opening of a queue; a reopened queue gets a new one
pub type QueueInstanceId = uuid::Uuid;

/// Queue definition as announced to (and echoed back by) the lobby server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDefinition {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub map_names: Vec<String>,
    #[serde(default)]
    pub game_names: Vec<String>,
    #[serde(default)]
    pub engine_versions: Vec<String>,
    #[serde(default)]
    pub min_players: u32,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub team_join_allowed: bool,
}

/// Where a player is in the matchmaking lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerStatus {
    Waiting,
    Matched,
    Playing,
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerStatus::Waiting => write!(f, "Waiting"),
            PlayerStatus::Matched => write!(f, "Matched"),
            PlayerStatus::Playing => write!(f, "Playing"),
        }
    }
}

/// Team placement handed out by the matching script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    /// The match holding this player
    pub match_id: MatchId,
    pub team: i64,
    pub ally_team: i64,
}

/// A player registered in a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub name: PlayerName,
    pub status: PlayerStatus,
    pub assignment: Option<Assignment>,
    pub joined_at: DateTime<Utc>,
}

impl Player {
    pub fn new(name: impl Into<PlayerName>) -> Self {
        Self {
            name: name.into(),
            status: PlayerStatus::Waiting,
            assignment: None,
            joined_at: current_timestamp(),
        }
    }

    pub fn set_waiting(&mut self) {
        self.status = PlayerStatus::Waiting;
        self.assignment = None;
    }

    pub fn set_matched(&mut self, assignment: Assignment) {
        self.status = PlayerStatus::Matched;
        self.assignment = Some(assignment);
    }

    pub fn set_playing(&mut self) {
        self.status = PlayerStatus::Playing;
    }

    /// Whether this player is held by match `id`
    pub fn belongs_to(&self, id: MatchId) -> bool {
        self.assignment.map(|a| a.match_id) == Some(id)
    }
}

/// A player's resolved seat in a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPlayer {
    pub name: PlayerName,
    pub team: i64,
    pub ally: i64,
}

/// A validated grouping of players, pending the ready check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub queue_name: String,
    /// The queue opening that formed this match
    pub queue_instance: QueueInstanceId,
    pub game: String,
    pub map: String,
    pub engine_version: String,
    pub players: Vec<MatchedPlayer>,
}

impl Match {
    /// Names of every player in the match, in seat order
    pub fn player_names(&self) -> Vec<PlayerName> {
        self.players.iter().map(|p| p.name.clone()).collect()
    }
}

//! Common types used throughout the ladder service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Stable external identity of a player
pub type PlayerId = String;

/// Unique identifier for matches
pub type MatchId = Uuid;

/// Unique identifier for background jobs
pub type JobId = Uuid;

/// Unique identifier for live stream connections
pub type ConnectionId = u64;

/// Role of the authenticated principal making a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalRole {
    Player,
    Moderator,
    Admin,
}

/// Verified caller identity, supplied by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub player_id: PlayerId,
    pub role: PrincipalRole,
}

impl Principal {
    pub fn new(player_id: impl Into<PlayerId>, role: PrincipalRole) -> Self {
        Self {
            player_id: player_id.into(),
            role,
        }
    }

    /// Moderators and admins may drive any match
    pub fn is_staff(&self) -> bool {
        matches!(self.role, PrincipalRole::Moderator | PrincipalRole::Admin)
    }
}

/// Match format tag carried on rating deltas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SeriesType {
    #[default]
    Bo1,
    Bo3,
    Bo5,
}

impl std::fmt::Display for SeriesType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeriesType::Bo1 => write!(f, "bo1"),
            SeriesType::Bo3 => write!(f, "bo3"),
            SeriesType::Bo5 => write!(f, "bo5"),
        }
    }
}

/// One of the two sides of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    A,
    B,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::A => Team::B,
            Team::B => Team::A,
        }
    }
}

/// Lifecycle states of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    Forming,
    TeamsAssigned,
    InProgress,
    /// Terminal
    Settled,
    /// Terminal
    Cancelled,
}

impl MatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchState::Settled | MatchState::Cancelled)
    }
}

/// Split of the roster into two sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAssignment {
    pub team_a: Vec<PlayerId>,
    pub team_b: Vec<PlayerId>,
}

impl TeamAssignment {
    /// Which side a player is on, if any
    pub fn team_of(&self, player_id: &str) -> Option<Team> {
        if self.team_a.iter().any(|p| p == player_id) {
            Some(Team::A)
        } else if self.team_b.iter().any(|p| p == player_id) {
            Some(Team::B)
        } else {
            None
        }
    }

    pub fn members(&self, team: Team) -> &[PlayerId] {
        match team {
            Team::A => &self.team_a,
            Team::B => &self.team_b,
        }
    }
}

/// Per-player numbers reported for a match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMatchStats {
    pub player_id: PlayerId,
    /// Rank label shown on the scoreboard, if the source had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_label: Option<String>,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub kills: u32,
    #[serde(default)]
    pub deaths: u32,
    #[serde(default)]
    pub assists: u32,
}

/// Result payload reported when a match is settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub winning_team: Team,
    #[serde(default)]
    pub stats: Vec<PlayerMatchStats>,
}

/// Timestamp for every transition a match has taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchTimestamps {
    pub created_at: DateTime<Utc>,
    pub teams_assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// A match record as persisted in the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub match_id: MatchId,
    pub series_type: SeriesType,
    pub created_by: PlayerId,
    pub roster: Vec<PlayerId>,
    pub state: MatchState,
    pub teams: Option<TeamAssignment>,
    pub result: Option<MatchResult>,
    pub cancel_reason: Option<String>,
    pub timestamps: MatchTimestamps,
    /// Optimistic concurrency version, bumped by every committed write
    pub version: u64,
}

/// Rating state of one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRatingRecord {
    pub player_id: PlayerId,
    pub rating: u32,
    /// High-water mark of `rating`
    pub peak_rating: u32,
    pub matches_played: u32,
    pub is_calibrating: bool,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, 0 for a record never written
    pub version: u64,
}

impl PlayerRatingRecord {
    /// Fresh record for a player with no history
    pub fn seeded(player_id: impl Into<PlayerId>, seed_rating: u32) -> Self {
        Self {
            player_id: player_id.into(),
            rating: seed_rating,
            peak_rating: seed_rating,
            matches_played: 0,
            is_calibrating: true,
            updated_at: Utc::now(),
            version: 0,
        }
    }
}

/// Immutable record of one player's rating change in one settled match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingDeltaEvent {
    pub player_id: PlayerId,
    pub match_id: MatchId,
    pub old_rating: u32,
    pub new_rating: u32,
    pub change: i32,
    pub won: bool,
    pub series_type: SeriesType,
    pub old_bracket: String,
    pub new_bracket: String,
    pub created_at: DateTime<Utc>,
}

impl RatingDeltaEvent {
    pub fn bracket_changed(&self) -> bool {
        self.old_bracket != self.new_bracket
    }
}

/// Lifecycle step that produced a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleTransition {
    Created,
    TeamsAssigned,
    Started,
    Settled,
    Cancelled,
}

impl LifecycleTransition {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleTransition::Created => "created",
            LifecycleTransition::TeamsAssigned => "teams_assigned",
            LifecycleTransition::Started => "started",
            LifecycleTransition::Settled => "settled",
            LifecycleTransition::Cancelled => "cancelled",
        }
    }
}

/// Event emitted on every match transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchLifecycleEvent {
    pub match_id: MatchId,
    pub transition: LifecycleTransition,
    pub state: MatchState,
    pub roster: Vec<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Kinds of events a live connection can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RatingDelta,
    MatchLifecycle,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::RatingDelta, EventKind::MatchLifecycle];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RatingDelta => "rating_delta",
            EventKind::MatchLifecycle => "match_lifecycle",
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "rating_delta" => Ok(EventKind::RatingDelta),
            "match_lifecycle" => Ok(EventKind::MatchLifecycle),
            other => Err(format!("unknown event kind: {}", other)),
        }
    }
}

/// Union type for every event the engine emits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    RatingDelta(RatingDeltaEvent),
    MatchLifecycle(MatchLifecycleEvent),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::RatingDelta(_) => EventKind::RatingDelta,
            DomainEvent::MatchLifecycle(_) => EventKind::MatchLifecycle,
        }
    }
}

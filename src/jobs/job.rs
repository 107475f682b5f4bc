//! Job records and payloads

use crate::types::{JobId, MatchId, PlayerId, RatingDeltaEvent, SeriesType, Team};
use crate::utils::{current_timestamp, generate_job_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    /// Terminal
    Completed,
    /// Terminal
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Settlement summary posted to the results channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementPayload {
    pub match_id: MatchId,
    pub series_type: SeriesType,
    pub winning_team: Team,
    pub deltas: Vec<RatingDeltaEvent>,
}

impl AnnouncementPayload {
    /// Plain-text summary, one line per player
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "Match {} ({}) settled, team {:?} won",
            self.match_id, self.series_type, self.winning_team
        )];
        for delta in &self.deltas {
            let mut line = format!(
                "{}: {} -> {} ({:+})",
                delta.player_id, delta.old_rating, delta.new_rating, delta.change
            );
            if delta.bracket_changed() {
                line.push_str(&format!(" {} -> {}", delta.old_bracket, delta.new_bracket));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Work a job carries; the set of kinds is closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Bring a player's rank roles in line with their rating
    RoleSync { player_id: PlayerId, rating: u32 },
    /// Post a settlement summary
    Announcement(AnnouncementPayload),
}

impl JobPayload {
    pub fn name(&self) -> &'static str {
        match self {
            JobPayload::RoleSync { .. } => "role_sync",
            JobPayload::Announcement(_) => "announcement",
        }
    }
}

/// A queued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub payload: JobPayload,
    pub state: JobState,
    /// Deliveries so far, including the current one
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When a delayed job becomes eligible again
    pub ready_at: Option<DateTime<Utc>>,
    /// Enqueue order, used to keep the waiting set FIFO. Assigned by the
    /// store when the job is committed.
    pub sequence: u64,
}

impl Job {
    /// A fresh waiting job with its id already assigned
    pub fn new(payload: JobPayload) -> Self {
        let now = current_timestamp();
        Self {
            job_id: generate_job_id(),
            payload,
            state: JobState::Waiting,
            attempts: 0,
            last_error: None,
            enqueued_at: now,
            updated_at: now,
            ready_at: None,
            sequence: 0,
        }
    }
}

/// Number of jobs in each state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    /// Completed since the store was opened, including evicted history
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn by_state(&self) -> [(&'static str, usize); 5] {
        [
            ("waiting", self.waiting),
            ("active", self.active),
            ("delayed", self.delayed),
            ("completed", self.completed),
            ("failed", self.failed),
        ]
    }

    /// Jobs that still have work ahead of them
    pub fn pending(&self) -> usize {
        self.waiting + self.active + self.delayed
    }
}

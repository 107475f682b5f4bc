//! Record persistence interface
//!
//! The engine consumes storage as a keyed record store with optimistic,
//! all-or-nothing multi-record transactions. Background jobs live in the same
//! store so settlement can write ratings and the jobs they trigger in one
//! commit. Any engine can sit behind [`RecordStore`];
//! [`InMemoryRecordStore`] is the bundled implementation.

pub mod memory;

pub use memory::InMemoryRecordStore;

use crate::error::Result;
use crate::jobs::{Job, JobCounts, JobState};
use crate::types::{JobId, Match, MatchId, PlayerId, PlayerRatingRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A single write inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum RecordWrite {
    Player(PlayerRatingRecord),
    Match(Match),
    /// A new job; its id must not exist yet
    Job(Job),
}

impl RecordWrite {
    /// Store key, used in conflict reports
    pub fn key(&self) -> String {
        match self {
            RecordWrite::Player(record) => format!("player:{}", record.player_id),
            RecordWrite::Match(record) => format!("match:{}", record.match_id),
            RecordWrite::Job(job) => format!("job:{}", job.job_id),
        }
    }

    /// Version the record was read at
    pub fn expected_version(&self) -> u64 {
        match self {
            RecordWrite::Player(record) => record.version,
            RecordWrite::Match(record) => record.version,
            RecordWrite::Job(_) => 0,
        }
    }
}

/// Batch of writes applied atomically
///
/// Each record carries the version it was read at (0 for a record that does
/// not exist yet). Commit fails with `StoreConflict` if any of them moved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    writes: Vec<RecordWrite>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_player(mut self, record: PlayerRatingRecord) -> Self {
        self.writes.push(RecordWrite::Player(record));
        self
    }

    pub fn put_match(mut self, record: Match) -> Self {
        self.writes.push(RecordWrite::Match(record));
        self
    }

    pub fn put_job(mut self, job: Job) -> Self {
        self.writes.push(RecordWrite::Job(job));
        self
    }

    pub fn writes(&self) -> &[RecordWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<RecordWrite> {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Job side of the store
///
/// Jobs enter through [`Transaction::put_job`]. The methods here move them
/// between states; each returns the state the job is in afterwards, which is
/// unchanged when the job was no longer active.
pub trait JobStore: Send + Sync {
    /// Take the oldest waiting job, mark it active and count the attempt
    fn take_next_job(&self) -> Result<Option<Job>>;

    fn complete_job(&self, job_id: JobId) -> Result<JobState>;

    fn delay_job(&self, job_id: JobId, error: String, ready_at: DateTime<Utc>)
        -> Result<JobState>;

    fn fail_job(&self, job_id: JobId, error: String) -> Result<JobState>;

    /// Move delayed jobs due by `now` back to waiting
    fn promote_due_jobs(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Return every active job to waiting
    fn requeue_active_jobs(&self) -> Result<usize>;

    /// A job by id; completed jobs may have been evicted
    fn get_job(&self, job_id: JobId) -> Result<Option<Job>>;

    /// Jobs that exhausted their attempts or failed permanently
    fn failed_jobs(&self) -> Result<Vec<Job>>;

    fn job_counts(&self) -> Result<JobCounts>;
}

/// Trait for record storage operations
pub trait RecordStore: JobStore {
    /// Get a player's rating record
    fn get_player(&self, player_id: &PlayerId) -> Result<Option<PlayerRatingRecord>>;

    /// Get rating records for several players; absent players are omitted
    fn get_players(&self, player_ids: &[PlayerId])
        -> Result<HashMap<PlayerId, PlayerRatingRecord>>;

    /// Get a match record
    fn get_match(&self, match_id: &MatchId) -> Result<Option<Match>>;

    /// Apply every write or none of them
    fn commit(&self, transaction: Transaction) -> Result<()>;

    /// Number of players with a stored record
    fn player_count(&self) -> Result<usize>;
}

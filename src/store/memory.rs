//! In-memory record store

use crate::error::{LadderError, Result};
use crate::jobs::{Job, JobCounts, JobState, JobTable};
use crate::store::{JobStore, RecordStore, RecordWrite, Transaction};
use crate::types::{JobId, Match, MatchId, PlayerId, PlayerRatingRecord};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct Records {
    players: HashMap<PlayerId, PlayerRatingRecord>,
    matches: HashMap<MatchId, Match>,
    jobs: JobTable,
}

impl Records {
    fn current_version(&self, write: &RecordWrite) -> u64 {
        match write {
            RecordWrite::Player(record) => self
                .players
                .get(&record.player_id)
                .map_or(0, |stored| stored.version),
            RecordWrite::Match(record) => self
                .matches
                .get(&record.match_id)
                .map_or(0, |stored| stored.version),
            RecordWrite::Job(job) => u64::from(self.jobs.contains(job.job_id)),
        }
    }
}

/// Single-lock in-memory store; a commit holds the write lock for the whole batch
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Records>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `completed_history` completed jobs addressable by id
    pub fn with_job_history(completed_history: usize) -> Self {
        Self {
            records: RwLock::new(Records {
                jobs: JobTable::with_history(completed_history),
                ..Records::default()
            }),
        }
    }

    /// Number of stored matches
    pub fn match_count(&self) -> Result<usize> {
        Ok(self.read()?.matches.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Records>> {
        self.records
            .read()
            .map_err(|_| LadderError::lock_poisoned("records read").into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Records>> {
        self.records
            .write()
            .map_err(|_| LadderError::lock_poisoned("records write").into())
    }
}

impl RecordStore for InMemoryRecordStore {
    fn get_player(&self, player_id: &PlayerId) -> Result<Option<PlayerRatingRecord>> {
        Ok(self.read()?.players.get(player_id).cloned())
    }

    fn get_players(
        &self,
        player_ids: &[PlayerId],
    ) -> Result<HashMap<PlayerId, PlayerRatingRecord>> {
        let records = self.read()?;
        Ok(player_ids
            .iter()
            .filter_map(|id| records.players.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    fn get_match(&self, match_id: &MatchId) -> Result<Option<Match>> {
        Ok(self.read()?.matches.get(match_id).cloned())
    }

    fn commit(&self, transaction: Transaction) -> Result<()> {
        let mut records = self.write()?;

        // Validate every version before touching anything
        for write in transaction.writes() {
            if records.current_version(write) != write.expected_version() {
                debug!("Commit rejected, {} changed since read", write.key());
                return Err(LadderError::StoreConflict { key: write.key() }.into());
            }
        }

        let write_count = transaction.writes().len();
        for write in transaction.into_writes() {
            match write {
                RecordWrite::Player(mut record) => {
                    record.version += 1;
                    records.players.insert(record.player_id.clone(), record);
                }
                RecordWrite::Match(mut record) => {
                    record.version += 1;
                    records.matches.insert(record.match_id, record);
                }
                RecordWrite::Job(job) => records.jobs.insert(job),
            }
        }

        debug!("Committed transaction with {} writes", write_count);
        Ok(())
    }

    fn player_count(&self) -> Result<usize> {
        Ok(self.read()?.players.len())
    }
}

impl JobStore for InMemoryRecordStore {
    fn take_next_job(&self) -> Result<Option<Job>> {
        self.write()?.jobs.take_next(current_timestamp())
    }

    fn complete_job(&self, job_id: JobId) -> Result<JobState> {
        self.write()?.jobs.mark_completed(job_id, current_timestamp())
    }

    fn delay_job(
        &self,
        job_id: JobId,
        error: String,
        ready_at: DateTime<Utc>,
    ) -> Result<JobState> {
        self.write()?
            .jobs
            .mark_delayed(job_id, error, ready_at, current_timestamp())
    }

    fn fail_job(&self, job_id: JobId, error: String) -> Result<JobState> {
        self.write()?
            .jobs
            .mark_failed(job_id, error, current_timestamp())
    }

    fn promote_due_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        self.write()?.jobs.promote_due(now)
    }

    fn requeue_active_jobs(&self) -> Result<usize> {
        self.write()?.jobs.requeue_active(current_timestamp())
    }

    fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        Ok(self.read()?.jobs.get(job_id))
    }

    fn failed_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.read()?.jobs.failed())
    }

    fn job_counts(&self) -> Result<JobCounts> {
        Ok(self.read()?.jobs.counts())
    }
}

//! Job bookkeeping with waiting, active, delayed and failed sets
//!
//! [`JobTable`] holds no lock of its own; a store embeds it next to its other
//! records so jobs commit in the same transaction as the ratings that caused
//! them.

use crate::error::{LadderError, Result};
use crate::jobs::job::{Job, JobCounts, JobState};
use crate::types::JobId;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Completed jobs kept addressable by id when no limit is configured
pub const DEFAULT_COMPLETED_HISTORY: usize = 1000;

/// Every live job plus a bounded history of completed ones
///
/// A job is in exactly one state at a time. Failed jobs are kept until an
/// operator deals with them. Completed jobs are evicted oldest first once
/// more than `completed_history` of them are retained.
#[derive(Debug)]
pub struct JobTable {
    jobs: HashMap<JobId, Job>,
    /// Keyed by enqueue sequence so retried jobs keep their place
    waiting: BTreeMap<u64, JobId>,
    active: BTreeSet<JobId>,
    delayed: BTreeMap<(DateTime<Utc>, u64), JobId>,
    /// In the order jobs failed
    failed: Vec<JobId>,
    completed: VecDeque<JobId>,
    completed_total: usize,
    completed_history: usize,
    next_sequence: u64,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::with_history(DEFAULT_COMPLETED_HISTORY)
    }
}

impl JobTable {
    pub fn with_history(completed_history: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            waiting: BTreeMap::new(),
            active: BTreeSet::new(),
            delayed: BTreeMap::new(),
            failed: Vec::new(),
            completed: VecDeque::new(),
            completed_total: 0,
            completed_history,
            next_sequence: 0,
        }
    }

    pub fn contains(&self, job_id: JobId) -> bool {
        self.jobs.contains_key(&job_id)
    }

    /// Jobs currently held, completed history included
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn job_mut(&mut self, job_id: JobId) -> Result<&mut Job> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| LadderError::JobNotFound { job_id }.into())
    }

    /// Add a new job to the back of the waiting set
    pub fn insert(&mut self, mut job: Job) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        job.state = JobState::Waiting;
        job.sequence = sequence;
        self.waiting.insert(sequence, job.job_id);
        self.jobs.insert(job.job_id, job);
    }

    /// Take the oldest waiting job and mark it active
    pub fn take_next(&mut self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let Some((_, job_id)) = self.waiting.pop_first() else {
            return Ok(None);
        };
        self.active.insert(job_id);

        let job = self.job_mut(job_id)?;
        job.state = JobState::Active;
        job.attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    /// Leave the active set. Returns the job's state unchanged if it was
    /// no longer active, e.g. requeued while a stale worker still held it.
    fn finish_active(&mut self, job_id: JobId) -> Result<Option<JobState>> {
        let state = self.job_mut(job_id)?.state;
        if state != JobState::Active {
            return Ok(Some(state));
        }
        self.active.remove(&job_id);
        Ok(None)
    }

    pub fn mark_completed(&mut self, job_id: JobId, now: DateTime<Utc>) -> Result<JobState> {
        if let Some(state) = self.finish_active(job_id)? {
            return Ok(state);
        }
        let job = self.job_mut(job_id)?;
        job.state = JobState::Completed;
        job.last_error = None;
        job.updated_at = now;

        self.completed_total += 1;
        self.completed.push_back(job_id);
        while self.completed.len() > self.completed_history {
            if let Some(evicted) = self.completed.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
        Ok(JobState::Completed)
    }

    pub fn mark_delayed(
        &mut self,
        job_id: JobId,
        error: String,
        ready_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<JobState> {
        if let Some(state) = self.finish_active(job_id)? {
            return Ok(state);
        }
        let job = self.job_mut(job_id)?;
        job.state = JobState::Delayed;
        job.last_error = Some(error);
        job.ready_at = Some(ready_at);
        job.updated_at = now;
        let sequence = job.sequence;
        self.delayed.insert((ready_at, sequence), job_id);
        Ok(JobState::Delayed)
    }

    pub fn mark_failed(
        &mut self,
        job_id: JobId,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<JobState> {
        if let Some(state) = self.finish_active(job_id)? {
            return Ok(state);
        }
        let job = self.job_mut(job_id)?;
        job.state = JobState::Failed;
        job.last_error = Some(error);
        job.ready_at = None;
        job.updated_at = now;
        self.failed.push(job_id);
        Ok(JobState::Failed)
    }

    /// Move delayed jobs whose backoff has elapsed back to waiting
    pub fn promote_due(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let mut promoted = 0;

        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let job_id = entry.remove();
            let job = self.job_mut(job_id)?;
            job.state = JobState::Waiting;
            job.ready_at = None;
            job.updated_at = now;
            let sequence = job.sequence;
            self.waiting.insert(sequence, job_id);
            promoted += 1;
        }

        Ok(promoted)
    }

    /// Put every active job back in waiting
    pub fn requeue_active(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let active = std::mem::take(&mut self.active);
        for job_id in &active {
            let job = self.job_mut(*job_id)?;
            job.state = JobState::Waiting;
            job.updated_at = now;
            let sequence = job.sequence;
            self.waiting.insert(sequence, *job_id);
        }
        Ok(active.len())
    }

    pub fn get(&self, job_id: JobId) -> Option<Job> {
        self.jobs.get(&job_id).cloned()
    }

    pub fn failed(&self) -> Vec<Job> {
        self.failed
            .iter()
            .filter_map(|job_id| self.jobs.get(job_id).cloned())
            .collect()
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts {
            waiting: self.waiting.len(),
            active: self.active.len(),
            delayed: self.delayed.len(),
            completed: self.completed_total,
            failed: self.failed.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::JobPayload;
    use crate::utils::{current_timestamp, generate_job_id};
    use chrono::Duration;

    fn role_sync(player: &str) -> Job {
        Job::new(JobPayload::RoleSync {
            player_id: player.to_string(),
            rating: 1000,
        })
    }

    fn push(table: &mut JobTable, player: &str) -> JobId {
        let job = role_sync(player);
        let job_id = job.job_id;
        table.insert(job);
        job_id
    }

    #[test]
    fn test_fifo_order() {
        let mut table = JobTable::default();
        let first = push(&mut table, "p1");
        let second = push(&mut table, "p2");
        let now = current_timestamp();

        assert_eq!(table.take_next(now).unwrap().unwrap().job_id, first);
        assert_eq!(table.take_next(now).unwrap().unwrap().job_id, second);
        assert!(table.take_next(now).unwrap().is_none());
    }

    #[test]
    fn test_take_marks_active_and_counts_attempts() {
        let mut table = JobTable::default();
        let job_id = push(&mut table, "p1");
        let now = current_timestamp();

        let job = table.take_next(now).unwrap().unwrap();
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.attempts, 1);

        let counts = table.counts();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 0);
        assert_eq!(table.mark_completed(job_id, now).unwrap(), JobState::Completed);
        assert_eq!(table.get(job_id).unwrap().state, JobState::Completed);
        assert_eq!(table.counts().active, 0);
    }

    #[test]
    fn test_delayed_job_promoted_when_due() {
        let mut table = JobTable::default();
        let job_id = push(&mut table, "p1");
        let now = current_timestamp();
        table.take_next(now).unwrap();

        table
            .mark_delayed(
                job_id,
                "rate limited".to_string(),
                now + Duration::seconds(5),
                now,
            )
            .unwrap();

        assert_eq!(table.promote_due(now).unwrap(), 0);
        assert_eq!(table.counts().delayed, 1);

        assert_eq!(table.promote_due(now + Duration::seconds(6)).unwrap(), 1);
        let job = table.take_next(now).unwrap().unwrap();
        assert_eq!(job.job_id, job_id);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_promoted_job_keeps_enqueue_position() {
        let mut table = JobTable::default();
        let older = push(&mut table, "p1");
        let now = current_timestamp();
        table.take_next(now).unwrap();
        let newer = push(&mut table, "p2");

        table.mark_delayed(older, "busy".to_string(), now, now).unwrap();
        table.promote_due(now).unwrap();

        assert_eq!(table.take_next(now).unwrap().unwrap().job_id, older);
        assert_eq!(table.take_next(now).unwrap().unwrap().job_id, newer);
    }

    #[test]
    fn test_failed_jobs_listed() {
        let mut table = JobTable::default();
        let job_id = push(&mut table, "p1");
        let now = current_timestamp();
        table.take_next(now).unwrap();
        table
            .mark_failed(job_id, "unknown member".to_string(), now)
            .unwrap();

        let failed = table.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("unknown member"));
        assert_eq!(table.counts().failed, 1);
    }

    #[test]
    fn test_requeue_active() {
        let mut table = JobTable::default();
        let job_id = push(&mut table, "p1");
        let now = current_timestamp();
        table.take_next(now).unwrap();

        assert_eq!(table.requeue_active(now).unwrap(), 1);
        assert_eq!(table.get(job_id).unwrap().state, JobState::Waiting);

        // A stale ack after requeue leaves the job waiting
        assert_eq!(table.mark_completed(job_id, now).unwrap(), JobState::Waiting);
        assert_eq!(
            table.mark_failed(job_id, "late".to_string(), now).unwrap(),
            JobState::Waiting
        );
        assert!(table.failed().is_empty());
        assert_eq!(table.take_next(now).unwrap().unwrap().job_id, job_id);
    }

    #[test]
    fn test_completed_history_is_capped() {
        let mut table = JobTable::with_history(100);
        let now = current_timestamp();
        let mut ids = Vec::new();

        for i in 0..10_000 {
            ids.push(push(&mut table, &format!("p{}", i)));
            let job = table.take_next(now).unwrap().unwrap();
            table.mark_completed(job.job_id, now).unwrap();
        }

        assert_eq!(table.len(), 100);
        assert_eq!(table.counts().completed, 10_000);
        assert_eq!(table.counts().pending(), 0);
        assert!(table.get(ids[0]).is_none());
        assert!(table.get(ids[9_999]).is_some());
    }

    #[test]
    fn test_failed_jobs_are_never_evicted() {
        let mut table = JobTable::with_history(0);
        let now = current_timestamp();

        let failed = push(&mut table, "p1");
        table.take_next(now).unwrap();
        table.mark_failed(failed, "gone".to_string(), now).unwrap();

        let done = push(&mut table, "p2");
        table.take_next(now).unwrap();
        table.mark_completed(done, now).unwrap();

        assert!(table.get(done).is_none());
        assert_eq!(table.failed()[0].job_id, failed);
    }

    #[test]
    fn test_unknown_job() {
        let mut table = JobTable::default();
        let err = table
            .mark_completed(generate_job_id(), current_timestamp())
            .unwrap_err();
        assert!(matches!(
            LadderError::from_anyhow(&err),
            Some(LadderError::JobNotFound { .. })
        ));
    }
}

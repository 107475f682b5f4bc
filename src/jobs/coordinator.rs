//! Worker pool driving the job queue

use crate::config::JobConfig;
use crate::error::{LadderError, Result};
use crate::jobs::handler::JobHandler;
use crate::jobs::job::{Job, JobCounts, JobPayload, JobState};
use crate::metrics::MetricsCollector;
use crate::store::{RecordStore, Transaction};
use crate::types::JobId;
use crate::utils::{backoff_delay, current_timestamp};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Accepts jobs and runs them through a [`JobHandler`]
///
/// Jobs are kept in the record store, so anything committed there survives
/// the coordinator. Delivery is at-least-once: a job that was active when the
/// process stopped is requeued and may run again, so handlers must be
/// idempotent.
#[derive(Clone)]
pub struct JobCoordinator {
    store: Arc<dyn RecordStore>,
    config: JobConfig,
    metrics: Arc<MetricsCollector>,
    /// Last sampled counts
    counts: Arc<RwLock<JobCounts>>,
}

impl JobCoordinator {
    pub fn new(
        config: JobConfig,
        store: Arc<dyn RecordStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
            counts: Arc::new(RwLock::new(JobCounts::default())),
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Commit a single job on its own
    ///
    /// Work that must land together with other records goes through
    /// [`Transaction::put_job`] instead.
    pub fn enqueue(&self, payload: JobPayload) -> Result<JobId> {
        let job = Job::new(payload);
        let (job_id, kind) = (job.job_id, job.payload.name());
        self.store.commit(Transaction::new().put_job(job))?;
        debug!("Enqueued {} job {}", kind, job_id);
        Ok(job_id)
    }

    /// Take the next waiting job, if any
    pub fn poll(&self) -> Result<Option<Job>> {
        self.store.take_next_job()
    }

    /// Returns the job's state afterwards; anything but `Completed` means a
    /// stale worker finished a job that had already been requeued
    pub fn complete(&self, job_id: JobId) -> Result<JobState> {
        let state = self.store.complete_job(job_id)?;
        if state != JobState::Completed {
            warn!(
                "Ignoring completion of job {} which is no longer active ({:?})",
                job_id, state
            );
        }
        Ok(state)
    }

    /// Record a failed attempt and decide what happens next
    ///
    /// Permanent errors fail the job immediately. Transient errors delay it
    /// with exponential backoff until `max_attempts` deliveries are used up.
    /// Returns the state the job actually ended up in, which is left alone
    /// when the job was no longer active.
    pub fn fail(&self, job_id: JobId, error: &anyhow::Error) -> Result<JobState> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or(LadderError::JobNotFound { job_id })?;
        if job.state != JobState::Active {
            warn!(
                "Ignoring failure of job {} which is no longer active ({:?})",
                job_id, job.state
            );
            return Ok(job.state);
        }

        let permanent = LadderError::from_anyhow(error).is_some_and(|e| e.is_permanent());
        let message = format!("{:#}", error);

        let (expected, state) = if permanent || job.attempts >= self.config.max_attempts {
            warn!(
                "Job {} ({}) failed after {} attempt(s): {}",
                job_id,
                job.payload.name(),
                job.attempts,
                message
            );
            (JobState::Failed, self.store.fail_job(job_id, message)?)
        } else {
            let delay = backoff_delay(
                self.config.base_delay(),
                job.attempts.saturating_sub(1),
                self.config.max_delay(),
            );
            let ready_at = current_timestamp()
                + chrono::Duration::from_std(delay).map_err(|e| LadderError::InternalError {
                    message: format!("Invalid backoff delay: {}", e),
                })?;

            debug!(
                "Job {} attempt {} failed, retrying in {:?}: {}",
                job_id, job.attempts, delay, message
            );
            (
                JobState::Delayed,
                self.store.delay_job(job_id, message, ready_at)?,
            )
        };

        if state != expected {
            warn!(
                "Job {} was requeued before its failure was recorded ({:?})",
                job_id, state
            );
        }
        Ok(state)
    }

    pub fn promote_due(&self) -> Result<usize> {
        self.store.promote_due_jobs(current_timestamp())
    }

    pub fn requeue_active(&self) -> Result<usize> {
        self.store.requeue_active_jobs()
    }

    /// A job by id; completed jobs drop out once the history limit is reached
    pub fn job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.store.get_job(job_id)
    }

    pub fn failed_jobs(&self) -> Result<Vec<Job>> {
        self.store.failed_jobs()
    }

    /// Counts as of the last sample; may trail the queue slightly
    pub fn counts(&self) -> Result<JobCounts> {
        self.counts
            .read()
            .map(|counts| *counts)
            .map_err(|_| LadderError::lock_poisoned("job counts").into())
    }

    /// Sample the queue now and publish the result to metrics
    pub fn refresh_counts(&self) -> Result<JobCounts> {
        let counts = self.store.job_counts()?;
        *self
            .counts
            .write()
            .map_err(|_| LadderError::lock_poisoned("job counts"))? = counts;
        self.metrics.update_job_counts(&counts);
        Ok(counts)
    }

    /// Run one waiting job to completion or failure
    ///
    /// Returns the job's resulting state, or `None` if nothing was waiting.
    pub async fn process_one(&self, handler: &dyn JobHandler) -> Result<Option<JobState>> {
        let Some(job) = self.poll()? else {
            return Ok(None);
        };

        let kind = job.payload.name();
        let timer = self.metrics.start_timer();
        let outcome = handler.handle(&job).await;
        let elapsed = timer.stop();

        let state = match outcome {
            Ok(()) => self.complete(job.job_id)?,
            Err(e) => self.fail(job.job_id, &e)?,
        };

        let label = match state {
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "retried",
            JobState::Waiting | JobState::Active => "superseded",
        };
        self.metrics.record_job_outcome(kind, label, elapsed);
        Ok(Some(state))
    }

    /// Process until nothing is waiting or delayed; for tests and tooling
    pub async fn drain(&self, handler: &dyn JobHandler) -> Result<()> {
        loop {
            if self.process_one(handler).await?.is_some() {
                continue;
            }
            if self.store.job_counts()?.delayed == 0 {
                return Ok(());
            }
            self.promote_due()?;
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Spawn workers, the delayed-job promoter and the counts sampler
    ///
    /// All tasks stop when `shutdown` flips to true. A worker never abandons
    /// a job mid-attempt; retries are scheduled through the delayed set so a
    /// stop between attempts leaves the job safely queued.
    pub fn start(
        &self,
        handler: Arc<dyn JobHandler>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let requeued = self.requeue_active().unwrap_or_else(|e| {
            error!("Failed to requeue active jobs: {}", e);
            0
        });
        if requeued > 0 {
            info!("Requeued {} job(s) left active by a previous run", requeued);
        }

        let mut handles = Vec::with_capacity(self.config.workers + 2);

        for worker in 0..self.config.workers {
            let coordinator = self.clone();
            let handler = handler.clone();
            let mut shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                debug!("Job worker {} started", worker);
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    match coordinator.process_one(handler.as_ref()).await {
                        Ok(Some(_)) => continue,
                        Ok(None) => {}
                        Err(e) => error!("Job worker {} error: {}", worker, e),
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(coordinator.config.poll_interval()) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                debug!("Job worker {} stopped", worker);
            }));
        }

        let coordinator = self.clone();
        let mut promoter_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(coordinator.config.poll_interval());
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match coordinator.promote_due() {
                            Ok(0) => {}
                            Ok(promoted) => debug!("Promoted {} delayed job(s)", promoted),
                            Err(e) => error!("Failed to promote delayed jobs: {}", e),
                        }
                    }
                    _ = promoter_shutdown.changed() => break,
                }
            }
        }));

        let coordinator = self.clone();
        let mut sampler_shutdown = shutdown;
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(coordinator.config.counts_refresh());
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = coordinator.refresh_counts() {
                            error!("Failed to sample job counts: {}", e);
                        }
                    }
                    _ = sampler_shutdown.changed() => break,
                }
            }
        }));

        info!("Job coordinator started with {} worker(s)", self.config.workers);
        handles
    }

    /// Return in-flight jobs to waiting after workers have stopped
    pub fn shutdown(&self) -> Result<()> {
        let requeued = self.requeue_active()?;
        if requeued > 0 {
            info!("Requeued {} in-flight job(s) on shutdown", requeued);
        }
        self.refresh_counts()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::handler::MockJobHandler;
    use crate::store::InMemoryRecordStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_config(max_attempts: u32) -> JobConfig {
        JobConfig {
            workers: 1,
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 4,
            poll_interval_ms: 1,
            counts_refresh_ms: 5,
            ..JobConfig::default()
        }
    }

    fn with_config(config: JobConfig) -> JobCoordinator {
        JobCoordinator::new(
            config,
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    fn coordinator(max_attempts: u32) -> JobCoordinator {
        with_config(fast_config(max_attempts))
    }

    /// Handler whose calls never return
    struct StuckHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for StuckHandler {
        async fn handle(&self, _job: &Job) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn wait_for(coordinator: &JobCoordinator, done: impl Fn(&JobCounts) -> bool) {
        for _ in 0..400 {
            if done(&coordinator.refresh_counts().unwrap()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out, counts {:?}", coordinator.refresh_counts().unwrap());
    }

    fn role_sync() -> JobPayload {
        JobPayload::RoleSync {
            player_id: "p1".to_string(),
            rating: 515,
        }
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let coordinator = coordinator(3);
        let job_id = coordinator.enqueue(role_sync()).unwrap();

        let mut handler = MockJobHandler::new();
        handler.expect_handle().times(1).returning(|_| Ok(()));

        let state = coordinator.process_one(&handler).await.unwrap();
        assert_eq!(state, Some(JobState::Completed));
        assert_eq!(
            coordinator.job(job_id).unwrap().unwrap().state,
            JobState::Completed
        );
        assert_eq!(coordinator.process_one(&handler).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_until_success() {
        let coordinator = coordinator(5);
        let job_id = coordinator.enqueue(role_sync()).unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let mut handler = MockJobHandler::new();
        handler.expect_handle().returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LadderError::SyncTransientFailure {
                    message: "rate limited".to_string(),
                }
                .into())
            } else {
                Ok(())
            }
        });

        coordinator.drain(&handler).await.unwrap();

        let job = coordinator.job(job_id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_moves_to_failed() {
        let coordinator = coordinator(3);
        let job_id = coordinator.enqueue(role_sync()).unwrap();

        let mut handler = MockJobHandler::new();
        handler.expect_handle().times(3).returning(|_| {
            Err(LadderError::SyncTransientFailure {
                message: "platform unavailable".to_string(),
            }
            .into())
        });

        coordinator.drain(&handler).await.unwrap();

        let failed = coordinator.failed_jobs().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id, job_id);
        assert_eq!(failed[0].attempts, 3);
        assert!(failed[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("platform unavailable"));
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let coordinator = coordinator(5);
        coordinator.enqueue(role_sync()).unwrap();

        let mut handler = MockJobHandler::new();
        handler.expect_handle().times(1).returning(|_| {
            Err(LadderError::SyncPermanentFailure {
                message: "unknown member".to_string(),
            }
            .into())
        });

        let state = coordinator.process_one(&handler).await.unwrap();
        assert_eq!(state, Some(JobState::Failed));
        assert_eq!(coordinator.refresh_counts().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_delayed_with_backoff() {
        let coordinator = with_config(JobConfig {
            base_delay_ms: 60_000,
            max_delay_ms: 120_000,
            ..fast_config(5)
        });
        let job_id = coordinator.enqueue(role_sync()).unwrap();
        coordinator.poll().unwrap();

        let err = anyhow::anyhow!("connection reset");
        assert_eq!(coordinator.fail(job_id, &err).unwrap(), JobState::Delayed);

        // Not due yet
        assert_eq!(coordinator.promote_due().unwrap(), 0);
        let job = coordinator.job(job_id).unwrap().unwrap();
        let wait = job.ready_at.unwrap() - job.updated_at;
        assert!(wait >= chrono::Duration::seconds(59));
    }

    #[tokio::test]
    async fn test_counts_are_sampled() {
        let coordinator = coordinator(3);
        coordinator.enqueue(role_sync()).unwrap();
        coordinator.enqueue(role_sync()).unwrap();

        assert_eq!(coordinator.counts().unwrap(), JobCounts::default());
        coordinator.refresh_counts().unwrap();
        assert_eq!(coordinator.counts().unwrap().waiting, 2);
    }

    #[tokio::test]
    async fn test_workers_process_and_stop_on_shutdown() {
        let coordinator = coordinator(3);
        for _ in 0..4 {
            coordinator.enqueue(role_sync()).unwrap();
        }

        let mut handler = MockJobHandler::new();
        handler.expect_handle().times(4).returning(|_| Ok(()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = coordinator.start(Arc::new(handler), shutdown_rx);

        wait_for(&coordinator, |counts| counts.completed == 4).await;

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        coordinator.shutdown().unwrap();
        assert_eq!(coordinator.counts().unwrap().pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_between_retries_leaves_job_delayed() {
        let coordinator = with_config(JobConfig {
            base_delay_ms: 60_000,
            max_delay_ms: 120_000,
            ..fast_config(5)
        });
        let job_id = coordinator.enqueue(role_sync()).unwrap();

        let mut handler = MockJobHandler::new();
        handler.expect_handle().times(1).returning(|_| {
            Err(LadderError::SyncTransientFailure {
                message: "gateway timeout".to_string(),
            }
            .into())
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = coordinator.start(Arc::new(handler), shutdown_rx);
        wait_for(&coordinator, |counts| counts.delayed == 1).await;

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        coordinator.shutdown().unwrap();

        let job = coordinator.job(job_id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.attempts, 1);
        assert!(job.ready_at.is_some());
    }

    #[tokio::test]
    async fn test_aborted_worker_job_returns_to_waiting() {
        let coordinator = coordinator(3);
        let job_id = coordinator.enqueue(role_sync()).unwrap();
        let handler = Arc::new(StuckHandler {
            calls: AtomicU32::new(0),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = coordinator.start(handler.clone(), shutdown_rx);
        wait_for(&coordinator, |counts| counts.active == 1).await;

        // The worker never reaches a shutdown check, so it has to be aborted
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        coordinator.shutdown().unwrap();

        let job = coordinator.job(job_id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(coordinator.counts().unwrap().waiting, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // The next run picks it up again
        let next = coordinator.poll().unwrap().unwrap();
        assert_eq!(next.job_id, job_id);
        assert_eq!(next.attempts, 2);
    }

    #[tokio::test]
    async fn test_stale_worker_outcome_reports_actual_state() {
        let coordinator = coordinator(1);
        let job_id = coordinator.enqueue(role_sync()).unwrap();
        coordinator.poll().unwrap();
        coordinator.requeue_active().unwrap();

        let err: anyhow::Error = LadderError::SyncPermanentFailure {
            message: "unknown member".to_string(),
        }
        .into();
        assert_eq!(coordinator.fail(job_id, &err).unwrap(), JobState::Waiting);
        assert_eq!(coordinator.complete(job_id).unwrap(), JobState::Waiting);
        assert!(coordinator.failed_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_outlive_the_coordinator() {
        let store = Arc::new(InMemoryRecordStore::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let first = JobCoordinator::new(fast_config(3), store.clone(), metrics.clone());
        let job_id = first.enqueue(role_sync()).unwrap();
        first.poll().unwrap();
        drop(first);

        // A fresh coordinator over the same store recovers the in-flight job
        let second = JobCoordinator::new(fast_config(3), store, metrics);
        let mut handler = MockJobHandler::new();
        handler.expect_handle().times(1).returning(|_| Ok(()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = second.start(Arc::new(handler), shutdown_rx);

        wait_for(&second, |counts| counts.completed == 1).await;
        shutdown_tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        let job = second.job(job_id).unwrap().unwrap();
        assert_eq!(job.attempts, 2);
    }
}

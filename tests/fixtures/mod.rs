//! Test fixtures and fake implementations for integration testing

#![allow(dead_code)]

use ladder_room::broadcast::BroadcastHub;
use ladder_room::config::{JobConfig, MatchSettings, PlatformSettings, RatingConfig};
use ladder_room::error::{LadderError, Result};
use ladder_room::jobs::{Job, JobCoordinator, JobCounts, JobState, PlatformJobHandler};
use ladder_room::lifecycle::{MatchStateMachine, Settlement};
use ladder_room::metrics::MetricsCollector;
use ladder_room::rating::{BracketTable, RatingEngine};
use ladder_room::roles::{InMemoryGuildPlatform, RoleSynchronizer};
use ladder_room::store::{InMemoryRecordStore, JobStore, RecordStore, Transaction};
use ladder_room::types::{
    JobId, Match, MatchId, MatchResult, PlayerId, PlayerRatingRecord, Principal, PrincipalRole,
    SeriesType, Team, TeamAssignment,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Record store whose commits can be made to fail on demand
///
/// Reads always go to the wrapped store. Queued errors are returned by the
/// next commits in order, without applying anything.
#[derive(Debug, Default)]
pub struct FlakyRecordStore {
    inner: InMemoryRecordStore,
    commit_failures: Mutex<VecDeque<LadderError>>,
    /// Keys written by each applied commit
    commits: Mutex<Vec<Vec<String>>>,
}

impl FlakyRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_commit(&self, error: LadderError) {
        self.commit_failures.lock().unwrap().push_back(error);
    }

    /// Commits that reached the wrapped store
    pub fn applied_commits(&self) -> usize {
        self.commits.lock().unwrap().len()
    }

    pub fn last_commit_keys(&self) -> Vec<String> {
        self.commits.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

impl RecordStore for FlakyRecordStore {
    fn get_player(&self, player_id: &PlayerId) -> Result<Option<PlayerRatingRecord>> {
        self.inner.get_player(player_id)
    }

    fn get_players(
        &self,
        player_ids: &[PlayerId],
    ) -> Result<HashMap<PlayerId, PlayerRatingRecord>> {
        self.inner.get_players(player_ids)
    }

    fn get_match(&self, match_id: &MatchId) -> Result<Option<Match>> {
        self.inner.get_match(match_id)
    }

    fn commit(&self, transaction: Transaction) -> Result<()> {
        if let Some(error) = self.commit_failures.lock().unwrap().pop_front() {
            return Err(error.into());
        }
        let keys = transaction.writes().iter().map(|write| write.key()).collect();
        self.inner.commit(transaction)?;
        self.commits.lock().unwrap().push(keys);
        Ok(())
    }

    fn player_count(&self) -> Result<usize> {
        self.inner.player_count()
    }
}

impl JobStore for FlakyRecordStore {
    fn take_next_job(&self) -> Result<Option<Job>> {
        self.inner.take_next_job()
    }

    fn complete_job(&self, job_id: JobId) -> Result<JobState> {
        self.inner.complete_job(job_id)
    }

    fn delay_job(
        &self,
        job_id: JobId,
        error: String,
        ready_at: DateTime<Utc>,
    ) -> Result<JobState> {
        self.inner.delay_job(job_id, error, ready_at)
    }

    fn fail_job(&self, job_id: JobId, error: String) -> Result<JobState> {
        self.inner.fail_job(job_id, error)
    }

    fn promote_due_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner.promote_due_jobs(now)
    }

    fn requeue_active_jobs(&self) -> Result<usize> {
        self.inner.requeue_active_jobs()
    }

    fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.inner.get_job(job_id)
    }

    fn failed_jobs(&self) -> Result<Vec<Job>> {
        self.inner.failed_jobs()
    }

    fn job_counts(&self) -> Result<JobCounts> {
        self.inner.job_counts()
    }
}

/// Every component wired together around in-memory fakes
pub struct TestSystem {
    pub metrics: Arc<MetricsCollector>,
    pub store: Arc<FlakyRecordStore>,
    pub guild: Arc<InMemoryGuildPlatform>,
    pub brackets: Arc<BracketTable>,
    pub jobs: JobCoordinator,
    pub hub: BroadcastHub,
    pub machine: MatchStateMachine,
    pub handler: PlatformJobHandler,
}

pub struct TestSystemBuilder {
    players_per_match: usize,
    hub_capacity: usize,
    jobs: JobConfig,
    guild: Option<Arc<InMemoryGuildPlatform>>,
}

impl TestSystemBuilder {
    pub fn new(players_per_match: usize) -> Self {
        Self {
            players_per_match,
            hub_capacity: 64,
            jobs: JobConfig {
                base_delay_ms: 1,
                max_delay_ms: 5,
                poll_interval_ms: 1,
                ..JobConfig::default()
            },
            guild: None,
        }
    }

    pub fn hub_capacity(mut self, capacity: usize) -> Self {
        self.hub_capacity = capacity;
        self
    }

    pub fn max_job_attempts(mut self, attempts: u32) -> Self {
        self.jobs.max_attempts = attempts;
        self
    }

    pub fn guild(mut self, guild: InMemoryGuildPlatform) -> Self {
        self.guild = Some(Arc::new(guild));
        self
    }

    pub fn build(self) -> TestSystem {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let store = Arc::new(FlakyRecordStore::new());
        let guild = self
            .guild
            .unwrap_or_else(|| Arc::new(InMemoryGuildPlatform::auto_enrolling(Vec::new())));
        let brackets = Arc::new(BracketTable::nine_rank().unwrap());
        let engine =
            Arc::new(RatingEngine::new(RatingConfig::default(), brackets.clone()).unwrap());
        let jobs = JobCoordinator::new(self.jobs, store.clone(), metrics.clone());
        let hub = BroadcastHub::new(self.hub_capacity, metrics.clone());

        let machine = MatchStateMachine::new(
            store.clone(),
            engine,
            hub.clone(),
            MatchSettings {
                players_per_match: self.players_per_match,
                ..MatchSettings::default()
            },
            metrics.clone(),
        );

        let synchronizer = Arc::new(RoleSynchronizer::new(
            guild.clone(),
            brackets.clone(),
            PlatformSettings::default(),
            metrics.clone(),
        ));
        let handler = PlatformJobHandler::new(synchronizer, store.clone());

        TestSystem {
            metrics,
            store,
            guild,
            brackets,
            jobs,
            hub,
            machine,
            handler,
        }
    }
}

impl TestSystem {
    pub fn new(players_per_match: usize) -> Self {
        TestSystemBuilder::new(players_per_match).build()
    }

    /// Store a calibrated player at `rating`
    pub fn seed_player(&self, player_id: &str, rating: u32) {
        let record = PlayerRatingRecord {
            matches_played: 20,
            is_calibrating: false,
            ..PlayerRatingRecord::seeded(player_id, rating)
        };
        self.store
            .commit(Transaction::new().put_player(record))
            .unwrap();
    }

    pub fn rating_of(&self, player_id: &str) -> Option<PlayerRatingRecord> {
        self.store.get_player(&player_id.to_string()).unwrap()
    }

    /// Create, split and start a match
    pub async fn start_match(&self, team_a: &[&str], team_b: &[&str]) -> Match {
        let to_ids = |ids: &[&str]| ids.iter().map(|id| id.to_string()).collect::<Vec<_>>();
        let roster: Vec<PlayerId> = to_ids(team_a).into_iter().chain(to_ids(team_b)).collect();

        let record = self
            .machine
            .create(&admin(), roster, SeriesType::Bo1)
            .await
            .unwrap();
        self.machine
            .assign_teams(
                &admin(),
                record.match_id,
                TeamAssignment {
                    team_a: to_ids(team_a),
                    team_b: to_ids(team_b),
                },
            )
            .await
            .unwrap();
        self.machine.start(&admin(), record.match_id).await.unwrap()
    }

    pub async fn settle(&self, match_id: MatchId, winner: Team) -> Result<Settlement> {
        self.machine
            .settle(&admin(), match_id, win_for(winner))
            .await
    }

    /// Run queued jobs, including retries, until none are pending
    pub async fn drain_jobs(&self) {
        self.jobs.drain(&self.handler).await.unwrap();
    }
}

pub fn admin() -> Principal {
    Principal::new("admin", PrincipalRole::Admin)
}

pub fn win_for(winning_team: Team) -> MatchResult {
    MatchResult {
        winning_team,
        stats: Vec::new(),
    }
}

/// The error carried by a failed call
pub fn ladder_error(err: &anyhow::Error) -> LadderError {
    LadderError::from_anyhow(err).cloned().unwrap()
}

pub fn sorted(mut roles: Vec<String>) -> Vec<String> {
    roles.sort();
    roles
}

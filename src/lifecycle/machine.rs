//! Match state machine implementation

use crate::broadcast::BroadcastHub;
use crate::config::MatchSettings;
use crate::error::{LadderError, Result};
use crate::jobs::{AnnouncementPayload, Job, JobPayload};
use crate::lifecycle::locks::MatchLocks;
use crate::lifecycle::validation::{
    authorize_cancel, authorize_create, authorize_staff, validate_result, validate_roster,
    validate_teams,
};
use crate::metrics::MetricsCollector;
use crate::rating::{MatchOutcome, RatingEngine, RatingUpdate};
use crate::store::{RecordStore, Transaction};
use crate::types::{
    DomainEvent, JobId, LifecycleTransition, Match, MatchId, MatchLifecycleEvent, MatchResult,
    MatchState, MatchTimestamps, PlayerId, PlayerRatingRecord, Principal, RatingDeltaEvent,
    SeriesType, Team, TeamAssignment,
};
use crate::utils::{current_timestamp, generate_match_id};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Counters kept by the state machine
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchMachineStats {
    /// Matches created
    pub created: u64,
    /// Matches that reached TEAMS_ASSIGNED
    pub teams_assigned: u64,
    /// Matches started
    pub started: u64,
    /// Matches settled
    pub settled: u64,
    /// Matches cancelled
    pub cancelled: u64,
    /// Settlement commits retried after a version conflict
    pub commit_conflicts: u64,
    /// Jobs committed by settlement
    pub jobs_enqueued: u64,
    /// Live per-match locks
    pub active_locks: usize,
}

/// Everything a successful settlement produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    #[serde(rename = "match")]
    pub match_record: Match,
    pub deltas: Vec<RatingDeltaEvent>,
    pub jobs: Vec<JobId>,
}

/// Match lifecycle coordinator
#[derive(Clone)]
pub struct MatchStateMachine {
    store: Arc<dyn RecordStore>,
    engine: Arc<RatingEngine>,
    hub: BroadcastHub,
    locks: MatchLocks,
    settings: MatchSettings,
    metrics: Arc<MetricsCollector>,
    stats: Arc<RwLock<MatchMachineStats>>,
}

impl MatchStateMachine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        engine: Arc<RatingEngine>,
        hub: BroadcastHub,
        settings: MatchSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            engine,
            hub,
            locks: MatchLocks::new(),
            settings,
            metrics,
            stats: Arc::new(RwLock::new(MatchMachineStats::default())),
        }
    }

    pub fn engine(&self) -> &RatingEngine {
        &self.engine
    }

    /// Open a new match in `FORMING`
    pub async fn create(
        &self,
        principal: &Principal,
        roster: Vec<PlayerId>,
        series_type: SeriesType,
    ) -> Result<Match> {
        authorize_create(principal, &roster)?;
        validate_roster(&roster, self.settings.players_per_match)?;

        let record = Match {
            match_id: generate_match_id(),
            series_type,
            created_by: principal.player_id.clone(),
            roster,
            state: MatchState::Forming,
            teams: None,
            result: None,
            cancel_reason: None,
            timestamps: MatchTimestamps {
                created_at: current_timestamp(),
                teams_assigned_at: None,
                started_at: None,
                settled_at: None,
                cancelled_at: None,
            },
            version: 0,
        };

        let record = self.commit_match(record)?;
        info!(
            "Match {} created by {} with {} players",
            record.match_id,
            principal.player_id,
            record.roster.len()
        );
        self.after_transition(&record, LifecycleTransition::Created, None);
        Ok(record)
    }

    /// `FORMING -> TEAMS_ASSIGNED`
    pub async fn assign_teams(
        &self,
        principal: &Principal,
        match_id: MatchId,
        teams: TeamAssignment,
    ) -> Result<Match> {
        authorize_staff(principal, "assign teams")?;
        let _guard = self.locks.acquire(match_id).await?;

        let outcome = self.load(match_id).and_then(|mut record| {
            Self::require_state(&record, MatchState::Forming, "assign teams")?;
            validate_teams(&record.roster, &teams)?;

            record.teams = Some(teams);
            record.state = MatchState::TeamsAssigned;
            record.timestamps.teams_assigned_at = Some(current_timestamp());
            self.commit_match(record)
        });
        self.release_if_finished(match_id, &outcome);

        let record = outcome?;
        debug!("Teams assigned for match {}", match_id);
        self.after_transition(&record, LifecycleTransition::TeamsAssigned, None);
        Ok(record)
    }

    /// `TEAMS_ASSIGNED -> IN_PROGRESS`
    pub async fn start(&self, principal: &Principal, match_id: MatchId) -> Result<Match> {
        authorize_staff(principal, "start a match")?;
        let _guard = self.locks.acquire(match_id).await?;

        let outcome = self.load(match_id).and_then(|mut record| {
            Self::require_state(&record, MatchState::TeamsAssigned, "start")?;
            record.state = MatchState::InProgress;
            record.timestamps.started_at = Some(current_timestamp());
            self.commit_match(record)
        });
        self.release_if_finished(match_id, &outcome);

        let record = outcome?;
        info!("Match {} started", match_id);
        self.after_transition(&record, LifecycleTransition::Started, None);
        Ok(record)
    }

    /// Any live state `-> CANCELLED`; ratings are untouched
    pub async fn cancel(
        &self,
        principal: &Principal,
        match_id: MatchId,
        reason: impl Into<String>,
    ) -> Result<Match> {
        let reason = reason.into();
        let _guard = self.locks.acquire(match_id).await?;

        let outcome = self.load(match_id).and_then(|mut record| {
            if record.state.is_terminal() {
                return Err(Self::invalid_transition(&record, "cancel"));
            }
            authorize_cancel(principal, &record)?;

            record.state = MatchState::Cancelled;
            record.cancel_reason = Some(reason.clone());
            record.timestamps.cancelled_at = Some(current_timestamp());
            self.commit_match(record)
        });
        self.release_if_finished(match_id, &outcome);

        let record = outcome?;
        info!("Match {} cancelled: {}", match_id, reason);
        self.after_transition(&record, LifecycleTransition::Cancelled, Some(reason));
        Ok(record)
    }

    /// `IN_PROGRESS -> SETTLED`
    ///
    /// Applies every player's rating, the match transition and the follow-up
    /// jobs in one transaction, retrying on version conflicts with concurrent
    /// settlements of other matches. The jobs are a role sync for every
    /// player whose bracket changed plus one announcement. Once committed,
    /// publishes one rating delta per player. A second call fails with
    /// [`LadderError::AlreadySettled`] and changes nothing.
    pub async fn settle(
        &self,
        principal: &Principal,
        match_id: MatchId,
        result: MatchResult,
    ) -> Result<Settlement> {
        authorize_staff(principal, "settle a match")?;
        let _guard = self.locks.acquire(match_id).await?;
        let timer = self.metrics.start_timer();

        let outcome = self.commit_settlement(match_id, &result);
        self.release_if_finished(match_id, &outcome);
        let (record, deltas, jobs) = outcome?;
        self.update_stats(|stats| stats.jobs_enqueued += jobs.len() as u64);

        self.after_transition(&record, LifecycleTransition::Settled, None);
        for delta in &deltas {
            self.publish(DomainEvent::RatingDelta(delta.clone()));
        }

        let changes: Vec<i32> = deltas.iter().map(|d| d.change).collect();
        self.metrics.record_settlement(timer.stop(), &changes);
        info!(
            "Match {} settled, team {:?} won, {} job(s) enqueued",
            match_id, result.winning_team, jobs.len()
        );

        Ok(Settlement {
            match_record: record,
            deltas,
            jobs,
        })
    }

    pub fn get_match(&self, match_id: MatchId) -> Result<Option<Match>> {
        self.store.get_match(&match_id)
    }

    /// Current rating record, or the seed record for an unseen player
    pub fn player_rating(&self, player_id: &PlayerId) -> Result<PlayerRatingRecord> {
        Ok(self
            .store
            .get_player(player_id)?
            .unwrap_or_else(|| self.engine.seed_record(player_id.clone())))
    }

    pub fn get_stats(&self) -> Result<MatchMachineStats> {
        let mut stats = self
            .stats
            .read()
            .map_err(|_| LadderError::lock_poisoned("match stats"))?
            .clone();
        stats.active_locks = self.locks.len();
        Ok(stats)
    }

    fn load(&self, match_id: MatchId) -> Result<Match> {
        self.store
            .get_match(&match_id)?
            .ok_or_else(|| LadderError::MatchNotFound { match_id }.into())
    }

    fn require_state(record: &Match, expected: MatchState, action: &str) -> Result<()> {
        if record.state == expected {
            Ok(())
        } else {
            Err(Self::invalid_transition(record, action))
        }
    }

    fn invalid_transition(record: &Match, action: &str) -> anyhow::Error {
        LadderError::InvalidTransition {
            match_id: record.match_id,
            from: record.state,
            action: action.to_string(),
        }
        .into()
    }

    /// Commit a lone match write and return it as stored
    fn commit_match(&self, mut record: Match) -> Result<Match> {
        self.store
            .commit(Transaction::new().put_match(record.clone()))?;
        record.version += 1;
        Ok(record)
    }

    fn commit_settlement(
        &self,
        match_id: MatchId,
        result: &MatchResult,
    ) -> Result<(Match, Vec<RatingDeltaEvent>, Vec<JobId>)> {
        let max_attempts = self.settings.max_commit_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let record = self.load(match_id)?;
            match record.state {
                MatchState::InProgress => {}
                MatchState::Settled => return Err(LadderError::AlreadySettled { match_id }.into()),
                _ => return Err(Self::invalid_transition(&record, "settle")),
            }
            validate_result(&record.roster, result)?;

            let (mut settled, updates) = self.compute_settlement(record, result)?;
            let deltas: Vec<RatingDeltaEvent> = updates
                .iter()
                .map(|update| self.delta_event(&settled, update))
                .collect();
            let jobs = Self::settlement_jobs(&settled, &deltas)?;
            let job_ids: Vec<JobId> = jobs.iter().map(|job| job.job_id).collect();

            let transaction = updates
                .iter()
                .fold(Transaction::new(), |tx, update| {
                    tx.put_player(update.record.clone())
                })
                .put_match(settled.clone());
            let transaction = jobs.into_iter().fold(transaction, Transaction::put_job);

            match self.store.commit(transaction) {
                Ok(()) => {
                    settled.version += 1;
                    return Ok((settled, deltas, job_ids));
                }
                Err(e) => {
                    let conflict = matches!(
                        LadderError::from_anyhow(&e),
                        Some(LadderError::StoreConflict { .. })
                    );
                    if !conflict || attempt >= max_attempts {
                        return Err(e);
                    }
                    warn!(
                        "Settlement of match {} hit a conflict (attempt {}/{}): {}",
                        match_id, attempt, max_attempts, e
                    );
                    self.metrics.record_commit_conflict();
                    self.update_stats(|stats| stats.commit_conflicts += 1);
                }
            }
        }
    }

    /// Rate every roster player against the mean of the opposing team
    fn compute_settlement(
        &self,
        mut record: Match,
        result: &MatchResult,
    ) -> Result<(Match, Vec<RatingUpdate>)> {
        let teams = record
            .teams
            .clone()
            .ok_or_else(|| LadderError::InternalError {
                message: format!("Match {} is in progress without teams", record.match_id),
            })?;

        let mut records = self.store.get_players(&record.roster)?;
        for player_id in &record.roster {
            records
                .entry(player_id.clone())
                .or_insert_with(|| self.engine.seed_record(player_id.clone()));
        }

        let team_mean = |team: Team| -> f64 {
            let members = teams.members(team);
            let total: f64 = members
                .iter()
                .filter_map(|id| records.get(id))
                .map(|r| f64::from(r.rating))
                .sum();
            total / members.len().max(1) as f64
        };
        let (mean_a, mean_b) = (team_mean(Team::A), team_mean(Team::B));

        let mut updates = Vec::with_capacity(record.roster.len());
        for player_id in &record.roster {
            let team = teams
                .team_of(player_id)
                .ok_or_else(|| LadderError::InternalError {
                    message: format!("{} has no team in match {}", player_id, record.match_id),
                })?;
            let current = records.get(player_id).ok_or_else(|| LadderError::InternalError {
                message: format!("No rating record for {}", player_id),
            })?;
            let outcome = MatchOutcome {
                won: team == result.winning_team,
                opponent_rating: match team.opponent() {
                    Team::A => mean_a,
                    Team::B => mean_b,
                },
            };
            updates.push(self.engine.settle(current, &outcome));
        }

        record.state = MatchState::Settled;
        record.result = Some(result.clone());
        record.timestamps.settled_at = Some(current_timestamp());
        Ok((record, updates))
    }

    fn delta_event(&self, record: &Match, update: &RatingUpdate) -> RatingDeltaEvent {
        let won = record
            .teams
            .as_ref()
            .and_then(|teams| teams.team_of(&update.record.player_id))
            .zip(record.result.as_ref())
            .is_some_and(|(team, result)| team == result.winning_team);

        RatingDeltaEvent {
            player_id: update.record.player_id.clone(),
            match_id: record.match_id,
            old_rating: update.old_rating,
            new_rating: update.record.rating,
            change: update.change,
            won,
            series_type: record.series_type,
            old_bracket: update.old_bracket.clone(),
            new_bracket: update.new_bracket.clone(),
            created_at: record.timestamps.settled_at.unwrap_or_else(current_timestamp),
        }
    }

    /// Follow-up work written in the same commit as the ratings
    fn settlement_jobs(record: &Match, deltas: &[RatingDeltaEvent]) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = deltas
            .iter()
            .filter(|d| d.bracket_changed())
            .map(|delta| {
                Job::new(JobPayload::RoleSync {
                    player_id: delta.player_id.clone(),
                    rating: delta.new_rating,
                })
            })
            .collect();

        let winning_team = record
            .result
            .as_ref()
            .map(|result| result.winning_team)
            .ok_or_else(|| LadderError::InternalError {
                message: format!("Settled match {} has no result", record.match_id),
            })?;
        jobs.push(Job::new(JobPayload::Announcement(AnnouncementPayload {
            match_id: record.match_id,
            series_type: record.series_type,
            winning_team,
            deltas: deltas.to_vec(),
        })));
        Ok(jobs)
    }

    /// Drop the match lock once no further transition is possible
    fn release_if_finished<T>(&self, match_id: MatchId, outcome: &Result<T>) {
        let finished = match self.store.get_match(&match_id) {
            Ok(Some(record)) => record.state.is_terminal(),
            Ok(None) => true,
            Err(_) => outcome.is_err(),
        };
        if finished {
            self.locks.release(&match_id);
        }
    }

    fn after_transition(
        &self,
        record: &Match,
        transition: LifecycleTransition,
        reason: Option<String>,
    ) {
        self.metrics.record_transition(transition);
        self.update_stats(|stats| match transition {
            LifecycleTransition::Created => stats.created += 1,
            LifecycleTransition::TeamsAssigned => stats.teams_assigned += 1,
            LifecycleTransition::Started => stats.started += 1,
            LifecycleTransition::Settled => stats.settled += 1,
            LifecycleTransition::Cancelled => stats.cancelled += 1,
        });

        self.publish(DomainEvent::MatchLifecycle(MatchLifecycleEvent {
            match_id: record.match_id,
            transition,
            state: record.state,
            roster: record.roster.clone(),
            reason,
            timestamp: current_timestamp(),
        }));
    }

    /// Best effort; a failed publish never undoes a committed transition
    fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.hub.publish(&event) {
            error!("Failed to publish {} event: {}", event.kind().as_str(), e);
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut MatchMachineStats)) {
        match self.stats.write() {
            Ok(mut stats) => f(&mut stats),
            Err(_) => warn!("Match stats lock poisoned, skipping update"),
        }
    }
}

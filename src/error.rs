//! Error types for the ladder service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Domain failures are carried as [`LadderError`]
//! inside the `anyhow::Error` so callers can classify them with `downcast_ref`.

use crate::types::{JobId, MatchId, MatchState};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific ladder scenarios
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LadderError {
    #[error("Invalid transition for match {match_id}: cannot {action} from {from:?}")]
    InvalidTransition {
        match_id: MatchId,
        from: MatchState,
        action: String,
    },

    #[error("Match already settled: {match_id}")]
    AlreadySettled { match_id: MatchId },

    #[error("Match not found: {match_id}")]
    MatchNotFound { match_id: MatchId },

    #[error("Invalid roster: {reason}")]
    InvalidRoster { reason: String },

    #[error("Invalid team assignment: {reason}")]
    InvalidTeams { reason: String },

    #[error("Invalid match result: {reason}")]
    InvalidResult { reason: String },

    #[error("Principal {player_id} is not allowed to {action}")]
    Unauthorized { player_id: String, action: String },

    #[error("Concurrent modification of record {key}")]
    StoreConflict { key: String },

    #[error("Storage failure: {message}")]
    StorageFailure { message: String },

    #[error("External platform unavailable: {message}")]
    SyncTransientFailure { message: String },

    #[error("External platform rejected request: {message}")]
    SyncPermanentFailure { message: String },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl LadderError {
    /// Extract the ladder error carried by an `anyhow::Error`, if any
    pub fn from_anyhow(err: &anyhow::Error) -> Option<&LadderError> {
        err.downcast_ref::<LadderError>()
    }

    /// Whether a job failing with this error should never be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            LadderError::SyncPermanentFailure { .. }
                | LadderError::InvalidResult { .. }
                | LadderError::ConfigurationError { .. }
        )
    }

    /// Shorthand for lock poisoning, which every in-process component maps the same way
    pub(crate) fn lock_poisoned(what: &str) -> Self {
        LadderError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

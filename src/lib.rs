//! Ladder Room - match lifecycle and rating sync for ranked community play
//!
//! This crate drives matches from creation to settlement, rates players with
//! Elo, keeps their guild rank roles in step through a retrying job queue and
//! streams every change to live subscribers.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod lifecycle;
pub mod metrics;
pub mod rating;
pub mod roles;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{LadderError, Result};
pub use types::*;

// Re-export key components
pub use broadcast::BroadcastHub;
pub use jobs::JobCoordinator;
pub use lifecycle::MatchStateMachine;
pub use rating::{BracketTable, RatingEngine};
pub use roles::{GuildPlatform, RoleSynchronizer};
pub use store::{InMemoryRecordStore, JobStore, RecordStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Elo rating engine and rank bracket table
//!
//! This module provides the pure settlement step that turns a match outcome
//! into a new rating record, and the immutable bracket table that maps
//! ratings onto guild rank roles.

pub mod brackets;
pub mod engine;

// Re-export commonly used types
pub use brackets::{Bracket, BracketTable};
pub use engine::{MatchOutcome, RatingEngine, RatingUpdate};

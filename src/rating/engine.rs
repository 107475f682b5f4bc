//! Elo settlement step
//!
//! Pure and deterministic: given a player's current record and the outcome of
//! one match, produce the updated record. Persisting the result is the
//! caller's job, inside the same transaction as the match transition.

use crate::config::rating::RatingConfig;
use crate::error::Result;
use crate::rating::brackets::BracketTable;
use crate::types::{PlayerId, PlayerRatingRecord};
use crate::utils::current_timestamp;
use serde::{Deserialize, Serialize};
use skillratings::elo::{expected_score, EloRating};
use std::sync::Arc;

/// What the engine needs to know about one player's match
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub won: bool,
    /// Estimated rating of the opposition, usually the opposing team's mean
    pub opponent_rating: f64,
}

/// Result of settling one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingUpdate {
    pub record: PlayerRatingRecord,
    pub old_rating: u32,
    pub change: i32,
    pub old_bracket: String,
    pub new_bracket: String,
}

impl RatingUpdate {
    pub fn bracket_changed(&self) -> bool {
        self.old_bracket != self.new_bracket
    }
}

/// Elo rating engine with calibration and a post-calibration cap
#[derive(Debug, Clone)]
pub struct RatingEngine {
    config: RatingConfig,
    brackets: Arc<BracketTable>,
}

impl RatingEngine {
    pub fn new(config: RatingConfig, brackets: Arc<BracketTable>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, brackets })
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    pub fn brackets(&self) -> &BracketTable {
        &self.brackets
    }

    /// Record for a player that has never been settled
    pub fn seed_record(&self, player_id: impl Into<PlayerId>) -> PlayerRatingRecord {
        PlayerRatingRecord::seeded(player_id, self.config.seed_rating)
    }

    /// Signed rating change for one match
    pub fn rating_delta(&self, rating: u32, calibrating: bool, outcome: &MatchOutcome) -> i32 {
        let (expected, _) = expected_score(
            &EloRating {
                rating: f64::from(rating),
            },
            &EloRating {
                rating: outcome.opponent_rating.max(0.0),
            },
        );
        let score = if outcome.won { 1.0 } else { 0.0 };
        let k = if calibrating {
            self.config.k_factor * self.config.calibration_multiplier
        } else {
            self.config.k_factor
        };

        let mut delta = (k * (score - expected)).round() as i64;
        if delta == 0 {
            // A decided match always moves the rating
            delta = if outcome.won { 1 } else { -1 };
        }
        if !calibrating {
            let cap = i64::from(self.config.max_delta);
            delta = delta.clamp(-cap, cap);
        }
        delta as i32
    }

    /// Settle one player: new rating, match count, calibration flag and peak
    pub fn settle(&self, record: &PlayerRatingRecord, outcome: &MatchOutcome) -> RatingUpdate {
        let change = self.rating_delta(record.rating, record.is_calibrating, outcome);
        let new_rating = (i64::from(record.rating) + i64::from(change)).clamp(0, i64::from(u32::MAX)) as u32;
        let matches_played = record.matches_played.saturating_add(1);

        let updated = PlayerRatingRecord {
            player_id: record.player_id.clone(),
            rating: new_rating,
            peak_rating: record.peak_rating.max(new_rating),
            matches_played,
            is_calibrating: record.is_calibrating
                && matches_played < self.config.calibration_matches,
            updated_at: current_timestamp(),
            version: record.version,
        };

        RatingUpdate {
            old_rating: record.rating,
            change: (i64::from(new_rating) - i64::from(record.rating)) as i32,
            old_bracket: self.brackets.bracket_for(record.rating).name.clone(),
            new_bracket: self.brackets.bracket_for(new_rating).name.clone(),
            record: updated,
        }
    }
}

//! Rating and rank-role configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Elo tuning for the rating engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Rating given to a player with no history
    pub seed_rating: u32,
    /// Matches a player spends calibrating
    pub calibration_matches: u32,
    /// Base Elo K-factor
    pub k_factor: f64,
    /// K-factor multiplier while calibrating
    pub calibration_multiplier: f64,
    /// Largest rating change per match once calibrated
    pub max_delta: u32,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            seed_rating: 1000,
            calibration_matches: 10,
            k_factor: 32.0,
            calibration_multiplier: 2.0,
            max_delta: 40,
        }
    }
}

impl RatingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.calibration_matches == 0 {
            return Err(anyhow!("Calibration match count must be greater than 0"));
        }
        if !(self.k_factor.is_finite() && self.k_factor > 0.0) {
            return Err(anyhow!("K-factor must be a positive number"));
        }
        if !(self.calibration_multiplier.is_finite() && self.calibration_multiplier >= 1.0) {
            return Err(anyhow!("Calibration multiplier must be at least 1.0"));
        }
        if self.max_delta == 0 {
            return Err(anyhow!("Max rating delta must be greater than 0"));
        }
        Ok(())
    }
}

/// Built-in rank tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RankPreset {
    /// Wood through Legend
    #[default]
    Nine,
    /// Wood through Diamond, the older layout
    Six,
}

impl FromStr for RankPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "nine" | "9" => Ok(RankPreset::Nine),
            "six" | "6" => Ok(RankPreset::Six),
            other => Err(anyhow!("Unknown rank preset: {}", other)),
        }
    }
}

/// One configured bracket: applies from `min_elo` up to the next bracket's minimum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketSpec {
    pub name: String,
    pub min_elo: u32,
    pub role_id: String,
}

/// Rank-role settings for the guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankSettings {
    pub preset: RankPreset,
    /// Explicit bracket list; overrides the preset when non-empty
    pub brackets: Vec<BracketSpec>,
    /// Role removed once a player holds any rank role
    pub unranked_role_id: String,
}

impl Default for RankSettings {
    fn default() -> Self {
        Self {
            preset: RankPreset::Nine,
            brackets: Vec::new(),
            unranked_role_id: "role-unranked".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_config_defaults_are_valid() {
        let config = RatingConfig::default();
        assert_eq!(config.seed_rating, 1000);
        assert_eq!(config.calibration_matches, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rating_config_rejects_bad_values() {
        let config = RatingConfig {
            calibration_multiplier: 0.5,
            ..RatingConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RatingConfig {
            max_delta: 0,
            ..RatingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rank_preset_parsing() {
        assert_eq!("six".parse::<RankPreset>().unwrap(), RankPreset::Six);
        assert_eq!("NINE".parse::<RankPreset>().unwrap(), RankPreset::Nine);
        assert!("seven".parse::<RankPreset>().is_err());
    }
}

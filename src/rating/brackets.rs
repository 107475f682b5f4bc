//! Rank bracket table
//!
//! A validated, immutable list of contiguous rating ranges covering `[0, ∞)`,
//! each bound to one guild role. Built once at startup and shared by reference.

use crate::config::rating::{BracketSpec, RankPreset, RankSettings};
use crate::error::{LadderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Nine-rank layout, the authoritative table
const NINE_RANK: [(&str, u32); 9] = [
    ("Wood", 0),
    ("Bronze", 500),
    ("Silver", 800),
    ("Gold", 1000),
    ("Platinum", 1200),
    ("Diamond", 1400),
    ("Master", 1600),
    ("Grandmaster", 1800),
    ("Legend", 2000),
];

/// Older six-rank layout
const SIX_RANK: [(&str, u32); 6] = [
    ("Wood", 0),
    ("Bronze", 500),
    ("Silver", 800),
    ("Gold", 1100),
    ("Platinum", 1400),
    ("Diamond", 2000),
];

/// One rating range bound to a guild role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub name: String,
    pub min_elo: u32,
    /// Inclusive upper bound; `None` for the top bracket
    pub max_elo: Option<u32>,
    pub role_id: String,
}

impl Bracket {
    pub fn contains(&self, rating: u32) -> bool {
        rating >= self.min_elo && self.max_elo.map_or(true, |max| rating <= max)
    }
}

/// Ordered, gap-free bracket table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketTable {
    brackets: Vec<Bracket>,
    unranked_role_id: String,
}

impl BracketTable {
    /// Build and validate a table from bracket minimums
    pub fn new(specs: Vec<BracketSpec>, unranked_role_id: impl Into<String>) -> Result<Self> {
        let unranked_role_id = unranked_role_id.into();
        let invalid = |message: String| LadderError::ConfigurationError { message };

        let first = specs
            .first()
            .ok_or_else(|| invalid("Bracket table cannot be empty".to_string()))?;
        if first.min_elo != 0 {
            return Err(invalid(format!(
                "First bracket '{}' must start at 0, found {}",
                first.name, first.min_elo
            ))
            .into());
        }

        for pair in specs.windows(2) {
            if pair[1].min_elo <= pair[0].min_elo {
                return Err(invalid(format!(
                    "Bracket '{}' must start above '{}' ({} <= {})",
                    pair[1].name, pair[0].name, pair[1].min_elo, pair[0].min_elo
                ))
                .into());
            }
        }

        let mut seen_roles = HashSet::with_capacity(specs.len());
        for spec in &specs {
            if spec.role_id.is_empty() {
                return Err(invalid(format!("Bracket '{}' has no role id", spec.name)).into());
            }
            if !seen_roles.insert(spec.role_id.as_str()) {
                return Err(invalid(format!(
                    "Bracket '{}' shares role id '{}' with another bracket",
                    spec.name, spec.role_id
                ))
                .into());
            }
            if spec.role_id == unranked_role_id {
                return Err(invalid(format!(
                    "Bracket '{}' reuses the unranked role id",
                    spec.name
                ))
                .into());
            }
        }

        let brackets = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| Bracket {
                name: spec.name.clone(),
                min_elo: spec.min_elo,
                max_elo: specs.get(i + 1).map(|next| next.min_elo - 1),
                role_id: spec.role_id.clone(),
            })
            .collect();

        Ok(Self {
            brackets,
            unranked_role_id,
        })
    }

    /// Build the table described by the rank settings
    pub fn from_settings(settings: &RankSettings) -> Result<Self> {
        if !settings.brackets.is_empty() {
            return Self::new(settings.brackets.clone(), &settings.unranked_role_id);
        }
        let layout: &[(&str, u32)] = match settings.preset {
            RankPreset::Nine => &NINE_RANK,
            RankPreset::Six => &SIX_RANK,
        };
        Self::new(preset_specs(layout), &settings.unranked_role_id)
    }

    /// The authoritative nine-rank table with placeholder role ids
    pub fn nine_rank() -> Result<Self> {
        Self::new(preset_specs(&NINE_RANK), "role-unranked")
    }

    /// The older six-rank table with placeholder role ids
    pub fn six_rank() -> Result<Self> {
        Self::new(preset_specs(&SIX_RANK), "role-unranked")
    }

    /// The single bracket containing `rating`
    pub fn bracket_for(&self, rating: u32) -> &Bracket {
        // Construction guarantees a first bracket at 0, so the index is >= 1
        let idx = self.brackets.partition_point(|b| b.min_elo <= rating);
        &self.brackets[idx - 1]
    }

    pub fn brackets(&self) -> &[Bracket] {
        &self.brackets
    }

    pub fn unranked_role_id(&self) -> &str {
        &self.unranked_role_id
    }

    /// Whether a role id belongs to any bracket
    pub fn is_rank_role(&self, role_id: &str) -> bool {
        self.brackets.iter().any(|b| b.role_id == role_id)
    }
}

fn preset_specs(layout: &[(&str, u32)]) -> Vec<BracketSpec> {
    layout
        .iter()
        .map(|(name, min_elo)| BracketSpec {
            name: name.to_string(),
            min_elo: *min_elo,
            role_id: format!("role-{}", name.to_lowercase()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spec(name: &str, min_elo: u32) -> BracketSpec {
        BracketSpec {
            name: name.to_string(),
            min_elo,
            role_id: format!("role-{}", name),
        }
    }

    #[test]
    fn test_nine_rank_boundaries() {
        let table = BracketTable::nine_rank().unwrap();
        assert_eq!(table.brackets().len(), 9);
        assert_eq!(table.bracket_for(0).name, "Wood");
        assert_eq!(table.bracket_for(495).name, "Wood");
        assert_eq!(table.bracket_for(499).name, "Wood");
        assert_eq!(table.bracket_for(500).name, "Bronze");
        assert_eq!(table.bracket_for(515).name, "Bronze");
        assert_eq!(table.bracket_for(799).name, "Bronze");
        assert_eq!(table.bracket_for(800).name, "Silver");
    }

    #[test]
    fn test_top_bracket_is_unbounded() {
        let table = BracketTable::nine_rank().unwrap();
        let top = table.bracket_for(2000);
        assert_eq!(top.name, "Legend");
        assert_eq!(top.max_elo, None);
        assert_eq!(table.bracket_for(u32::MAX).name, "Legend");

        let six = BracketTable::six_rank().unwrap();
        assert_eq!(six.bracket_for(2000).name, "Diamond");
        assert_eq!(six.bracket_for(1999).name, "Platinum");
    }

    #[test]
    fn test_rejects_table_not_starting_at_zero() {
        let result = BracketTable::new(vec![spec("low", 100), spec("high", 500)], "unranked");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_overlapping_minimums() {
        let result = BracketTable::new(
            vec![spec("a", 0), spec("b", 500), spec("c", 500)],
            "unranked",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_unranked_role_reuse() {
        let result = BracketTable::new(vec![spec("a", 0)], "role-a");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_shared_role_id() {
        let mut silver = spec("silver", 800);
        silver.role_id = "role-bronze".to_string();
        let err = BracketTable::new(
            vec![spec("wood", 0), spec("bronze", 500), silver],
            "unranked",
        )
        .unwrap_err();
        assert!(matches!(
            LadderError::from_anyhow(&err),
            Some(LadderError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_from_settings_prefers_explicit_brackets() {
        let settings = RankSettings {
            preset: RankPreset::Nine,
            brackets: vec![spec("rookie", 0), spec("veteran", 1500)],
            unranked_role_id: "fresh".to_string(),
        };
        let table = BracketTable::from_settings(&settings).unwrap();
        assert_eq!(table.brackets().len(), 2);
        assert_eq!(table.unranked_role_id(), "fresh");
        assert!(table.is_rank_role("role-veteran"));
        assert!(!table.is_rank_role("fresh"));
    }

    proptest! {
        #[test]
        fn prop_exactly_one_bracket_matches(rating in 0u32..10_000) {
            for table in [BracketTable::nine_rank().unwrap(), BracketTable::six_rank().unwrap()] {
                let matching = table.brackets().iter().filter(|b| b.contains(rating)).count();
                prop_assert_eq!(matching, 1);
                prop_assert!(table.bracket_for(rating).contains(rating));
            }
        }

        #[test]
        fn prop_brackets_are_contiguous(mins in proptest::collection::btree_set(1u32..5000, 0..8)) {
            let mut specs = vec![spec("base", 0)];
            specs.extend(mins.iter().map(|m| spec(&format!("b{}", m), *m)));
            let table = BracketTable::new(specs, "unranked").unwrap();

            for pair in table.brackets().windows(2) {
                prop_assert_eq!(pair[0].max_elo, Some(pair[1].min_elo - 1));
            }
            prop_assert_eq!(table.brackets().last().unwrap().max_elo, None);
        }
    }
}

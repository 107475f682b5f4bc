//! Input and permission checks for match transitions

use crate::error::{LadderError, Result};
use crate::types::{Match, MatchResult, MatchState, PlayerId, Principal, TeamAssignment};
use std::collections::HashSet;

/// Roster must have the configured size and unique, non-empty ids
pub fn validate_roster(roster: &[PlayerId], expected_size: usize) -> Result<()> {
    if roster.len() != expected_size {
        return Err(LadderError::InvalidRoster {
            reason: format!(
                "expected {} players, got {}",
                expected_size,
                roster.len()
            ),
        }
        .into());
    }

    let mut seen = HashSet::with_capacity(roster.len());
    for player_id in roster {
        if player_id.trim().is_empty() {
            return Err(LadderError::InvalidRoster {
                reason: "empty player id".to_string(),
            }
            .into());
        }
        if !seen.insert(player_id.as_str()) {
            return Err(LadderError::InvalidRoster {
                reason: format!("duplicate player {}", player_id),
            }
            .into());
        }
    }
    Ok(())
}

/// Teams must be non-empty, disjoint, and together cover exactly the roster
pub fn validate_teams(roster: &[PlayerId], teams: &TeamAssignment) -> Result<()> {
    let invalid = |reason: String| -> anyhow::Error { LadderError::InvalidTeams { reason }.into() };

    if teams.team_a.is_empty() || teams.team_b.is_empty() {
        return Err(invalid("both teams need at least one player".to_string()));
    }

    let roster_set: HashSet<&str> = roster.iter().map(String::as_str).collect();
    let mut assigned = HashSet::with_capacity(roster.len());

    for player_id in teams.team_a.iter().chain(&teams.team_b) {
        if !roster_set.contains(player_id.as_str()) {
            return Err(invalid(format!("{} is not on the roster", player_id)));
        }
        if !assigned.insert(player_id.as_str()) {
            return Err(invalid(format!("{} is assigned more than once", player_id)));
        }
    }

    if assigned.len() != roster_set.len() {
        let missing: Vec<&str> = roster_set.difference(&assigned).copied().collect();
        return Err(invalid(format!("unassigned players: {}", missing.join(", "))));
    }
    Ok(())
}

/// Stats may only name roster players, each at most once
pub fn validate_result(roster: &[PlayerId], result: &MatchResult) -> Result<()> {
    let mut seen = HashSet::with_capacity(result.stats.len());
    for stats in &result.stats {
        if !roster.contains(&stats.player_id) {
            return Err(LadderError::InvalidResult {
                reason: format!("stats for {} who is not on the roster", stats.player_id),
            }
            .into());
        }
        if !seen.insert(stats.player_id.as_str()) {
            return Err(LadderError::InvalidResult {
                reason: format!("duplicate stats for {}", stats.player_id),
            }
            .into());
        }
    }
    Ok(())
}

fn unauthorized(principal: &Principal, action: &str) -> anyhow::Error {
    LadderError::Unauthorized {
        player_id: principal.player_id.clone(),
        action: action.to_string(),
    }
    .into()
}

/// Staff may create any match; players only one they are playing in
pub fn authorize_create(principal: &Principal, roster: &[PlayerId]) -> Result<()> {
    if principal.is_staff() || roster.contains(&principal.player_id) {
        Ok(())
    } else {
        Err(unauthorized(principal, "create a match"))
    }
}

pub fn authorize_staff(principal: &Principal, action: &str) -> Result<()> {
    if principal.is_staff() {
        Ok(())
    } else {
        Err(unauthorized(principal, action))
    }
}

/// Staff may cancel any live match; the creator may cancel while forming
pub fn authorize_cancel(principal: &Principal, record: &Match) -> Result<()> {
    let creator_forming =
        record.state == MatchState::Forming && record.created_by == principal.player_id;
    if principal.is_staff() || creator_forming {
        Ok(())
    } else {
        Err(unauthorized(principal, "cancel a match"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlayerMatchStats, PrincipalRole, Team};

    fn roster(ids: &[&str]) -> Vec<PlayerId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn error_of(result: Result<()>) -> LadderError {
        LadderError::from_anyhow(&result.unwrap_err()).unwrap().clone()
    }

    #[test]
    fn test_roster_rules() {
        assert!(validate_roster(&roster(&["a", "b"]), 2).is_ok());
        assert!(matches!(
            error_of(validate_roster(&roster(&["a"]), 2)),
            LadderError::InvalidRoster { .. }
        ));
        assert!(validate_roster(&roster(&["a", "a"]), 2).is_err());
        assert!(validate_roster(&roster(&["a", " "]), 2).is_err());
    }

    #[test]
    fn test_team_rules() {
        let players = roster(&["a", "b", "c", "d"]);
        let teams = |a: &[&str], b: &[&str]| TeamAssignment {
            team_a: roster(a),
            team_b: roster(b),
        };

        assert!(validate_teams(&players, &teams(&["a", "b"], &["c", "d"])).is_ok());
        assert!(validate_teams(&players, &teams(&["a", "b", "c", "d"], &[])).is_err());
        assert!(validate_teams(&players, &teams(&["a", "b"], &["b", "c", "d"])).is_err());
        assert!(validate_teams(&players, &teams(&["a", "b"], &["c"])).is_err());
        assert!(matches!(
            error_of(validate_teams(&players, &teams(&["a", "x"], &["c", "d"]))),
            LadderError::InvalidTeams { .. }
        ));
    }

    #[test]
    fn test_result_rejects_outsiders() {
        let players = roster(&["a", "b"]);
        let stats = |id: &str| PlayerMatchStats {
            player_id: id.to_string(),
            rank_label: None,
            score: 10,
            kills: 1,
            deaths: 0,
            assists: 2,
        };

        let ok = MatchResult {
            winning_team: Team::A,
            stats: vec![stats("a")],
        };
        assert!(validate_result(&players, &ok).is_ok());

        let outsider = MatchResult {
            winning_team: Team::A,
            stats: vec![stats("z")],
        };
        assert!(matches!(
            error_of(validate_result(&players, &outsider)),
            LadderError::InvalidResult { .. }
        ));

        let duplicate = MatchResult {
            winning_team: Team::B,
            stats: vec![stats("a"), stats("a")],
        };
        assert!(validate_result(&players, &duplicate).is_err());
    }

    #[test]
    fn test_authorization() {
        let players = roster(&["a", "b"]);
        let player_a = Principal::new("a", PrincipalRole::Player);
        let outsider = Principal::new("z", PrincipalRole::Player);
        let moderator = Principal::new("mod", PrincipalRole::Moderator);

        assert!(authorize_create(&player_a, &players).is_ok());
        assert!(authorize_create(&outsider, &players).is_err());
        assert!(authorize_create(&moderator, &players).is_ok());

        assert!(authorize_staff(&player_a, "start a match").is_err());
        assert!(authorize_staff(&moderator, "start a match").is_ok());
    }
}

//! Wire frames and subscription filters

use crate::error::{LadderError, Result};
use crate::types::{DomainEvent, EventKind, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What goes over the live stream: an event kind and its JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl EventFrame {
    pub fn from_event(event: &DomainEvent) -> Result<Self> {
        let payload = match event {
            DomainEvent::RatingDelta(delta) => serde_json::to_value(delta),
            DomainEvent::MatchLifecycle(lifecycle) => serde_json::to_value(lifecycle),
        }
        .map_err(|e| LadderError::InternalError {
            message: format!("Failed to serialize {} event: {}", event.kind().as_str(), e),
        })?;

        Ok(Self {
            kind: event.kind(),
            payload,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            LadderError::InternalError {
                message: format!("Failed to serialize frame: {}", e),
            }
            .into()
        })
    }
}

/// Which events a connection wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionFilter {
    kinds: HashSet<EventKind>,
    /// Restrict to events concerning one player
    player_id: Option<PlayerId>,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl SubscriptionFilter {
    /// Every event kind, every player
    pub fn all() -> Self {
        Self {
            kinds: EventKind::ALL.into_iter().collect(),
            player_id: None,
        }
    }

    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            player_id: None,
        }
    }

    pub fn for_player(mut self, player_id: impl Into<PlayerId>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    /// Parse a comma-separated kind list such as `rating_delta,match_lifecycle`
    pub fn parse_kinds(raw: &str) -> Result<Self> {
        let kinds = raw
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| part.parse::<EventKind>())
            .collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(|reason| LadderError::ConfigurationError { message: reason })?;

        if kinds.is_empty() {
            return Ok(Self::all());
        }
        Ok(Self {
            kinds,
            player_id: None,
        })
    }

    pub fn matches(&self, event: &DomainEvent) -> bool {
        if !self.kinds.contains(&event.kind()) {
            return false;
        }
        match (&self.player_id, event) {
            (None, _) => true,
            (Some(player), DomainEvent::RatingDelta(delta)) => &delta.player_id == player,
            (Some(player), DomainEvent::MatchLifecycle(lifecycle)) => {
                lifecycle.roster.contains(player)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        LifecycleTransition, MatchLifecycleEvent, MatchState, RatingDeltaEvent, SeriesType,
    };
    use crate::utils::{current_timestamp, generate_match_id};

    fn delta_for(player: &str) -> DomainEvent {
        DomainEvent::RatingDelta(RatingDeltaEvent {
            player_id: player.to_string(),
            match_id: generate_match_id(),
            old_rating: 1000,
            new_rating: 1016,
            change: 16,
            won: true,
            series_type: SeriesType::Bo1,
            old_bracket: "Gold".to_string(),
            new_bracket: "Gold".to_string(),
            created_at: current_timestamp(),
        })
    }

    fn lifecycle_with(roster: &[&str]) -> DomainEvent {
        DomainEvent::MatchLifecycle(MatchLifecycleEvent {
            match_id: generate_match_id(),
            transition: LifecycleTransition::Cancelled,
            state: MatchState::Cancelled,
            roster: roster.iter().map(|p| p.to_string()).collect(),
            reason: Some("no show".to_string()),
            timestamp: current_timestamp(),
        })
    }

    #[test]
    fn test_frame_wire_format() {
        let frame = EventFrame::from_event(&delta_for("p1")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

        assert_eq!(json["kind"], "rating_delta");
        assert_eq!(json["payload"]["player_id"], "p1");
        assert_eq!(json["payload"]["change"], 16);
    }

    #[test]
    fn test_kind_filter() {
        let filter = SubscriptionFilter::kinds([EventKind::MatchLifecycle]);
        assert!(!filter.matches(&delta_for("p1")));
        assert!(filter.matches(&lifecycle_with(&["p1"])));
    }

    #[test]
    fn test_player_filter() {
        let filter = SubscriptionFilter::all().for_player("p2");
        assert!(!filter.matches(&delta_for("p1")));
        assert!(filter.matches(&delta_for("p2")));
        assert!(filter.matches(&lifecycle_with(&["p1", "p2"])));
        assert!(!filter.matches(&lifecycle_with(&["p3"])));
    }

    #[test]
    fn test_parse_kinds() {
        let filter = SubscriptionFilter::parse_kinds("rating_delta").unwrap();
        assert!(filter.matches(&delta_for("p1")));
        assert!(!filter.matches(&lifecycle_with(&["p1"])));

        assert_eq!(SubscriptionFilter::parse_kinds("").unwrap(), SubscriptionFilter::all());
        assert!(SubscriptionFilter::parse_kinds("rating_delta,gossip").is_err());
    }
}

//! Keeps a member's rank role in line with their rating

use crate::config::PlatformSettings;
use crate::error::{LadderError, Result};
use crate::jobs::AnnouncementPayload;
use crate::metrics::MetricsCollector;
use crate::rating::BracketTable;
use crate::roles::platform::{GuildPlatform, PlatformError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Role changes a reconcile pass made
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSyncOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl RoleSyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

fn classify(err: PlatformError) -> LadderError {
    if err.is_transient() {
        LadderError::SyncTransientFailure {
            message: err.to_string(),
        }
    } else {
        LadderError::SyncPermanentFailure {
            message: err.to_string(),
        }
    }
}

/// Reconciles rank roles against the bracket table
///
/// Every operation is idempotent: running it twice with the same inputs
/// leaves the member in the same state and reports success both times.
pub struct RoleSynchronizer {
    platform: Arc<dyn GuildPlatform>,
    brackets: Arc<BracketTable>,
    settings: PlatformSettings,
    metrics: Arc<MetricsCollector>,
}

impl RoleSynchronizer {
    pub fn new(
        platform: Arc<dyn GuildPlatform>,
        brackets: Arc<BracketTable>,
        settings: PlatformSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            platform,
            brackets,
            settings,
            metrics,
        }
    }

    /// Give `player_id` exactly the rank role for `rating`
    ///
    /// Stale rank roles are removed, the target role added if missing, and
    /// the unranked role dropped. Transient platform errors map to
    /// [`LadderError::SyncTransientFailure`], unknown members or roles to
    /// [`LadderError::SyncPermanentFailure`].
    pub async fn reconcile(&self, player_id: &str, rating: u32) -> Result<RoleSyncOutcome> {
        let bracket = self.brackets.bracket_for(rating);
        let target = bracket.role_id.as_str();
        let unranked = self.brackets.unranked_role_id();

        let held = self
            .platform
            .list_member_roles(player_id)
            .await
            .map_err(classify)?;

        let mut outcome = RoleSyncOutcome::default();

        for role in held
            .iter()
            .filter(|role| self.brackets.is_rank_role(role) && role.as_str() != target)
        {
            if self.remove(player_id, role).await? {
                outcome.removed.push(role.clone());
            }
        }

        if !held.iter().any(|role| role == target) {
            match self.platform.add_role(player_id, target).await {
                Ok(()) => {
                    self.metrics.record_role_operation("add");
                    outcome.added.push(target.to_string());
                }
                Err(PlatformError::AlreadyHasRole { .. }) => {}
                Err(e) => return Err(classify(e).into()),
            }
        }

        if held.iter().any(|role| role == unranked) && self.remove(player_id, unranked).await? {
            outcome.removed.push(unranked.to_string());
        }

        if outcome.is_noop() {
            debug!("Roles for {} already match {}", player_id, bracket.name);
        } else {
            info!(
                "Synced roles for {} to {} (added {:?}, removed {:?})",
                player_id, bracket.name, outcome.added, outcome.removed
            );
        }
        Ok(outcome)
    }

    /// Returns whether the role was actually removed
    async fn remove(&self, player_id: &str, role_id: &str) -> Result<bool> {
        match self.platform.remove_role(player_id, role_id).await {
            Ok(()) => {
                self.metrics.record_role_operation("remove");
                Ok(true)
            }
            Err(PlatformError::MissingRole { .. }) => Ok(false),
            Err(e) => Err(classify(e).into()),
        }
    }

    /// Post a settlement summary to the results channel
    pub async fn announce(&self, payload: &AnnouncementPayload) -> Result<()> {
        self.platform
            .post_message(&self.settings.results_channel_id, &payload.render())
            .await
            .map_err(classify)?;
        self.metrics.record_role_operation("announce");
        debug!("Announced result of match {}", payload.match_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::platform::{InMemoryGuildPlatform, MockGuildPlatform};
    use crate::types::{SeriesType, Team};
    use crate::utils::generate_match_id;

    fn synchronizer(platform: Arc<dyn GuildPlatform>) -> RoleSynchronizer {
        RoleSynchronizer::new(
            platform,
            Arc::new(BracketTable::nine_rank().unwrap()),
            PlatformSettings::default(),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_promotion_swaps_rank_role() {
        let guild = Arc::new(InMemoryGuildPlatform::new(Vec::new()));
        guild.add_member("p1", &["role-wood", "role-verified"]);
        let sync = synchronizer(guild.clone());

        let outcome = sync.reconcile("p1", 515).await.unwrap();
        assert_eq!(outcome.added, vec!["role-bronze".to_string()]);
        assert_eq!(outcome.removed, vec!["role-wood".to_string()]);

        let mut roles = guild.roles_of("p1");
        roles.sort();
        assert_eq!(roles, vec!["role-bronze", "role-verified"]);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let guild = Arc::new(InMemoryGuildPlatform::new(Vec::new()));
        guild.add_member("p1", &["role-unranked"]);
        let sync = synchronizer(guild.clone());

        let first = sync.reconcile("p1", 1000).await.unwrap();
        assert_eq!(first.added, vec!["role-gold".to_string()]);
        assert_eq!(first.removed, vec!["role-unranked".to_string()]);

        let second = sync.reconcile("p1", 1000).await.unwrap();
        assert!(second.is_noop());
        assert_eq!(guild.roles_of("p1"), vec!["role-gold"]);
    }

    #[tokio::test]
    async fn test_top_bracket_role() {
        let guild = Arc::new(InMemoryGuildPlatform::auto_enrolling(Vec::new()));
        let sync = synchronizer(guild.clone());

        sync.reconcile("p1", 2000).await.unwrap();
        assert_eq!(guild.roles_of("p1"), vec!["role-legend"]);
    }

    #[tokio::test]
    async fn test_already_has_role_counts_as_success() {
        let mut platform = MockGuildPlatform::new();
        platform
            .expect_list_member_roles()
            .returning(|_| Ok(Vec::new()));
        platform.expect_add_role().times(1).returning(|member, role| {
            Err(PlatformError::AlreadyHasRole {
                member_id: member.to_string(),
                role_id: role.to_string(),
            })
        });
        let sync = synchronizer(Arc::new(platform));

        let outcome = sync.reconcile("p1", 800).await.unwrap();
        assert!(outcome.is_noop());
    }

    #[tokio::test]
    async fn test_error_classification() {
        let guild = Arc::new(InMemoryGuildPlatform::new(Vec::new()));
        let sync = synchronizer(guild.clone());

        let err = sync.reconcile("ghost", 800).await.unwrap_err();
        let err = LadderError::from_anyhow(&err).unwrap();
        assert!(matches!(err, LadderError::SyncPermanentFailure { .. }));
        assert!(err.is_permanent());

        guild.add_member("p1", &[]);
        guild.inject_failure(PlatformError::Unavailable {
            message: "gateway timeout".to_string(),
        });
        let err = sync.reconcile("p1", 800).await.unwrap_err();
        assert!(matches!(
            LadderError::from_anyhow(&err),
            Some(LadderError::SyncTransientFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_announce_posts_to_results_channel() {
        let guild = Arc::new(InMemoryGuildPlatform::default());
        let sync = synchronizer(guild.clone());

        let payload = AnnouncementPayload {
            match_id: generate_match_id(),
            series_type: SeriesType::Bo1,
            winning_team: Team::B,
            deltas: Vec::new(),
        };
        sync.announce(&payload).await.unwrap();

        let messages = guild.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, PlatformSettings::default().results_channel_id);
        assert!(messages[0].1.contains("team B won"));
    }
}

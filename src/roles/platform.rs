//! Community-chat platform seam

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use thiserror::Error;

/// Errors reported by a guild platform
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Platform unavailable: {message}")]
    Unavailable { message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Unknown member: {member_id}")]
    UnknownMember { member_id: String },

    #[error("Unknown role: {role_id}")]
    UnknownRole { role_id: String },

    #[error("Member {member_id} already has role {role_id}")]
    AlreadyHasRole { member_id: String, role_id: String },

    #[error("Member {member_id} does not have role {role_id}")]
    MissingRole { member_id: String, role_id: String },
}

impl PlatformError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Unavailable { .. } | PlatformError::RateLimited { .. }
        )
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Guild-scoped operations the service needs from the chat platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GuildPlatform: Send + Sync {
    async fn list_member_roles(&self, member_id: &str) -> PlatformResult<Vec<String>>;

    async fn add_role(&self, member_id: &str, role_id: &str) -> PlatformResult<()>;

    async fn remove_role(&self, member_id: &str, role_id: &str) -> PlatformResult<()>;

    async fn post_message(&self, channel_id: &str, content: &str) -> PlatformResult<()>;
}

#[derive(Debug, Default)]
struct GuildState {
    members: HashMap<String, BTreeSet<String>>,
    messages: Vec<(String, String)>,
    injected: VecDeque<PlatformError>,
    calls: usize,
}

/// Guild held in memory
///
/// Used when no real platform is wired in, and by tests. Failures can be
/// injected to exercise retry paths.
#[derive(Debug, Default)]
pub struct InMemoryGuildPlatform {
    state: Mutex<GuildState>,
    /// Roles the guild knows; empty accepts any role id
    known_roles: HashSet<String>,
    /// Create members on first use instead of reporting them unknown
    auto_enroll: bool,
}

impl InMemoryGuildPlatform {
    /// Strict guild: members must be added before use
    pub fn new(known_roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            known_roles: known_roles.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Guild that enrolls any member it is asked about
    pub fn auto_enrolling(known_roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            auto_enroll: true,
            ..Self::new(known_roles)
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut GuildState) -> PlatformResult<T>) -> PlatformResult<T> {
        let mut state = self.state.lock().map_err(|_| PlatformError::Unavailable {
            message: "guild state lock poisoned".to_string(),
        })?;
        state.calls += 1;
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        f(&mut state)
    }

    fn member<'a>(
        &self,
        state: &'a mut GuildState,
        member_id: &str,
    ) -> PlatformResult<&'a mut BTreeSet<String>> {
        if self.auto_enroll {
            return Ok(state.members.entry(member_id.to_string()).or_default());
        }
        state
            .members
            .get_mut(member_id)
            .ok_or_else(|| PlatformError::UnknownMember {
                member_id: member_id.to_string(),
            })
    }

    fn check_role(&self, role_id: &str) -> PlatformResult<()> {
        if self.known_roles.is_empty() || self.known_roles.contains(role_id) {
            Ok(())
        } else {
            Err(PlatformError::UnknownRole {
                role_id: role_id.to_string(),
            })
        }
    }

    pub fn add_member(&self, member_id: &str, roles: &[&str]) {
        if let Ok(mut state) = self.state.lock() {
            state.members.insert(
                member_id.to_string(),
                roles.iter().map(|r| r.to_string()).collect(),
            );
        }
    }

    /// Fail the next call with `error`; queued errors are consumed in order
    pub fn inject_failure(&self, error: PlatformError) {
        if let Ok(mut state) = self.state.lock() {
            state.injected.push_back(error);
        }
    }

    pub fn roles_of(&self, member_id: &str) -> Vec<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.members.get(member_id).cloned())
            .map(|roles| roles.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .map(|state| state.messages.clone())
            .unwrap_or_default()
    }

    /// Total calls made against the platform, including failed ones
    pub fn call_count(&self) -> usize {
        self.state.lock().map(|state| state.calls).unwrap_or(0)
    }
}

#[async_trait]
impl GuildPlatform for InMemoryGuildPlatform {
    async fn list_member_roles(&self, member_id: &str) -> PlatformResult<Vec<String>> {
        self.with_state(|state| {
            Ok(self
                .member(state, member_id)?
                .iter()
                .cloned()
                .collect())
        })
    }

    async fn add_role(&self, member_id: &str, role_id: &str) -> PlatformResult<()> {
        self.check_role(role_id)?;
        self.with_state(|state| {
            if self.member(state, member_id)?.insert(role_id.to_string()) {
                Ok(())
            } else {
                Err(PlatformError::AlreadyHasRole {
                    member_id: member_id.to_string(),
                    role_id: role_id.to_string(),
                })
            }
        })
    }

    async fn remove_role(&self, member_id: &str, role_id: &str) -> PlatformResult<()> {
        self.check_role(role_id)?;
        self.with_state(|state| {
            if self.member(state, member_id)?.remove(role_id) {
                Ok(())
            } else {
                Err(PlatformError::MissingRole {
                    member_id: member_id.to_string(),
                    role_id: role_id.to_string(),
                })
            }
        })
    }

    async fn post_message(&self, channel_id: &str, content: &str) -> PlatformResult<()> {
        self.with_state(|state| {
            state
                .messages
                .push((channel_id.to_string(), content.to_string()));
            Ok(())
        })
    }
}

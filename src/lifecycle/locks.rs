//! Per-match mutual exclusion

use crate::error::{LadderError, Result};
use crate::types::MatchId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lock map keyed by match id
///
/// Transitions of one match run one at a time; different matches never
/// contend. Entries are created on first use and released once the match
/// is finished.
#[derive(Debug, Clone, Default)]
pub struct MatchLocks {
    locks: Arc<Mutex<HashMap<MatchId, Arc<AsyncMutex<()>>>>>,
}

impl MatchLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, match_id: MatchId) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| LadderError::lock_poisoned("match lock map"))?;
            locks.entry(match_id).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }

    /// Forget the lock for a match that will not transition again
    pub fn release(&self, match_id: &MatchId) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(match_id);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_match_id;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_match_serializes() {
        let locks = MatchLocks::new();
        let match_id = generate_match_id();

        let guard = locks.acquire(match_id).await.unwrap();
        let contender = locks.clone();
        let mut waiting = tokio::spawn(async move {
            let _guard = contender.acquire(match_id).await.unwrap();
        });

        assert!(tokio::time::timeout(Duration::from_millis(20), &mut waiting)
            .await
            .is_err());
        drop(guard);
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_matches_do_not_contend() {
        let locks = MatchLocks::new();
        let _first = locks.acquire(generate_match_id()).await.unwrap();
        let _second = locks.acquire(generate_match_id()).await.unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_release_drops_entry() {
        let locks = MatchLocks::new();
        let match_id = generate_match_id();
        drop(locks.acquire(match_id).await.unwrap());

        locks.release(&match_id);
        assert!(locks.is_empty());
    }
}

//! Job execution seam

use crate::error::Result;
use crate::jobs::job::{Job, JobPayload};
use crate::roles::RoleSynchronizer;
use crate::store::RecordStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Runs a single delivery of a job
///
/// Implementations must be idempotent; the coordinator may deliver the same
/// job more than once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}

/// Sends role-sync and announcement jobs to the chat platform
pub struct PlatformJobHandler {
    synchronizer: Arc<RoleSynchronizer>,
    store: Arc<dyn RecordStore>,
}

impl PlatformJobHandler {
    pub fn new(synchronizer: Arc<RoleSynchronizer>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            synchronizer,
            store,
        }
    }
}

#[async_trait]
impl JobHandler for PlatformJobHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        match &job.payload {
            JobPayload::RoleSync { player_id, rating } => {
                // A replayed job must not roll roles back past a later
                // settlement, so sync to the stored rating when there is one
                let current = self
                    .store
                    .get_player(player_id)?
                    .map(|record| record.rating)
                    .unwrap_or(*rating);
                if current != *rating {
                    debug!(
                        "Job {} rating {} superseded by stored rating {}",
                        job.job_id, rating, current
                    );
                }
                self.synchronizer.reconcile(player_id, current).await?;
                Ok(())
            }
            JobPayload::Announcement(payload) => self.synchronizer.announce(payload).await,
        }
    }
}

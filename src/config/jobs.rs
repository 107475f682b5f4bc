//! Background job coordinator configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry and worker settings for the job coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Number of concurrent worker tasks
    pub workers: usize,
    /// Attempts before a transiently failing job is marked failed
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub base_delay_ms: u64,
    /// Upper bound on a single retry delay
    pub max_delay_ms: u64,
    /// How long an idle worker sleeps before polling again
    pub poll_interval_ms: u64,
    /// How often the queue-depth gauges are refreshed
    pub counts_refresh_ms: u64,
    /// Completed jobs kept for lookup by id; older ones are evicted
    pub completed_history: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            poll_interval_ms: 100,
            counts_refresh_ms: 1000,
            completed_history: crate::jobs::DEFAULT_COMPLETED_HISTORY,
        }
    }
}

impl JobConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn counts_refresh(&self) -> Duration {
        Duration::from_millis(self.counts_refresh_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("Job worker count must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("Job max attempts must be greater than 0"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(anyhow!("Job base delay cannot exceed max delay"));
        }
        if self.poll_interval_ms == 0 || self.counts_refresh_ms == 0 {
            return Err(anyhow!("Job polling intervals must be greater than 0"));
        }
        Ok(())
    }
}

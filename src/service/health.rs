//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the ladder-room
//! service, including readiness and liveness checks.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported as `ladder_room_health_status`
    pub fn as_gauge(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Why the component is not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

impl ComponentCheck {
    fn timed(name: &str, start: Instant, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub matches_created: u64,
    pub matches_settled: u64,
    pub matches_cancelled: u64,
    /// Players with a stored rating record
    pub players_rated: usize,
    pub live_connections: usize,
    pub dropped_events: u64,
    pub jobs_waiting: usize,
    pub jobs_delayed: usize,
    pub jobs_failed: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Check every component and gather statistics
    pub async fn check(app_state: &Arc<AppState>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(app_state).await,
            Self::check_record_store(app_state),
            Self::check_job_queue(app_state),
        ];
        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(app_state)?,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: &Arc<AppState>) -> HealthStatus {
        if app_state.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness check - the service is running and its store answers
    pub async fn readiness_check(app_state: &Arc<AppState>) -> HealthStatus {
        if !app_state.is_running().await {
            return HealthStatus::Unhealthy;
        }
        Self::check_record_store(app_state).status
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();
        if app_state.is_running().await {
            ComponentCheck::timed("service_running", start, HealthStatus::Healthy, None)
        } else {
            ComponentCheck::timed(
                "service_running",
                start,
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        }
    }

    fn check_record_store(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();
        match app_state.store().player_count() {
            Ok(_) => ComponentCheck::timed("record_store", start, HealthStatus::Healthy, None),
            Err(e) => ComponentCheck::timed(
                "record_store",
                start,
                HealthStatus::Unhealthy,
                Some(format!("Store unavailable: {}", e)),
            ),
        }
    }

    /// Failed jobs need an operator, so they degrade the service
    fn check_job_queue(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();
        match app_state.jobs().counts() {
            Ok(counts) if counts.failed == 0 => {
                ComponentCheck::timed("job_queue", start, HealthStatus::Healthy, None)
            }
            Ok(counts) => ComponentCheck::timed(
                "job_queue",
                start,
                HealthStatus::Degraded,
                Some(format!("{} failed job(s) awaiting attention", counts.failed)),
            ),
            Err(e) => ComponentCheck::timed(
                "job_queue",
                start,
                HealthStatus::Unhealthy,
                Some(format!("Job queue unavailable: {}", e)),
            ),
        }
    }

    fn gather_service_stats(app_state: &AppState) -> Result<ServiceStats> {
        let matches = app_state.machine().get_stats()?;
        let hub = app_state.hub().stats();
        let jobs = app_state.jobs().counts()?;
        debug!("Gathered stats: {:?} {:?}", matches, jobs);

        Ok(ServiceStats {
            matches_created: matches.created,
            matches_settled: matches.settled,
            matches_cancelled: matches.cancelled,
            players_rated: app_state.store().player_count()?,
            live_connections: hub.connections,
            dropped_events: hub.dropped_total,
            jobs_waiting: jobs.waiting,
            jobs_delayed: jobs.delayed,
            jobs_failed: jobs.failed,
            uptime_seconds: app_state.uptime().as_secs(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the ladder-room service using
//! a collector-owned Prometheus registry.

use crate::jobs::JobCounts;
use crate::types::{ConnectionId, EventKind, LifecycleTransition};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the ladder service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Live stream metrics
    broadcast_metrics: BroadcastMetrics,

    /// Job queue metrics
    job_metrics: JobMetrics,

    /// Match lifecycle metrics
    match_metrics: MatchMetrics,

    /// Guild role metrics
    role_metrics: RoleMetrics,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,
}

/// Live stream metrics
#[derive(Clone)]
pub struct BroadcastMetrics {
    /// Connected live clients
    pub live_connections: IntGauge,

    /// Frames waiting per connection
    pub queue_depth: IntGaugeVec,

    /// Frames evicted by drop-oldest
    pub dropped_events_total: IntCounter,

    /// Events published by kind
    pub published_events_total: IntCounterVec,
}

/// Job queue metrics
#[derive(Clone)]
pub struct JobMetrics {
    /// Jobs per state, sampled periodically
    pub jobs: IntGaugeVec,

    /// Handler outcomes by job kind
    pub job_outcomes_total: IntCounterVec,

    /// Handler run time by job kind
    pub job_duration: HistogramVec,
}

/// Match lifecycle metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Transitions taken, by transition
    pub transitions_total: IntCounterVec,

    /// Time spent settling a match, including retries
    pub settlement_duration: Histogram,

    /// Settlement commits that lost an optimistic-concurrency race
    pub commit_conflicts_total: IntCounter,

    /// Size of applied rating changes
    pub rating_change: Histogram,
}

/// Guild role metrics
#[derive(Clone)]
pub struct RoleMetrics {
    /// Role operations against the platform, by operation
    pub role_operations_total: IntCounterVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let broadcast_metrics = BroadcastMetrics::new(&registry)?;
        let job_metrics = JobMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let role_metrics = RoleMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            broadcast_metrics,
            job_metrics,
            match_metrics,
            role_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn broadcast(&self) -> &BroadcastMetrics {
        &self.broadcast_metrics
    }

    pub fn jobs(&self) -> &JobMetrics {
        &self.job_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn roles(&self) -> &RoleMetrics {
        &self.role_metrics
    }

    pub fn record_connection_opened(&self, connection: ConnectionId) {
        let label = connection.to_string();
        self.broadcast_metrics.live_connections.inc();
        self.broadcast_metrics
            .queue_depth
            .with_label_values(&[label.as_str()])
            .set(0);
    }

    pub fn record_connection_closed(&self, connection: ConnectionId) {
        let label = connection.to_string();
        self.broadcast_metrics.live_connections.dec();
        // Label may already be gone; nothing to do then
        let _ = self
            .broadcast_metrics
            .queue_depth
            .remove_label_values(&[label.as_str()]);
    }

    pub fn record_queue_depth(&self, connection: ConnectionId, depth: usize) {
        let label = connection.to_string();
        self.broadcast_metrics
            .queue_depth
            .with_label_values(&[label.as_str()])
            .set(depth as i64);
    }

    pub fn record_dropped_event(&self) {
        self.broadcast_metrics.dropped_events_total.inc();
    }

    pub fn record_published_event(&self, kind: EventKind) {
        self.broadcast_metrics
            .published_events_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    /// Overwrite the per-state job gauges with a fresh sample
    pub fn update_job_counts(&self, counts: &JobCounts) {
        for (state, count) in counts.by_state() {
            self.job_metrics
                .jobs
                .with_label_values(&[state])
                .set(count as i64);
        }
    }

    pub fn record_job_outcome(&self, kind: &str, outcome: &str, duration: Duration) {
        self.job_metrics
            .job_outcomes_total
            .with_label_values(&[kind, outcome])
            .inc();
        self.job_metrics
            .job_duration
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    pub fn record_transition(&self, transition: LifecycleTransition) {
        self.match_metrics
            .transitions_total
            .with_label_values(&[transition.as_str()])
            .inc();
    }

    pub fn record_settlement(&self, duration: Duration, changes: &[i32]) {
        self.match_metrics
            .settlement_duration
            .observe(duration.as_secs_f64());
        for change in changes {
            self.match_metrics.rating_change.observe(f64::from(*change));
        }
    }

    pub fn record_commit_conflict(&self) {
        self.match_metrics.commit_conflicts_total.inc();
    }

    pub fn record_role_operation(&self, operation: &str) {
        self.role_metrics
            .role_operations_total
            .with_label_values(&[operation])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("ladder_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "ladder_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
        })
    }
}

impl BroadcastMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let live_connections = IntGauge::new(
            "ladder_room_live_connections",
            "Connected live stream clients",
        )?;
        registry.register(Box::new(live_connections.clone()))?;

        let queue_depth = IntGaugeVec::new(
            Opts::new(
                "ladder_room_connection_queue_depth",
                "Frames waiting in a live connection's queue",
            ),
            &["connection"],
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let dropped_events_total = IntCounter::new(
            "ladder_room_dropped_events_total",
            "Frames evicted from full connection queues",
        )?;
        registry.register(Box::new(dropped_events_total.clone()))?;

        let published_events_total = IntCounterVec::new(
            Opts::new(
                "ladder_room_published_events_total",
                "Events published to the hub",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(published_events_total.clone()))?;

        Ok(Self {
            live_connections,
            queue_depth,
            dropped_events_total,
            published_events_total,
        })
    }
}

impl JobMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let jobs = IntGaugeVec::new(
            Opts::new("ladder_room_jobs", "Jobs in the queue by state"),
            &["state"],
        )?;
        registry.register(Box::new(jobs.clone()))?;

        let job_outcomes_total = IntCounterVec::new(
            Opts::new("ladder_room_job_outcomes_total", "Job handler outcomes"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(job_outcomes_total.clone()))?;

        let job_duration = HistogramVec::new(
            HistogramOpts::new(
                "ladder_room_job_duration_seconds",
                "Time spent in job handlers",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["kind"],
        )?;
        registry.register(Box::new(job_duration.clone()))?;

        Ok(Self {
            jobs,
            job_outcomes_total,
            job_duration,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let transitions_total = IntCounterVec::new(
            Opts::new(
                "ladder_room_match_transitions_total",
                "Match lifecycle transitions",
            ),
            &["transition"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let settlement_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ladder_room_settlement_duration_seconds",
                "Time to settle a match",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(settlement_duration.clone()))?;

        let commit_conflicts_total = IntCounter::new(
            "ladder_room_commit_conflicts_total",
            "Settlement commits retried after a concurrent write",
        )?;
        registry.register(Box::new(commit_conflicts_total.clone()))?;

        let rating_change = Histogram::with_opts(
            HistogramOpts::new("ladder_room_rating_change", "Applied rating changes").buckets(
                vec![-64.0, -40.0, -20.0, -10.0, -1.0, 1.0, 10.0, 20.0, 40.0, 64.0],
            ),
        )?;
        registry.register(Box::new(rating_change.clone()))?;

        Ok(Self {
            transitions_total,
            settlement_duration,
            commit_conflicts_total,
            rating_change,
        })
    }
}

impl RoleMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let role_operations_total = IntCounterVec::new(
            Opts::new(
                "ladder_room_role_operations_total",
                "Role operations against the guild platform",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(role_operations_total.clone()))?;

        Ok(Self {
            role_operations_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collectors_register_once_per_registry() {
        let collector = MetricsCollector::new().unwrap();
        // A second collector gets its own registry, so names never clash
        let other = MetricsCollector::new().unwrap();
        collector.record_dropped_event();

        assert_eq!(collector.broadcast().dropped_events_total.get(), 1);
        assert_eq!(other.broadcast().dropped_events_total.get(), 0);
    }

    #[test]
    fn test_connection_gauges() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_connection_opened(7);
        collector.record_queue_depth(7, 12);

        assert_eq!(collector.broadcast().live_connections.get(), 1);
        assert_eq!(
            collector
                .broadcast()
                .queue_depth
                .with_label_values(&["7"])
                .get(),
            12
        );

        collector.record_connection_closed(7);
        assert_eq!(collector.broadcast().live_connections.get(), 0);
    }

    #[test]
    fn test_job_count_gauges() {
        let collector = MetricsCollector::new().unwrap();
        let counts = JobCounts {
            waiting: 3,
            failed: 1,
            ..JobCounts::default()
        };
        collector.update_job_counts(&counts);

        assert_eq!(collector.jobs().jobs.with_label_values(&["waiting"]).get(), 3);
        assert_eq!(collector.jobs().jobs.with_label_values(&["failed"]).get(), 1);
        assert_eq!(collector.jobs().jobs.with_label_values(&["active"]).get(), 0);
    }

    #[test]
    fn test_timer_measures_elapsed() {
        let collector = MetricsCollector::new().unwrap();
        let timer = collector.start_timer();
        assert!(timer.stop() >= Duration::ZERO);
    }
}

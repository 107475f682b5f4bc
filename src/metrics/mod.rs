//! Metrics and monitoring for the ladder-room service
//!
//! This module provides metrics collection and the HTTP surface for health
//! health checks, Prometheus scraping, the operator failure list and the live stream.

pub mod collector;
pub mod health;

pub use collector::{
    BroadcastMetrics, JobMetrics, MatchMetrics, MetricsCollector, RoleMetrics, ServiceMetrics,
};
pub use health::{HealthServer, HealthServerConfig};

//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the store, rating
//! engine, state machine, job coordinator, role synchronizer and broadcast
//! hub together and owns their background tasks.

use crate::broadcast::BroadcastHub;
use crate::config::AppConfig;
use crate::jobs::{JobCoordinator, JobHandler, PlatformJobHandler};
use crate::lifecycle::MatchStateMachine;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::rating::{BracketTable, RatingEngine};
use crate::roles::{GuildPlatform, InMemoryGuildPlatform, RoleSynchronizer};
use crate::service::health::HealthCheck;
use crate::store::{InMemoryRecordStore, RecordStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    metrics: Arc<MetricsCollector>,
    store: Arc<dyn RecordStore>,
    hub: BroadcastHub,
    jobs: JobCoordinator,
    machine: MatchStateMachine,
    job_handler: Arc<dyn JobHandler>,

    /// HTTP server, present while running
    http_server: Mutex<Option<Arc<HealthServer>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    is_running: RwLock<bool>,
    started_at: Instant,
}

impl AppState {
    /// Build every component with an in-memory guild
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        let platform = Arc::new(InMemoryGuildPlatform::auto_enrolling(Vec::new()));
        Self::with_platform(config, platform).await
    }

    /// Build every component around the given chat platform
    pub async fn with_platform(
        config: AppConfig,
        platform: Arc<dyn GuildPlatform>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing {} service", config.service.name);

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let brackets = Arc::new(BracketTable::from_settings(&config.ranks).map_err(|e| {
            ServiceError::Configuration {
                message: format!("Invalid bracket table: {}", e),
            }
        })?);
        info!(
            "Bracket table: {}",
            brackets
                .brackets()
                .iter()
                .map(|b| format!("{}@{}", b.name, b.min_elo))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let engine = Arc::new(
            RatingEngine::new(config.rating.clone(), brackets.clone()).map_err(|e| {
                ServiceError::Configuration {
                    message: format!("Invalid rating config: {}", e),
                }
            })?,
        );

        let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::with_job_history(
            config.jobs.completed_history,
        ));
        let hub = BroadcastHub::new(config.broadcast.queue_capacity, metrics.clone());
        let jobs = JobCoordinator::new(config.jobs.clone(), store.clone(), metrics.clone());

        let synchronizer = Arc::new(RoleSynchronizer::new(
            platform,
            brackets,
            config.platform.clone(),
            metrics.clone(),
        ));
        let job_handler: Arc<dyn JobHandler> =
            Arc::new(PlatformJobHandler::new(synchronizer, store.clone()));

        let machine = MatchStateMachine::new(
            store.clone(),
            engine,
            hub.clone(),
            config.matches.clone(),
            metrics.clone(),
        );

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            metrics,
            store,
            hub,
            jobs,
            machine,
            job_handler,
            http_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            is_running: RwLock::new(false),
            started_at: Instant::now(),
        })
    }

    /// Start the job workers, the HTTP server and maintenance tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting {} service", self.config.service.name);

        if *self.shutdown_tx.borrow() {
            return Err(ServiceError::Initialization {
                message: "Service was already shut down".to_string(),
            });
        }
        self.mark_running(true).await;

        let mut tasks = self.background_tasks.lock().await;

        tasks.extend(
            self.jobs
                .start(self.job_handler.clone(), self.shutdown_tx.subscribe()),
        );

        let server = Arc::new(
            HealthServer::new(
                HealthServerConfig {
                    port: self.config.service.http_port,
                    host: self.config.service.http_host.clone(),
                },
                self.metrics.clone(),
            )
            .with_app_state(self.clone()),
        );
        *self.http_server.lock().await = Some(server.clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("HTTP server failed: {}", e);
            }
        }));

        tasks.push(self.spawn_health_metrics_task());

        info!(
            "{} service started with {} background task(s)",
            self.config.service.name,
            tasks.len()
        );
        Ok(())
    }

    /// Refresh uptime and health gauges until shutdown
    fn spawn_health_metrics_task(self: &Arc<Self>) -> JoinHandle<()> {
        let state = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(15));
            debug!("Health metrics task started");
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        state.metrics.update_uptime(state.uptime());
                        match HealthCheck::check(&state).await {
                            Ok(health) => state.metrics.update_health_status(health.status.as_gauge()),
                            Err(e) => warn!("Health check failed: {}", e),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Health metrics task stopped");
        })
    }

    /// Stop accepting work, close live streams and return in-flight jobs to
    /// the queue
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        self.mark_running(false).await;
        self.shutdown_tx.send_replace(true);

        if let Some(server) = self.http_server.lock().await.take() {
            server.stop();
        }
        self.hub.close_all();

        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let task_count = tasks.len();
        let deadline = self.config.shutdown_timeout();

        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(deadline, task).await.is_err() {
                warn!("Background task did not stop within {:?}, aborting", deadline);
                abort.abort();
            }
        }
        debug!("{} background task(s) stopped", task_count);

        self.jobs
            .shutdown()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to requeue in-flight jobs: {}", e),
            })?;

        match self.machine.get_stats() {
            Ok(stats) => info!("Final match statistics: {:?}", stats),
            Err(e) => warn!("Failed to read final statistics: {}", e),
        }
        info!("{} shutdown completed", self.config.service.name);
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn mark_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn jobs(&self) -> &JobCoordinator {
        &self.jobs
    }

    pub fn machine(&self) -> &MatchStateMachine {
        &self.machine
    }
}

//! Main application configuration
//!
//! This module defines the primary configuration structures for the ladder-room
//! service, including environment variable and TOML file loading and validation.

use crate::config::jobs::JobConfig;
use crate::config::rating::{RankSettings, RatingConfig};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub rating: RatingConfig,
    pub ranks: RankSettings,
    pub matches: MatchSettings,
    pub jobs: JobConfig,
    pub broadcast: BroadcastSettings,
    pub platform: PlatformSettings,
}

/// Service-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Bind host for the HTTP server
    pub http_host: String,
    /// Port for health, metrics and the live event stream
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Match lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    /// Exact roster size a match must be created with
    pub players_per_match: usize,
    /// Settlement retries after an optimistic-concurrency conflict
    pub max_commit_attempts: u32,
}

/// Live event hub settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastSettings {
    /// Events buffered per connection before the oldest are dropped
    pub queue_capacity: usize,
}

/// Community-chat platform settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    /// Guild the rank roles live in
    pub guild_id: String,
    /// Channel that receives settlement announcements
    pub results_channel_id: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "ladder-room".to_string(),
            log_level: "info".to_string(),
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            players_per_match: 10,
            max_commit_attempts: 5,
        }
    }
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            guild_id: "guild-main".to_string(),
            results_channel_id: "channel-match-results".to_string(),
        }
    }
}

/// Read and parse an environment variable if it is set
fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file; environment variables still override it
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(host) = env::var("HTTP_HOST") {
            self.service.http_host = host;
        }
        if let Some(port) = env_parse("HTTP_PORT")? {
            self.service.http_port = port;
        }
        if let Some(timeout) = env_parse("SHUTDOWN_TIMEOUT_SECONDS")? {
            self.service.shutdown_timeout_seconds = timeout;
        }

        // Rating settings
        if let Some(seed) = env_parse("SEED_RATING")? {
            self.rating.seed_rating = seed;
        }
        if let Some(count) = env_parse("CALIBRATION_MATCHES")? {
            self.rating.calibration_matches = count;
        }
        if let Some(k) = env_parse("K_FACTOR")? {
            self.rating.k_factor = k;
        }
        if let Some(multiplier) = env_parse("CALIBRATION_MULTIPLIER")? {
            self.rating.calibration_multiplier = multiplier;
        }
        if let Some(max_delta) = env_parse("MAX_RATING_DELTA")? {
            self.rating.max_delta = max_delta;
        }

        // Rank settings
        if let Ok(preset) = env::var("RANK_PRESET") {
            self.ranks.preset = preset.parse()?;
        }
        if let Ok(role) = env::var("UNRANKED_ROLE_ID") {
            self.ranks.unranked_role_id = role;
        }

        // Match settings
        if let Some(players) = env_parse("PLAYERS_PER_MATCH")? {
            self.matches.players_per_match = players;
        }
        if let Some(attempts) = env_parse("MAX_COMMIT_ATTEMPTS")? {
            self.matches.max_commit_attempts = attempts;
        }

        // Job settings
        if let Some(workers) = env_parse("JOB_WORKERS")? {
            self.jobs.workers = workers;
        }
        if let Some(attempts) = env_parse("JOB_MAX_ATTEMPTS")? {
            self.jobs.max_attempts = attempts;
        }
        if let Some(delay) = env_parse("JOB_BASE_DELAY_MS")? {
            self.jobs.base_delay_ms = delay;
        }
        if let Some(delay) = env_parse("JOB_MAX_DELAY_MS")? {
            self.jobs.max_delay_ms = delay;
        }
        if let Some(history) = env_parse("JOB_COMPLETED_HISTORY")? {
            self.jobs.completed_history = history;
        }

        // Broadcast settings
        if let Some(capacity) = env_parse("BROADCAST_QUEUE_CAPACITY")? {
            self.broadcast.queue_capacity = capacity;
        }

        // Platform settings
        if let Ok(guild) = env::var("GUILD_ID") {
            self.platform.guild_id = guild;
        }
        if let Ok(channel) = env::var("RESULTS_CHANNEL_ID") {
            self.platform.results_channel_id = channel;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }

    config.rating.validate()?;
    config.jobs.validate()?;

    if config.ranks.unranked_role_id.is_empty() {
        return Err(anyhow!("Unranked role id cannot be empty"));
    }

    // Two non-empty teams need at least two players
    if config.matches.players_per_match < 2 {
        return Err(anyhow!("Players per match must be at least 2"));
    }
    if config.matches.max_commit_attempts == 0 {
        return Err(anyhow!("Max commit attempts must be greater than 0"));
    }

    if config.broadcast.queue_capacity == 0 {
        return Err(anyhow!("Broadcast queue capacity must be greater than 0"));
    }

    if config.platform.guild_id.is_empty() {
        return Err(anyhow!("Guild id cannot be empty"));
    }

    Ok(())
}

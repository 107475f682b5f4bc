//! Configuration management for the ladder-room service
//!
//! This module handles all configuration loading from environment variables
//! or a TOML file, validation, and default values for the ladder service.

pub mod app;
pub mod jobs;
pub mod rating;

// Re-export commonly used types
pub use app::{
    validate_config, AppConfig, BroadcastSettings, MatchSettings, PlatformSettings,
    ServiceSettings,
};
pub use jobs::JobConfig;
pub use rating::{BracketSpec, RankPreset, RankSettings, RatingConfig};

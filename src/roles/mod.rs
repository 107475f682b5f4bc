//! External-platform role reconciliation and result announcements

pub mod platform;
pub mod synchronizer;

pub use platform::{GuildPlatform, InMemoryGuildPlatform, PlatformError, PlatformResult};
pub use synchronizer::{RoleSyncOutcome, RoleSynchronizer};

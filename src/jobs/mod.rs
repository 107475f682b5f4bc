//! Durable background jobs for side-effecting work
//!
//! Settlement commits role-sync and announcement jobs together with the
//! ratings that caused them; workers hand them to a [`JobHandler`] with
//! at-least-once delivery, exponential backoff on transient failure, and a
//! terminal failure list for operators.

pub mod coordinator;
pub mod handler;
pub mod job;
pub mod queue;

pub use coordinator::JobCoordinator;
pub use handler::{JobHandler, PlatformJobHandler};
pub use job::{AnnouncementPayload, Job, JobCounts, JobPayload, JobState};
pub use queue::{JobTable, DEFAULT_COMPLETED_HISTORY};

//! Match lifecycle
//!
//! Drives matches through `FORMING -> TEAMS_ASSIGNED -> IN_PROGRESS ->
//! SETTLED`, with `CANCELLED` reachable from any live state. Settlement
//! applies ratings and the match transition in one store transaction, then
//! fans out rating deltas to the broadcast hub and side effects to the job
//! coordinator.

pub mod locks;
pub mod machine;
pub mod validation;

pub use locks::MatchLocks;
pub use machine::{MatchMachineStats, MatchStateMachine, Settlement};

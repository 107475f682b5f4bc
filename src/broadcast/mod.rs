//! Live event fan-out for connected clients
//!
//! Every connection owns a bounded queue. Publishing never waits on a
//! connection: when a queue is full its oldest frame is evicted and the
//! connection's drop counter goes up. Clients that miss frames re-fetch
//! current state out of band.

pub mod frame;
pub mod hub;
pub mod ws;

pub use frame::{EventFrame, SubscriptionFilter};
pub use hub::{BroadcastHub, HubStats, PublishOutcome, Subscription};

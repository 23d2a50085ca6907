//! Snapshot fan-out to streaming sessions
//!
//! The [`Broadcaster`] holds one bounded delivery channel per subscriber per
//! entity kind. Publishing never waits on a subscriber: a full channel gets
//! one chance to grow before the delivery is dropped.
//!
//! ## Adaptive buffering
//! - Every channel starts at the current shared capacity
//! - A blocked delivery doubles the shared capacity (capped at the maximum)
//!   and moves only that subscriber onto a channel of the new size
//! - Capacity never shrinks within a process lifetime

mod registry;
mod subscription;

pub use registry::{Broadcaster, BufferPolicy, PublishReport};
pub use subscription::Subscription;

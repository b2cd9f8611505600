//! RelayMQ subscriber module.
//!
//! Provides the `Subscriber` delivery seam and the `SubscriptionId` used to
//! tag each consume loop in logs.

#[allow(clippy::module_inception)]
pub mod subscriber;

pub use subscriber::{Subscriber, SubscriptionId};

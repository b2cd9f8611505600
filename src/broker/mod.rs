//! # Broker Module
//!
//! The network-facing half of RelayMQ.
//!
//! - `facade`: the [`Broker`] handle composing registry, durable log, expiry
//!   and delivery engines behind declare / publish / consume.
//! - `engine`: the TCP server that decodes calls and dispatches them to the facade.
//! - `client`: the RPC client used by producers, consumers and by the broker
//!   itself when pushing to a consumer callback.
//! - `callback`: the consumer-side endpoint receiving `Deliver` calls.

pub mod callback;
pub mod client;
pub mod engine;
pub mod facade;

pub use self::callback::{CallbackServer, DeliveryHandler};
pub use self::client::RpcClient;
pub use self::engine::serve;
pub use self::facade::Broker;

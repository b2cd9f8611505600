//! RelayMQ – a small queue broker that pushes each message to one consumer callback.
//!
//! This crate exports
//!  * `core`    – queues, registry, durable logs, expiry and the delivery engine
//!  * `broker`  – the RPC facade, the TCP server and the client side of the protocol
//!  * `config`  – TOML-driven runtime configuration
//!  * `metrics` – process-wide counters
//!
//! Downstream applications can embed the broker (`start_broker`) or drive a
//! running one through `broker::client`.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod broker;
pub mod config;
pub mod core;
pub mod logging;
pub mod metrics;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use broker::engine::serve as start_broker;
pub use broker::Broker;
pub use config::{load_config, Config};
pub use core::error::BrokerError;

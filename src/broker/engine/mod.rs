//! Server engine module for the RelayMQ broker.
//!
//! Exposes `serve`, which recovers durable queues, binds the TCP listener and
//! dispatches client calls to the [`Broker`](crate::broker::Broker) facade.

pub mod server;

pub use server::{run, serve};

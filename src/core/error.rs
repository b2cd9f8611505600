use thiserror::Error;

/// Errors surfaced by the queue engine and the RPC layer.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The operation named a queue that was never declared (or was deleted).
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// Dial, accept or call failure on a network connection.
    #[error("transport failure: {0}")]
    Transport(#[source] std::io::Error),

    /// Durable log I/O failed on append, commit or replay.
    #[error("persistence failure: {0}")]
    Persistence(#[source] std::io::Error),

    /// The consumer callback answered with an error.
    #[error("delivery rejected: {0}")]
    DeliveryRejected(String),

    /// Malformed or oversized frame, or an unexpected reply.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<prost::DecodeError> for BrokerError {
    fn from(e: prost::DecodeError) -> Self {
        BrokerError::Protocol(e.to_string())
    }
}

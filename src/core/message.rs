use std::sync::atomic::{AtomicU64, Ordering};

/// A queued payload tagged with its broker-wide sequence number.
///
/// The sequence number identifies the message to its expiry timer; it is not
/// persisted and a recovered message gets a fresh one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub seq: u64,
    pub payload: String,
}

impl Message {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            seq: next_seq(),
            payload: payload.into(),
        }
    }
}

/// Generates a monotonically increasing u64 sequence (fast, lock-free).
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);
fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

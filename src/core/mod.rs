pub mod delivery;
pub mod error;
pub mod expiry;
pub mod message;
pub mod protocol;
pub mod queue;
pub mod recovery;
pub mod subscriber;
pub mod wal;

//! Per-message time-to-live for in-flight deliveries.
//!
//! When a message first goes out to a consumer the reaper arms one timer for
//! it. The timer and the delivery outcome race on the message's
//! [`PendingDelivery`] state; whichever resolves it first wins and the loser
//! becomes a no-op. Timers are tied to one message, so an acknowledgment can
//! only ever cancel its own timer.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::core::message::Message;
use crate::core::queue::Queue;
use crate::core::wal::DurabilityLog;
use crate::metrics;

const LIVE: u8 = 0;
const ACKED: u8 = 1;
const EXPIRED: u8 = 2;

/// A dequeued message whose fate (acknowledged or expired) is not settled yet.
#[derive(Debug)]
pub struct PendingDelivery {
    message: Message,
    state: AtomicU8,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl PendingDelivery {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn seq(&self) -> u64 {
        self.message.seq
    }

    /// Settles the message as delivered and cancels its timer.
    /// Returns `false` if the timer already expired it.
    pub fn acknowledge(&self) -> bool {
        let won = self
            .state
            .compare_exchange(LIVE, ACKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Ok(mut slot) = self.cancel.lock() {
                if let Some(cancel) = slot.take() {
                    let _ = cancel.send(());
                }
            }
        }
        won
    }

    fn expire(&self) -> bool {
        self.state
            .compare_exchange(LIVE, EXPIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_expired(&self) -> bool {
        self.state.load(Ordering::Acquire) == EXPIRED
    }
}

/// Arms TTL timers and discards messages whose timer wins the race.
#[derive(Debug, Clone)]
pub struct ExpiryReaper {
    ttl: Duration,
    log: Arc<DurabilityLog>,
}

impl ExpiryReaper {
    pub fn new(ttl: Duration, log: Arc<DurabilityLog>) -> Self {
        Self { ttl, log }
    }

    /// Starts the timer for `message`, which has just left `queue` for delivery.
    pub fn arm(&self, queue: &Arc<Queue>, message: Message) -> Arc<PendingDelivery> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let pending = Arc::new(PendingDelivery {
            message,
            state: AtomicU8::new(LIVE),
            cancel: Mutex::new(Some(cancel_tx)),
        });

        let watched = Arc::clone(&pending);
        let log = Arc::clone(&self.log);
        let ttl = self.ttl;
        let queue = Arc::clone(queue);

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(ttl) => {
                    if !watched.expire() {
                        return;
                    }
                    metrics::inc_expired(1);
                    debug!(queue = queue.name(), seq = watched.seq(), "message expired before acknowledgment");
                    if queue.is_durable() {
                        if let Err(e) = log.commit_live(&queue).await {
                            metrics::inc_persistence_failures(1);
                            error!(queue = queue.name(), "failed to drop expired entry from durable log: {e}");
                        }
                    }
                }
                _ = cancel_rx => {}
            }
        });

        pending
    }
}

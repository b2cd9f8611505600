//! Per-subscription consume loop.
//!
//! ```text
//!   READY ──take held / dequeue──► AWAITING_ACK ──ok──► commit ──► READY
//!                                       │
//!                                       └──error──► hold in token ──► STOPPED
//! ```
//!
//! The engine owns its queue's [`DeliveryToken`](crate::core::queue::DeliveryToken)
//! lease for the whole of a delivery, so at most one message per queue is in
//! flight no matter how many engines were started for it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::error::BrokerError;
use crate::core::expiry::ExpiryReaper;
use crate::core::queue::{DeliveryToken, Queue};
use crate::core::subscriber::{Subscriber, SubscriptionId};
use crate::core::wal::DurabilityLog;
use crate::metrics;

/// Why a delivery engine stopped.
#[derive(Debug)]
pub enum EngineExit {
    /// The consumer failed a delivery; the message is held for the next subscription.
    Rejected(BrokerError),
    /// A newer `consume` on the same queue took over.
    Replaced,
    /// The queue was deleted.
    QueueDeleted,
}

pub struct DeliveryEngine<S> {
    id: SubscriptionId,
    queue: Arc<Queue>,
    subscriber: S,
    reaper: ExpiryReaper,
    log: Arc<DurabilityLog>,
    generation: u64,
}

impl<S: Subscriber + 'static> DeliveryEngine<S> {
    /// Registers a new subscription on `queue`, superseding any previous one.
    pub fn new(
        queue: Arc<Queue>,
        subscriber: S,
        reaper: ExpiryReaper,
        log: Arc<DurabilityLog>,
    ) -> Self {
        let generation = queue.next_generation();
        Self {
            id: SubscriptionId::new(),
            queue,
            subscriber,
            reaper,
            log,
            generation,
        }
    }

    pub fn spawn(self) -> JoinHandle<EngineExit> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> EngineExit {
        info!(queue = self.queue.name(), subscription = %self.id, "subscription started");
        let exit = loop {
            if let Err(exit) = self.deliver_next().await {
                break exit;
            }
        };
        match &exit {
            EngineExit::Rejected(e) => {
                warn!(queue = self.queue.name(), subscription = %self.id, "subscription stopped: {e}")
            }
            other => {
                info!(queue = self.queue.name(), subscription = %self.id, "subscription ended: {other:?}")
            }
        }
        exit
    }

    async fn deliver_next(&mut self) -> Result<(), EngineExit> {
        let queue = Arc::clone(&self.queue);

        let mut token = tokio::select! {
            biased;
            _ = queue.closed() => return Err(EngineExit::QueueDeleted),
            _ = queue.superseded(self.generation) => return Err(EngineExit::Replaced),
            token = queue.token().lock() => token,
        };
        if !queue.is_current(self.generation) {
            return Err(EngineExit::Replaced);
        }

        // A held message goes first unless its timer already discarded it.
        let pending = match token.take().filter(|held| !held.is_expired()) {
            Some(held) => {
                metrics::inc_redelivered(1);
                debug!(queue = queue.name(), seq = held.seq(), "redelivering held message");
                held
            }
            None => {
                let message = tokio::select! {
                    biased;
                    _ = queue.closed() => return Err(EngineExit::QueueDeleted),
                    _ = queue.superseded(self.generation) => return Err(EngineExit::Replaced),
                    message = queue.dequeue() => message.map_err(|_| EngineExit::QueueDeleted)?,
                };
                self.reaper.arm(&queue, message)
            }
        };

        let outcome = self
            .subscriber
            .deliver(queue.name(), &pending.message().payload)
            .await;

        match outcome {
            Ok(()) => {
                if !pending.acknowledge() {
                    debug!(queue = queue.name(), seq = pending.seq(), "ack arrived after expiry; ignored");
                    return Ok(());
                }
                metrics::inc_delivered(1);
                if queue.is_durable() {
                    if let Err(e) = self.log.commit_live(&queue).await {
                        metrics::inc_persistence_failures(1);
                        error!(queue = queue.name(), "durable commit failed, log now lags: {e}");
                    }
                }
                Ok(())
            }
            Err(e) => {
                metrics::inc_rejected(1);
                if !pending.is_expired() {
                    *token = DeliveryToken::Rejected(pending);
                }
                Err(EngineExit::Rejected(e))
            }
        }
    }
}

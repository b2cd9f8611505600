//! RelayMQ queue module.
//!
//! A [`Queue`] is a named, bounded FIFO buffer plus the per-queue delivery
//! state: the [`DeliveryToken`] lease held by the active delivery engine and
//! the subscription generation used to retire replaced engines.
//!
//! Lock discipline:
//! - the registry map guards structural changes only (declare/delete/list);
//! - the buffer is a bounded `flume` channel, so enqueue/dequeue need no lock;
//! - `publish_lock` orders durable appends with their enqueue;
//! - `log_gate` ties durable log writes to this queue's lifetime: appends and
//!   commits check `closed` under it, deletion closes and removes the unit under it;
//! - `token` is held by one engine for the whole of a delivery.

pub mod registry;

pub use registry::{Declared, QueueRegistry};

use std::fmt;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::core::error::BrokerError;
use crate::core::expiry::PendingDelivery;
use crate::core::message::Message;

/// Per-queue single slot: clear to dequeue, or holding a rejected message
/// that must be redelivered before anything behind it.
#[derive(Debug, Default)]
pub enum DeliveryToken {
    #[default]
    Ready,
    Rejected(Arc<PendingDelivery>),
}

impl DeliveryToken {
    /// Takes the held message, leaving the token `Ready`.
    pub fn take(&mut self) -> Option<Arc<PendingDelivery>> {
        match std::mem::take(self) {
            DeliveryToken::Ready => None,
            DeliveryToken::Rejected(pending) => Some(pending),
        }
    }
}

pub struct Queue {
    name: String,
    durable: bool,
    sender: flume::Sender<Message>,
    receiver: flume::Receiver<Message>,
    publish_lock: Mutex<()>,
    log_gate: Mutex<()>,
    token: Mutex<DeliveryToken>,
    closed: watch::Sender<bool>,
    generation: watch::Sender<u64>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("durable", &self.durable)
            .field("depth", &self.len())
            .finish()
    }
}

impl Queue {
    pub fn new(name: impl Into<String>, durable: bool, capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity.max(1));
        let (closed, _) = watch::channel(false);
        let (generation, _) = watch::channel(0);
        Self {
            name: name.into(),
            durable,
            sender,
            receiver,
            publish_lock: Mutex::new(()),
            log_gate: Mutex::new(()),
            token: Mutex::new(DeliveryToken::Ready),
            closed,
            generation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Number of buffered messages (excludes the one in flight).
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn publish_lock(&self) -> &Mutex<()> {
        &self.publish_lock
    }

    pub(crate) fn log_gate(&self) -> &Mutex<()> {
        &self.log_gate
    }

    pub(crate) fn token(&self) -> &Mutex<DeliveryToken> {
        &self.token
    }

    /// Appends to the buffer, waiting while it is full.
    pub async fn enqueue(&self, message: Message) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::UnknownQueue(self.name.clone()));
        }
        tokio::select! {
            biased;
            _ = self.closed() => Err(BrokerError::UnknownQueue(self.name.clone())),
            sent = self.sender.send_async(message) => {
                sent.map_err(|_| BrokerError::UnknownQueue(self.name.clone()))
            }
        }
    }

    /// Removes the oldest buffered message, waiting while the buffer is empty.
    pub async fn dequeue(&self) -> Result<Message, BrokerError> {
        tokio::select! {
            biased;
            _ = self.closed() => Err(BrokerError::UnknownQueue(self.name.clone())),
            received = self.receiver.recv_async() => {
                received.map_err(|_| BrokerError::UnknownQueue(self.name.clone()))
            }
        }
    }

    /// Marks the queue deleted, wakes every waiter and drops buffered messages.
    pub(crate) fn close(&self) -> usize {
        self.closed.send_replace(true);
        self.receiver.drain().count()
    }

    /// Resolves once the queue has been deleted.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        loop {
            let closed = *rx.borrow_and_update();
            if closed || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Starts a new subscription generation, retiring the previous engine.
    pub(crate) fn next_generation(&self) -> u64 {
        let mut current = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            current = *g;
        });
        current
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        *self.generation.borrow() == generation
    }

    /// Resolves once a newer subscription has replaced `generation`.
    pub(crate) async fn superseded(&self, generation: u64) {
        let mut rx = self.generation.subscribe();
        loop {
            let latest = *rx.borrow_and_update();
            if latest != generation || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

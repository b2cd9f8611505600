use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::error::BrokerError;
use crate::core::message::Message;
use crate::core::queue::Queue;

/// Outcome of [`QueueRegistry::declare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declared {
    Created,
    AlreadyExists,
}

/// [`QueueRegistry`] owns every declared queue, keyed by name.
///
/// Uses DashMap internally; no map guard is ever held across an await, callers
/// get an `Arc<Queue>` and block on the queue itself.
#[derive(Debug)]
pub struct QueueRegistry {
    queues: DashMap<String, Arc<Queue>>,
    capacity: usize,
}

impl QueueRegistry {
    /// Creates an empty registry whose queues buffer up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity,
        }
    }

    /// Creates the queue on first call. Later calls are no-ops whatever
    /// `durable` says: the first declaration fixes durability.
    pub fn declare(&self, name: &str, durable: bool) -> Declared {
        self.declare_with_capacity(name, durable, self.capacity)
    }

    /// Same as [`declare`](Self::declare) with an explicit buffer size; recovery
    /// uses this so replaying a long log never blocks.
    pub fn declare_with_capacity(&self, name: &str, durable: bool, capacity: usize) -> Declared {
        match self.queues.entry(name.to_string()) {
            Entry::Occupied(_) => Declared::AlreadyExists,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Queue::new(name, durable, capacity)));
                info!(queue = name, durable, "queue declared");
                Declared::Created
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Queue>, BrokerError> {
        self.queues
            .get(name)
            .map(|entry| Arc::clone(&*entry))
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Appends to the named queue, waiting while its buffer is full.
    pub async fn enqueue(&self, name: &str, message: Message) -> Result<(), BrokerError> {
        let queue = self.get(name)?;
        queue.enqueue(message).await
    }

    /// Removes the oldest message of the named queue, waiting while it is empty.
    pub async fn dequeue(&self, name: &str) -> Result<Message, BrokerError> {
        let queue = self.get(name)?;
        queue.dequeue().await
    }

    /// Removes the queue and drops its buffered messages. Deliveries already
    /// in flight finish on their own.
    pub fn delete(&self, name: &str) -> Option<Arc<Queue>> {
        let (_, queue) = self.queues.remove(name)?;
        let dropped = queue.close();
        debug!(queue = name, dropped, "queue deleted");
        Some(queue)
    }

    /// Snapshot of queue names, order unspecified.
    pub fn list(&self) -> Vec<String> {
        self.queues.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Buffered message count of the named queue.
    pub fn depth(&self, name: &str) -> Option<usize> {
        self.queues.get(name).map(|entry| entry.len())
    }
}

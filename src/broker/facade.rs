use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::broker::client::RpcClient;
use crate::config::Config;
use crate::core::delivery::{DeliveryEngine, EngineExit};
use crate::core::error::BrokerError;
use crate::core::expiry::ExpiryReaper;
use crate::core::message::Message;
use crate::core::queue::{Declared, QueueRegistry};
use crate::core::recovery::{self, RecoveryReport};
use crate::core::subscriber::Subscriber;
use crate::core::wal::DurabilityLog;
use crate::metrics;

/// The broker's operation surface: declare, publish, consume, plus the admin
/// calls. Cheap to clone; every clone shares the same registry and log.
#[derive(Debug, Clone)]
pub struct Broker {
    registry: Arc<QueueRegistry>,
    log: Arc<DurabilityLog>,
    reaper: ExpiryReaper,
    max_frame_bytes: usize,
}

impl Broker {
    /// Opens the durable log and replays whatever a previous run left behind.
    pub async fn open(config: &Config) -> Result<(Self, RecoveryReport), BrokerError> {
        let log = Arc::new(DurabilityLog::open(&config.wal).await?);
        let registry = Arc::new(QueueRegistry::new(config.queues.capacity));
        let report = recovery::recover(&registry, &log, config.queues.capacity).await?;

        let broker = Self {
            reaper: ExpiryReaper::new(config.queues.message_ttl(), Arc::clone(&log)),
            registry,
            log,
            max_frame_bytes: config.server.max_frame_bytes,
        };
        Ok((broker, report))
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    pub fn log(&self) -> &DurabilityLog {
        &self.log
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Idempotent; the first declaration fixes durability.
    pub fn declare_queue(&self, name: &str, durable: bool) -> Declared {
        self.registry.declare(name, durable)
    }

    /// Appends to the durable log (if any) and enqueues. A log failure fails
    /// the publish and nothing is enqueued.
    pub async fn publish(&self, queue: &str, payload: String) -> Result<(), BrokerError> {
        let target = self.registry.get(queue)?;

        if target.is_durable() {
            // Log order must equal buffer order across concurrent publishers.
            let _ordered = target.publish_lock().lock().await;
            match self.log.append_live(&target, &payload).await {
                Ok(()) => {}
                Err(e @ BrokerError::Persistence(_)) => {
                    metrics::inc_persistence_failures(1);
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
            target.enqueue(Message::new(payload)).await?;
        } else {
            target.enqueue(Message::new(payload)).await?;
        }

        metrics::inc_published(1);
        debug!(queue, "message published");
        Ok(())
    }

    /// Starts a delivery engine pushing `queue` to `subscriber`, replacing any
    /// engine already running for it.
    pub fn consume<S>(&self, queue: &str, subscriber: S) -> Result<JoinHandle<EngineExit>, BrokerError>
    where
        S: Subscriber + 'static,
    {
        let target = self.registry.get(queue)?;
        let engine = DeliveryEngine::new(
            target,
            subscriber,
            self.reaper.clone(),
            Arc::clone(&self.log),
        );
        Ok(engine.spawn())
    }

    /// Dials the consumer's callback endpoint and subscribes it to `queue`.
    pub async fn consume_remote(
        &self,
        queue: &str,
        callback_addr: &str,
    ) -> Result<JoinHandle<EngineExit>, BrokerError> {
        if !self.registry.contains(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let callback = RpcClient::connect(callback_addr, self.max_frame_bytes).await?;
        info!(queue, callback_addr, "consumer callback connected");
        self.consume(queue, callback)
    }

    /// Removes the queue, its buffered messages and its durable log unit.
    ///
    /// The queue is closed and its unit removed while it is still registered,
    /// so a redeclaration under the same name always starts a fresh unit.
    pub async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        let queue = self.registry.get(name)?;
        let _gate = queue.log_gate().lock().await;
        if queue.is_closed() {
            return Err(BrokerError::UnknownQueue(name.to_string()));
        }
        queue.close();
        if queue.is_durable() {
            self.log.remove(name).await?;
        }
        self.registry.delete(name);
        info!(queue = name, "queue deleted");
        Ok(())
    }

    pub fn list_queues(&self) -> Vec<String> {
        self.registry.list()
    }
}

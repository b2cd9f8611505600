use std::time::Instant;

use tracing::info;

use crate::core::error::BrokerError;
use crate::core::message::Message;
use crate::core::queue::{Declared, QueueRegistry};
use crate::core::wal::DurabilityLog;
use crate::metrics;

/// What a startup replay restored.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub queues: usize,
    pub messages: usize,
}

/// Rebuilds durable queues from the log units left by a previous run.
///
/// Must finish before the listener opens so recovered messages stay ahead of
/// anything published afterwards. Replay never rewrites the log: the units
/// already mirror exactly what is being enqueued.
pub async fn recover(
    registry: &QueueRegistry,
    log: &DurabilityLog,
    capacity: usize,
) -> Result<RecoveryReport, BrokerError> {
    let started = Instant::now();
    let mut report = RecoveryReport::default();

    for (name, payloads) in log.replay_all().await? {
        let declared = registry.declare_with_capacity(&name, true, capacity.max(payloads.len()));
        if declared == Declared::AlreadyExists {
            tracing::warn!(queue = %name, "recovering into an already declared queue");
        }

        let queue = registry.get(&name)?;
        for payload in payloads {
            queue.enqueue(Message::new(payload)).await?;
            report.messages += 1;
        }
        report.queues += 1;
    }

    metrics::inc_recovered(report.messages as u64);
    info!(
        queues = report.queues,
        messages = report.messages,
        "recovery completed in {}ms",
        started.elapsed().as_millis()
    );
    Ok(report)
}

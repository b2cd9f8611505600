#![allow(dead_code)]

use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use futures::future::BoxFuture;
use relaymq::config::{Config, QueueConfig, ServerConfig, WalConfig};
use relaymq::core::subscriber::Subscriber;
use relaymq::BrokerError;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = relaymq::logging::init_logging();
    });
}

/// Broker config rooted at `dir` with the given TTL.
pub fn test_config(dir: &Path, ttl: Duration) -> Config {
    Config {
        server: ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        },
        queues: QueueConfig {
            capacity: 1024,
            message_ttl_ms: ttl.as_millis() as u64,
        },
        wal: WalConfig {
            directory: dir.to_path_buf(),
            fsync: false,
        },
    }
}

/// In-process consumer: reports every payload it sees and rejects the first
/// `reject` of them.
pub struct ScriptedSubscriber {
    seen: mpsc::UnboundedSender<String>,
    reject: usize,
    delay: Duration,
}

impl ScriptedSubscriber {
    pub fn accepting() -> (Self, mpsc::UnboundedReceiver<String>) {
        Self::rejecting(0)
    }

    pub fn rejecting(reject: usize) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (seen, rx) = mpsc::unbounded_channel();
        (
            Self {
                seen,
                reject,
                delay: Duration::ZERO,
            },
            rx,
        )
    }

    /// Holds every delivery for `delay` before answering.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Subscriber for ScriptedSubscriber {
    fn deliver<'a>(
        &'a mut self,
        _queue: &'a str,
        payload: &'a str,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(async move {
            let _ = self.seen.send(payload.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.reject > 0 {
                self.reject -= 1;
                return Err(BrokerError::DeliveryRejected(payload.to_string()));
            }
            Ok(())
        })
    }
}

/// Next payload seen by a subscriber, failing the test after one second.
pub async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("subscriber dropped")
}

/// Asserts nothing is delivered within `window`.
pub async fn assert_idle(rx: &mut mpsc::UnboundedReceiver<String>, window: Duration) {
    if let Ok(Some(payload)) = timeout(window, rx.recv()).await {
        panic!("unexpected delivery: {payload}");
    }
}

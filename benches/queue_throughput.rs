use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::BoxFuture;
use relaymq::config::{Config, QueueConfig, WalConfig};
use relaymq::core::subscriber::Subscriber;
use relaymq::{Broker, BrokerError};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

const NUM_MESSAGES: usize = 2_000;

/// Acknowledges everything and reports each delivery.
struct Counting(mpsc::UnboundedSender<()>);

impl Subscriber for Counting {
    fn deliver<'a>(
        &'a mut self,
        _queue: &'a str,
        _payload: &'a str,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        let _ = self.0.send(());
        Box::pin(async { Ok(()) })
    }
}

fn config(dir: &std::path::Path) -> Config {
    Config {
        queues: QueueConfig {
            capacity: NUM_MESSAGES,
            message_ttl_ms: 60_000,
        },
        wal: WalConfig {
            directory: dir.to_path_buf(),
            fsync: false,
        },
        ..Config::default()
    }
}

async fn publish_then_drain(broker: &Broker, queue: &str) {
    for i in 0..NUM_MESSAGES {
        broker
            .publish(queue, format!("msg-{i}"))
            .await
            .expect("publish failed");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = broker.consume(queue, Counting(tx)).expect("consume failed");
    for _ in 0..NUM_MESSAGES {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("delivery stalled");
    }
    engine.abort();
}

fn bench_queue_throughput(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create Tokio runtime");
    let dir = tempfile::tempdir().expect("tempdir");
    let (broker, _) = rt
        .block_on(Broker::open(&config(dir.path())))
        .expect("broker open failed");

    let mut group = c.benchmark_group("queue_throughput");
    group.throughput(Throughput::Elements(NUM_MESSAGES as u64));
    group.sample_size(10);

    for durable in [false, true] {
        let queue = if durable { "bench-durable" } else { "bench-transient" };
        broker.declare_queue(queue, durable);
        group.bench_with_input(BenchmarkId::new("publish_deliver", queue), &queue, |b, queue| {
            b.to_async(&rt).iter(|| publish_then_drain(&broker, queue));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_queue_throughput);
criterion_main!(benches);

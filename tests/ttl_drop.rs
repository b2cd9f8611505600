mod common;

use std::time::Duration;

use relaymq::Broker;
use tokio::time::{sleep, timeout};

use common::{assert_idle, init_logging, next_delivery, test_config, ScriptedSubscriber};

#[tokio::test]
async fn unacknowledged_message_expires_and_is_not_redelivered() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (broker, _) = Broker::open(&test_config(dir.path(), Duration::from_millis(50)))
        .await
        .unwrap();
    broker.declare_queue("ttl", true);
    broker.publish("ttl", "stale".to_string()).await.unwrap();
    broker.publish("ttl", "fresh".to_string()).await.unwrap();

    let (failing, mut seen) = ScriptedSubscriber::rejecting(1);
    let engine = broker.consume("ttl", failing).unwrap();
    assert_eq!(next_delivery(&mut seen).await, "stale");
    timeout(Duration::from_secs(1), engine).await.unwrap().unwrap();

    // Let the held message's timer fire; its log entry goes with it.
    sleep(Duration::from_millis(150)).await;
    assert_eq!(broker.log().entries("ttl").await.unwrap(), vec!["fresh"]);

    let (ok, mut seen) = ScriptedSubscriber::accepting();
    let _engine = broker.consume("ttl", ok).unwrap();
    assert_eq!(next_delivery(&mut seen).await, "fresh");
    assert_idle(&mut seen, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn acknowledgment_after_expiry_is_ignored() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (broker, _) = Broker::open(&test_config(dir.path(), Duration::from_millis(100)))
        .await
        .unwrap();
    broker.declare_queue("slow", true);
    broker.publish("slow", "m1".to_string()).await.unwrap();
    broker.publish("slow", "m2".to_string()).await.unwrap();

    // Answers long after the TTL: the timer has already committed "m1", so the
    // late ack must not commit "m2" as well.
    let (slow, mut seen) = ScriptedSubscriber::accepting();
    let _engine = broker
        .consume("slow", slow.slow(Duration::from_millis(300)))
        .unwrap();
    assert_eq!(next_delivery(&mut seen).await, "m1");
    sleep(Duration::from_millis(200)).await;
    assert_eq!(broker.log().entries("slow").await.unwrap(), vec!["m2"]);

    assert_eq!(next_delivery(&mut seen).await, "m2");
    assert_eq!(broker.log().entries("slow").await.unwrap(), vec!["m2"]);
}

mod common;

use std::time::Duration;

use relaymq::core::delivery::EngineExit;
use relaymq::Broker;
use tokio::time::timeout;

use common::{assert_idle, init_logging, next_delivery, test_config, ScriptedSubscriber};

const LONG_TTL: Duration = Duration::from_secs(30);

#[tokio::test]
async fn rejected_message_is_redelivered_to_next_subscription() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (broker, _) = Broker::open(&test_config(dir.path(), LONG_TTL)).await.unwrap();
    broker.declare_queue("retry", false);
    broker.publish("retry", "X".to_string()).await.unwrap();
    broker.publish("retry", "Y".to_string()).await.unwrap();

    let (failing, mut first_seen) = ScriptedSubscriber::rejecting(1);
    let engine = broker.consume("retry", failing).unwrap();
    assert_eq!(next_delivery(&mut first_seen).await, "X");

    // A failed delivery ends the subscription.
    let exit = timeout(Duration::from_secs(1), engine).await.unwrap().unwrap();
    assert!(matches!(exit, EngineExit::Rejected(_)));
    assert_idle(&mut first_seen, Duration::from_millis(50)).await;

    // The held message goes out again ahead of everything behind it.
    let (ok, mut second_seen) = ScriptedSubscriber::accepting();
    let _engine = broker.consume("retry", ok).unwrap();
    assert_eq!(next_delivery(&mut second_seen).await, "X");
    assert_eq!(next_delivery(&mut second_seen).await, "Y");
}

#[tokio::test]
async fn durable_log_keeps_rejected_entry_until_acknowledged() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (broker, _) = Broker::open(&test_config(dir.path(), LONG_TTL)).await.unwrap();
    broker.declare_queue("D", true);
    broker.publish("D", "A".to_string()).await.unwrap();
    broker.publish("D", "B".to_string()).await.unwrap();
    assert_eq!(broker.log().entries("D").await.unwrap(), vec!["A", "B"]);

    let (failing, mut seen) = ScriptedSubscriber::rejecting(1);
    let engine = broker.consume("D", failing).unwrap();
    assert_eq!(next_delivery(&mut seen).await, "A");
    timeout(Duration::from_secs(1), engine).await.unwrap().unwrap();
    assert_eq!(broker.log().entries("D").await.unwrap(), vec!["A", "B"]);

    let (ok, mut seen) = ScriptedSubscriber::accepting();
    let _engine = broker.consume("D", ok).unwrap();
    assert_eq!(next_delivery(&mut seen).await, "A");
    assert_eq!(next_delivery(&mut seen).await, "B");

    // Commits trail the acknowledgment; give the last one a moment.
    let unit = broker.log().unit_path("D");
    timeout(Duration::from_secs(1), async {
        while unit.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("drained unit should be removed");
}

#[tokio::test]
async fn only_one_message_is_in_flight_per_queue() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let (broker, _) = Broker::open(&test_config(dir.path(), LONG_TTL)).await.unwrap();
    broker.declare_queue("single", false);
    for payload in ["1", "2", "3"] {
        broker.publish("single", payload.to_string()).await.unwrap();
    }

    let (slow, mut seen) = ScriptedSubscriber::accepting();
    let _engine = broker
        .consume("single", slow.slow(Duration::from_millis(100)))
        .unwrap();

    assert_eq!(next_delivery(&mut seen).await, "1");
    // Still waiting on the first answer: nothing else may go out yet.
    assert_idle(&mut seen, Duration::from_millis(60)).await;
    assert_eq!(broker.registry().depth("single"), Some(2));

    assert_eq!(next_delivery(&mut seen).await, "2");
    assert_eq!(next_delivery(&mut seen).await, "3");
}

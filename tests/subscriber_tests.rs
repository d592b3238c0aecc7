mod common;

use anyhow::anyhow;
use chrono::TimeDelta;
use common::{delivery, MockService};
use pubsub_latency::clock::ManualClock;
use pubsub_latency::subscriber::{handle_message, Outcome, Subscriber};
use pubsub_latency::{MalformedPolicy, Message, PubSubClient};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

const SUBSCRIPTION: &str = "projects/demo/subscriptions/ticks-sub";

fn message(service: &Arc<MockService>, ack_id: &str, payload: &str) -> Message {
    Message::new(
        delivery(ack_id, payload),
        SUBSCRIPTION.to_string(),
        service.clone(),
    )
}

#[tokio::test]
async fn test_latency_computed_and_acked_once() {
    let service = Arc::new(MockService::default());
    let clock = ManualClock::from_nanos(3_000_000_000);

    let outcome = handle_message(
        message(&service, "ack-1", "1000000000"),
        &clock,
        MalformedPolicy::Ack,
    )
    .await
    .unwrap();

    assert_eq!(
        outcome,
        Outcome::Received {
            latency: TimeDelta::seconds(2)
        }
    );
    assert_eq!(service.acked(), vec!["ack-1".to_string()]);
    assert!(service.nacked().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_acked_under_ack_policy() {
    let service = Arc::new(MockService::default());
    let clock = ManualClock::from_nanos(3_000_000_000);

    let outcome = handle_message(message(&service, "ack-2", "abc"), &clock, MalformedPolicy::Ack)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Malformed {
            settled: MalformedPolicy::Ack
        }
    );
    assert_eq!(service.acked(), vec!["ack-2".to_string()]);
    assert!(service.nacked().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_nacked_under_nack_policy() {
    let service = Arc::new(MockService::default());
    let clock = ManualClock::from_nanos(3_000_000_000);

    let outcome = handle_message(
        message(&service, "ack-3", "abc"),
        &clock,
        MalformedPolicy::Nack,
    )
    .await
    .unwrap();

    assert_eq!(
        outcome,
        Outcome::Malformed {
            settled: MalformedPolicy::Nack
        }
    );
    assert!(service.acked().is_empty());
    assert_eq!(service.nacked(), vec!["ack-3".to_string()]);
}

#[tokio::test]
async fn test_clock_skew_gives_negative_latency() {
    let service = Arc::new(MockService::default());
    let clock = ManualClock::from_nanos(1_000_000_000);

    let outcome = handle_message(
        message(&service, "ack-4", "1500000000"),
        &clock,
        MalformedPolicy::Ack,
    )
    .await
    .unwrap();

    assert_eq!(
        outcome,
        Outcome::Received {
            latency: TimeDelta::milliseconds(-500)
        }
    );
    assert_eq!(service.acked().len(), 1);
}

#[tokio::test]
async fn test_run_settles_every_delivery_and_stops_on_pull_error() {
    let service = Arc::new(MockService::default());
    service.push_batch(Ok(vec![
        delivery("a", "1000000000"),
        delivery("b", "not-a-number"),
        delivery("c", "2000000000"),
    ]));
    service.push_batch(Err(anyhow!("pull status 404: subscription not found")));

    let client = PubSubClient::with_service("demo", service.clone());
    let subscriber = Subscriber::new(
        client.subscription("ticks-sub"),
        Arc::new(ManualClock::from_nanos(3_000_000_000)),
        MalformedPolicy::Nack,
        2,
    );

    // The pull error closes the channel, so `run` returns without cancellation.
    timeout(Duration::from_secs(5), subscriber.run(CancellationToken::new()))
        .await
        .unwrap();

    let mut acked = service.acked();
    acked.sort();
    assert_eq!(acked, vec!["a".to_string(), "c".to_string()]);
    assert_eq!(service.nacked(), vec!["b".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_run_bounds_concurrent_handlers() {
    let service = Arc::new(MockService::default());
    service.slow_acks(Duration::from_secs(1));
    let batch = (0..20)
        .map(|i| delivery(&format!("ack-{}", i), "1000000000"))
        .collect();
    service.push_batch(Ok(batch));
    service.push_batch(Err(anyhow!("pull status 404: subscription not found")));

    let client = PubSubClient::with_service("demo", service.clone());
    let subscriber = Subscriber::new(
        client.subscription("ticks-sub"),
        Arc::new(ManualClock::from_nanos(3_000_000_000)),
        MalformedPolicy::Ack,
        3,
    );

    timeout(Duration::from_secs(60), subscriber.run(CancellationToken::new()))
        .await
        .unwrap();

    assert_eq!(service.acked().len(), 20);
    assert_eq!(service.peak_acks_in_flight(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_on_cancel() {
    let service = Arc::new(MockService::default());
    service.push_batch(Ok(vec![delivery("a", "1000000000")]));

    let client = PubSubClient::with_service("demo", service.clone());
    let subscriber = Subscriber::new(
        client.subscription("ticks-sub"),
        Arc::new(ManualClock::from_nanos(3_000_000_000)),
        MalformedPolicy::Ack,
        10,
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(subscriber.run(cancel.clone()));

    tokio::time::sleep(Duration::from_secs(2)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(service.acked(), vec!["a".to_string()]);
}

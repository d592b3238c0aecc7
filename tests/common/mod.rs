#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pubsub_latency::clock::Clock;
use pubsub_latency::dto::{PubsubMessage, ReceivedMessage};
use pubsub_latency::PubSubService;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Records every call and replays scripted pull batches.
#[derive(Default)]
pub struct MockService {
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    pub acked: Mutex<Vec<String>>,
    pub nacked: Mutex<Vec<String>>,
    pub pull_batches: Mutex<VecDeque<Result<Vec<ReceivedMessage>>>>,
    pub failing_publishes: AtomicUsize,
    /// Consumed one per publish call; an empty queue publishes instantly.
    pub publish_delays: Mutex<VecDeque<Duration>>,
    pub publish_started: Mutex<Vec<Instant>>,
    pub ack_delay: Mutex<Duration>,
    acks_in_flight: AtomicUsize,
    peak_acks_in_flight: AtomicUsize,
    next_id: AtomicUsize,
}

impl MockService {
    pub fn fail_next_publishes(&self, count: usize) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    pub fn slow_publishes(&self, delay: Duration, count: usize) {
        self.publish_delays
            .lock()
            .unwrap()
            .extend(std::iter::repeat(delay).take(count));
    }

    pub fn slow_acks(&self, delay: Duration) {
        *self.ack_delay.lock().unwrap() = delay;
    }

    /// Whole seconds after `start` at which each publish call began.
    pub fn publish_offsets(&self, start: Instant) -> Vec<u64> {
        self.publish_started
            .lock()
            .unwrap()
            .iter()
            .map(|at| at.duration_since(start).as_secs())
            .collect()
    }

    pub fn peak_acks_in_flight(&self) -> usize {
        self.peak_acks_in_flight.load(Ordering::SeqCst)
    }

    pub fn push_batch(&self, batch: Result<Vec<ReceivedMessage>>) {
        self.pull_batches.lock().unwrap().push_back(batch);
    }

    pub fn published_payloads(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, data)| String::from_utf8(data.clone()).unwrap())
            .collect()
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<String> {
        self.nacked.lock().unwrap().clone()
    }
}

#[async_trait]
impl PubSubService for MockService {
    async fn publish(&self, topic: &str, messages: Vec<PubsubMessage>) -> Result<Vec<String>> {
        self.publish_started.lock().unwrap().push(Instant::now());
        let delay = self.publish_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let failing = self.failing_publishes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_publishes.store(failing - 1, Ordering::SeqCst);
            return Err(anyhow!("publish status 503: unavailable"));
        }

        let mut published = self.published.lock().unwrap();
        let mut ids = Vec::new();
        for message in messages {
            published.push((topic.to_string(), message.data));
            ids.push(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        }
        Ok(ids)
    }

    async fn pull(&self, _subscription: &str, _max_messages: i32) -> Result<Vec<ReceivedMessage>> {
        self.pull_batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn acknowledge(&self, _subscription: &str, ack_ids: Vec<String>) -> Result<()> {
        let in_flight = self.acks_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_acks_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.ack_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        self.acked.lock().unwrap().extend(ack_ids);
        self.acks_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        _subscription: &str,
        ack_ids: Vec<String>,
        ack_deadline_seconds: i32,
    ) -> Result<()> {
        assert_eq!(ack_deadline_seconds, 0);
        self.nacked.lock().unwrap().extend(ack_ids);
        Ok(())
    }
}

pub fn delivery(ack_id: &str, payload: &str) -> ReceivedMessage {
    ReceivedMessage {
        ack_id: ack_id.to_string(),
        message: PubsubMessage::with_data(payload),
        delivery_attempt: None,
    }
}

/// Wall clock driven by tokio's (pausable) clock, starting at `base`.
pub struct PausedClock {
    base: DateTime<Utc>,
    started: Instant,
}

impl PausedClock {
    pub fn new(base_nanos: i64) -> Self {
        Self {
            base: DateTime::from_timestamp_nanos(base_nanos),
            started: Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::TimeDelta::from_std(self.started.elapsed()).unwrap_or_default();
        self.base + elapsed
    }
}

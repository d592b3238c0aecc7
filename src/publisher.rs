use crate::client::Topic;
use crate::clock::Clock;
use crate::payload::encode_timestamp;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Publishes the current timestamp to a topic once per period.
pub struct Publisher {
    topic: Topic,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl Publisher {
    pub fn new(topic: Topic, clock: Arc<dyn Clock>, period: Duration) -> Self {
        Self {
            topic,
            clock,
            period,
        }
    }

    /// Tick until `cancel` fires, then stop the topic so that in-flight
    /// publishes are flushed. The first tick comes one period after start;
    /// ticks missed while a publish is outstanding are skipped.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Publishing to {} every {:?}",
            self.topic.name(),
            self.period
        );

        loop {
            // A tick missed during a slow publish is already due; cancellation
            // must still win.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // Failures are already logged; the next tick tries again.
            let _ = publish_timestamp(&self.topic, self.clock.now()).await;
        }

        drop(ticker);
        self.topic.stop().await;
        info!("Publisher for {} stopped", self.topic.name());
    }
}

/// Publish one timestamp and wait for the service's verdict on it.
pub async fn publish_timestamp(topic: &Topic, at: DateTime<Utc>) -> Result<String> {
    let payload = match encode_timestamp(at) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Cannot encode timestamp: {}", e);
            return Err(e);
        }
    };

    match topic.publish(payload.as_bytes()).get().await {
        Ok(message_id) => {
            info!("Published Message:{}", payload);
            Ok(message_id)
        }
        Err(e) => {
            error!("Pubsub Message Publish Failed with error:{}", e);
            Err(e)
        }
    }
}

use crate::client::{Message, Subscription};
use crate::clock::Clock;
use crate::config::MalformedPolicy;
use crate::payload::{decode_timestamp, format_latency, latency};
use anyhow::Result;
use chrono::TimeDelta;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// How a delivered message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The payload was a timestamp; the message was acknowledged.
    Received { latency: TimeDelta },
    /// The payload was not a timestamp; the message was settled per policy.
    Malformed { settled: MalformedPolicy },
}

/// Drains a subscription, logging the latency of each message.
pub struct Subscriber {
    subscription: Subscription,
    clock: Arc<dyn Clock>,
    on_malformed: MalformedPolicy,
    max_outstanding: usize,
}

impl Subscriber {
    pub fn new(
        subscription: Subscription,
        clock: Arc<dyn Clock>,
        on_malformed: MalformedPolicy,
        max_outstanding: usize,
    ) -> Self {
        Self {
            subscription,
            clock,
            on_malformed,
            max_outstanding: max_outstanding.max(1),
        }
    }

    /// Handle deliveries with at most `max_outstanding` in progress until the
    /// receive channel closes, then wait for the handlers still running.
    pub async fn run(self, cancel: CancellationToken) {
        let mut messages = self
            .subscription
            .receive(cancel, self.max_outstanding);
        let limiter = Arc::new(Semaphore::new(self.max_outstanding));
        let handlers = TaskTracker::new();

        while let Some(message) = messages.recv().await {
            let Ok(permit) = limiter.clone().acquire_owned().await else {
                break;
            };
            let clock = self.clock.clone();
            let policy = self.on_malformed;
            handlers.spawn(async move {
                if let Err(e) = handle_message(message, clock.as_ref(), policy).await {
                    warn!("Failed to settle message: {}", e);
                }
                drop(permit);
            });
        }

        handlers.close();
        handlers.wait().await;
        info!("Subscriber for {} stopped", self.subscription.name());
    }
}

/// Decode the timestamp, log the latency and settle the message exactly once.
pub async fn handle_message(
    message: Message,
    clock: &dyn Clock,
    on_malformed: MalformedPolicy,
) -> Result<Outcome> {
    match decode_timestamp(&message.data) {
        Ok(sent) => {
            let elapsed = latency(sent, clock.now());
            info!(
                "Received Message: {} in {}",
                String::from_utf8_lossy(&message.data),
                format_latency(elapsed)
            );
            message.ack().await?;
            Ok(Outcome::Received { latency: elapsed })
        }
        Err(e) => {
            warn!(
                "Can't convert message body to an int ({}), settling with {}",
                e, on_malformed
            );
            match on_malformed {
                MalformedPolicy::Ack => message.ack().await?,
                MalformedPolicy::Nack => message.nack().await?,
            }
            Ok(Outcome::Malformed {
                settled: on_malformed,
            })
        }
    }
}

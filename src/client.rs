use crate::api_client::{PubSubApiClient, DEFAULT_ENDPOINT, EMULATOR_HOST_ENV};
use crate::auth::Credentials;
use crate::dto::{self, PubsubMessage};
use crate::service::PubSubService;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

const EMPTY_PULL_PAUSE: Duration = Duration::from_millis(100);

/// Overrides for [`PubSubClient::connect`]. Anything left `None` is discovered
/// from the environment.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub endpoint: Option<String>,
    pub credentials: Option<Credentials>,
}

/// Long-lived handle to the service for one project
pub struct PubSubClient {
    project_id: String,
    service: Arc<dyn PubSubService>,
}

impl PubSubClient {
    /// Connect to Pub/Sub for `project_id`.
    ///
    /// Fails on an empty project id, undiscoverable credentials or
    /// credentials the token endpoint rejects.
    pub async fn connect(project_id: &str, options: ClientOptions) -> Result<Self> {
        if project_id.trim().is_empty() {
            return Err(anyhow!("project id must not be empty"));
        }

        let emulator_host = std::env::var(EMULATOR_HOST_ENV).ok();
        let endpoint = match (&options.endpoint, &emulator_host) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(host)) => format!("http://{}", host),
            (None, None) => DEFAULT_ENDPOINT.to_string(),
        };

        let credentials = match options.credentials {
            Some(credentials) => credentials,
            None if emulator_host.is_some() => Credentials::Anonymous,
            None => Credentials::discover()?,
        };
        debug!("Connecting to {} with {:?}", endpoint, credentials);

        let api = PubSubApiClient::new(endpoint, credentials)?;
        api.authorize().await?;

        Ok(Self::with_service(project_id, Arc::new(api)))
    }

    /// Wrap an existing service implementation.
    pub fn with_service(project_id: impl Into<String>, service: Arc<dyn PubSubService>) -> Self {
        Self {
            project_id: project_id.into(),
            service,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn topic(&self, topic_id: &str) -> Topic {
        Topic {
            name: format!("projects/{}/topics/{}", self.project_id, topic_id),
            service: self.service.clone(),
            in_flight: TaskTracker::new(),
        }
    }

    pub fn subscription(&self, subscription_id: &str) -> Subscription {
        Subscription {
            name: format!(
                "projects/{}/subscriptions/{}",
                self.project_id, subscription_id
            ),
            service: self.service.clone(),
        }
    }

    /// Release the handle. Consuming `self` makes this happen at most once.
    /// Topics should be stopped first so their in-flight publishes are flushed.
    pub async fn close(self) {
        drop(self.service);
        info!("Client connection for project {} closed", self.project_id);
    }
}

/// Handle for publishing to one topic.
pub struct Topic {
    name: String,
    service: Arc<dyn PubSubService>,
    in_flight: TaskTracker,
}

impl Topic {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start publishing `data` in the background and return a handle to the
    /// outcome of this particular send.
    pub fn publish(&self, data: impl Into<Vec<u8>>) -> PublishResult {
        let (tx, rx) = oneshot::channel();

        if self.in_flight.is_closed() {
            let _ = tx.send(Err(anyhow!("topic {} has been stopped", self.name)));
            return PublishResult { rx };
        }

        let service = self.service.clone();
        let name = self.name.clone();
        let message = PubsubMessage::with_data(data);
        self.in_flight.spawn(async move {
            let result = service
                .publish(&name, vec![message])
                .await
                .and_then(|ids| {
                    ids.into_iter()
                        .next()
                        .ok_or_else(|| anyhow!("publish to {} returned no message id", name))
                });
            let _ = tx.send(result);
        });

        PublishResult { rx }
    }

    /// Refuse further publishes and wait for the in-flight ones to finish.
    pub async fn stop(&self) {
        self.in_flight.close();
        if !self.in_flight.is_empty() {
            debug!(
                "Waiting for {} in-flight publishes on {}",
                self.in_flight.len(),
                self.name
            );
        }
        self.in_flight.wait().await;
    }
}

/// The eventual outcome of one [`Topic::publish`] call.
#[derive(Debug)]
pub struct PublishResult {
    rx: oneshot::Receiver<Result<String>>,
}

impl PublishResult {
    /// Wait for the service to accept or reject the message. Returns the
    /// service-assigned message id.
    pub async fn get(self) -> Result<String> {
        self.rx
            .await
            .map_err(|_| anyhow!("publish task ended without reporting a result"))?
    }
}

/// Handle for receiving from one subscription.
pub struct Subscription {
    name: String,
    service: Arc<dyn PubSubService>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a background pull loop feeding a channel of at most `capacity`
    /// undelivered messages; the loop waits while the channel is full.
    ///
    /// The channel closes when `cancel` fires, when the receiver is dropped,
    /// or after the first pull error, which is logged.
    pub fn receive(&self, cancel: CancellationToken, capacity: usize) -> mpsc::Receiver<Message> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let service = self.service.clone();
        let name = self.name.clone();
        let max_messages = i32::try_from(capacity).unwrap_or(i32::MAX);

        tokio::spawn(async move {
            info!("Receiving from {}", name);
            'pull: loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = service.pull(&name, max_messages) => batch,
                };

                let received = match batch {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Subscription Error: {}", e);
                        break;
                    }
                };

                if received.is_empty() {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(EMPTY_PULL_PAUSE) => continue,
                    }
                }

                debug!("Pulled {} messages from {}", received.len(), name);
                for delivery in received {
                    let message = Message::new(delivery, name.clone(), service.clone());
                    tokio::select! {
                        _ = cancel.cancelled() => break 'pull,
                        sent = tx.send(message) => {
                            if sent.is_err() {
                                break 'pull;
                            }
                        }
                    }
                }
            }
            info!("Stopped receiving from {}", name);
        });

        rx
    }
}

/// A delivered message. It must be settled with [`Message::ack`] or
/// [`Message::nack`]; both consume it.
pub struct Message {
    pub data: Vec<u8>,
    pub message_id: Option<String>,
    pub publish_time: Option<DateTime<Utc>>,
    pub attributes: HashMap<String, String>,
    pub delivery_attempt: Option<i32>,
    ack_id: String,
    subscription: String,
    service: Arc<dyn PubSubService>,
}

impl Message {
    pub fn new(
        delivery: dto::ReceivedMessage,
        subscription: String,
        service: Arc<dyn PubSubService>,
    ) -> Self {
        let dto::ReceivedMessage {
            ack_id,
            message,
            delivery_attempt,
        } = delivery;

        Self {
            data: message.data,
            message_id: message.message_id,
            publish_time: message.publish_time,
            attributes: message.attributes,
            delivery_attempt,
            ack_id,
            subscription,
            service,
        }
    }

    pub fn ack_id(&self) -> &str {
        &self.ack_id
    }

    /// Tell the service the message was processed and must not be redelivered.
    pub async fn ack(self) -> Result<()> {
        self.service
            .acknowledge(&self.subscription, vec![self.ack_id])
            .await
    }

    /// Ask the service to redeliver the message as soon as possible.
    pub async fn nack(self) -> Result<()> {
        self.service
            .modify_ack_deadline(&self.subscription, vec![self.ack_id], 0)
            .await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("data", &String::from_utf8_lossy(&self.data))
            .field("message_id", &self.message_id)
            .field("publish_time", &self.publish_time)
            .field("ack_id", &self.ack_id)
            .field("subscription", &self.subscription)
            .finish()
    }
}

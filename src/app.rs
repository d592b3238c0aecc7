use crate::client::{ClientOptions, PubSubClient};
use crate::clock::Clock;
use crate::config::Config;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Connect to the service and run until `cancel` fires.
///
/// A failed connection is returned as an error before anything is started.
pub async fn start(config: &Config, clock: Arc<dyn Clock>, cancel: CancellationToken) -> Result<()> {
    let options = ClientOptions {
        endpoint: config.endpoint.clone(),
        credentials: None,
    };
    let client = PubSubClient::connect(&config.project_id, options)
        .await
        .context("Pubsub Client creation error")?;
    // Network traffic may not start until the first publish.
    info!("Client connection built now!");

    run(config, client, clock, cancel).await
}

/// Run the publisher and, when a subscription is configured, the subscriber
/// against `client`; shut both down in order once `cancel` fires.
pub async fn run(
    config: &Config,
    client: PubSubClient,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> Result<()> {
    let publisher = Publisher::new(client.topic(&config.topic), clock.clone(), config.interval);
    let publisher_task = tokio::spawn(publisher.run(cancel.clone()));

    let subscriber_task = config.subscription.as_deref().map(|subscription| {
        let subscriber = Subscriber::new(
            client.subscription(subscription),
            clock.clone(),
            config.on_malformed,
            config.max_outstanding,
        );
        tokio::spawn(subscriber.run(cancel.clone()))
    });

    cancel.cancelled().await;
    info!("Shutting down");

    // Join both and close the client even if one of the tasks panicked.
    let published = publisher_task.await.context("publisher task failed");
    let subscribed = match subscriber_task {
        Some(task) => task.await.context("subscriber task failed"),
        None => Ok(()),
    };
    client.close().await;

    published?;
    subscribed
}

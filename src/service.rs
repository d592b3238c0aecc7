use crate::dto::{PubsubMessage, ReceivedMessage};
use anyhow::Result;
use async_trait::async_trait;

/// The remote operations the client handle is built on.
///
/// Resource names are fully qualified: `projects/{project}/topics/{topic}` and
/// `projects/{project}/subscriptions/{subscription}`. Implementations must be
/// safe to share between tasks.
#[async_trait]
pub trait PubSubService: Send + Sync {
    /// Publish `messages` to `topic`, returning the service-assigned ids in order.
    async fn publish(&self, topic: &str, messages: Vec<PubsubMessage>) -> Result<Vec<String>>;

    /// Pull up to `max_messages` deliveries from `subscription`.
    async fn pull(&self, subscription: &str, max_messages: i32) -> Result<Vec<ReceivedMessage>>;

    async fn acknowledge(&self, subscription: &str, ack_ids: Vec<String>) -> Result<()>;

    /// A deadline of zero makes the messages immediately eligible for redelivery.
    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: Vec<String>,
        ack_deadline_seconds: i32,
    ) -> Result<()>;
}

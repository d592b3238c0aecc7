use crate::auth::{Credentials, TokenProvider};
use crate::dto::*;
use crate::service::PubSubService;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";
pub const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";
const QUOTA_PROJECT_HEADER: &str = "x-goog-user-project";

// A pull with no messages available is held open by the service for a while.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Pub/Sub REST (`v1`) client
pub struct PubSubApiClient {
    client: Client,
    endpoint: String,
    tokens: TokenProvider,
}

impl PubSubApiClient {
    pub fn new(endpoint: impl Into<String>, credentials: Credentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();

        Ok(Self {
            tokens: TokenProvider::new(client.clone(), credentials),
            client,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Obtain a token now so that rejected credentials surface before any
    /// publish is attempted.
    pub async fn authorize(&self) -> Result<()> {
        self.tokens.authorization_header().await?;
        Ok(())
    }

    /// POST `body` to `{endpoint}/v1/{resource}:{verb}` and decode the reply.
    async fn post_json<T, U>(&self, resource: &str, verb: &str, body: &T) -> Result<U>
    where
        T: Serialize + ?Sized,
        U: DeserializeOwned,
    {
        let url = format!("{}/v1/{}:{}", self.endpoint, resource, verb);
        debug!("API request: {} {}", url, serde_json::to_string(body)?);

        let mut request = self.client.post(&url).json(body);
        if let Some(value) = self.tokens.authorization_header().await? {
            request = request.header(AUTHORIZATION, value);
        }
        if let Some(project) = self.tokens.credentials().quota_project_id() {
            request = request.header(QUOTA_PROJECT_HEADER, project);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status();
        debug!("API response status: {}", status);

        let response_text = response.text().await?;
        debug!("API response: {}", response_text);

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&response_text)
                .map(|e| e.error.message)
                .unwrap_or(response_text);
            return Err(anyhow!(
                "{} {} failed with status {}: {}",
                verb,
                resource,
                status,
                detail
            ));
        }

        if response_text.trim().is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_str(&response_text)?)
    }
}

#[async_trait]
impl PubSubService for PubSubApiClient {
    async fn publish(&self, topic: &str, messages: Vec<PubsubMessage>) -> Result<Vec<String>> {
        let request = PublishRequest { messages };
        let response: PublishResponse = self.post_json(topic, "publish", &request).await?;
        Ok(response.message_ids)
    }

    async fn pull(&self, subscription: &str, max_messages: i32) -> Result<Vec<ReceivedMessage>> {
        let request = PullRequest { max_messages };
        let response: PullResponse = self.post_json(subscription, "pull", &request).await?;
        Ok(response.received_messages)
    }

    async fn acknowledge(&self, subscription: &str, ack_ids: Vec<String>) -> Result<()> {
        let request = AcknowledgeRequest { ack_ids };
        let _: serde_json::Value = self
            .post_json(subscription, "acknowledge", &request)
            .await?;
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: Vec<String>,
        ack_deadline_seconds: i32,
    ) -> Result<()> {
        let request = ModifyAckDeadlineRequest {
            ack_ids,
            ack_deadline_seconds,
        };
        let _: serde_json::Value = self
            .post_json(subscription, "modifyAckDeadline", &request)
            .await?;
        Ok(())
    }
}

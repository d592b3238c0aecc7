//! # pubsub-latency
//!
//! A small Google Cloud Pub/Sub client that publishes the current time to a
//! topic at a fixed interval and, optionally, drains a subscription and logs
//! how long each message took to arrive.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pubsub_latency::{ClientOptions, PubSubClient};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = PubSubClient::connect("my-project", ClientOptions::default()).await?;
//!
//! let topic = client.topic("latency");
//! let message_id = topic.publish("1700000000000000000").get().await?;
//! println!("published {}", message_id);
//!
//! topic.stop().await;
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Payload
//!
//! Every message body is the decimal number of nanoseconds since the Unix
//! epoch at which it was sent. See [`payload`].
//!
//! ## Credentials
//!
//! With `PUBSUB_EMULATOR_HOST` set, requests go unauthenticated to the
//! emulator. Otherwise credentials are discovered the application-default
//! way: `GOOGLE_APPLICATION_CREDENTIALS`, then the file written by
//! `gcloud auth application-default login`, then the metadata server.
//!
//! ## Configuration
//!
//! Flags may be given on the command line or in a TOML file passed with
//! `--config`:
//!
//! ```toml
//! [pubsub]
//! project_id = "my-project"
//! topic = "latency"
//! subscription = "latency-sub"
//! interval_secs = 5
//! max_outstanding = 10
//! on_malformed = "ack"
//! ```

pub mod api_client;
pub mod app;
pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod dto;
pub mod payload;
pub mod publisher;
pub mod service;
pub mod shutdown;
pub mod subscriber;

// Re-export commonly used types at the crate root
pub use api_client::PubSubApiClient;
pub use auth::Credentials;
pub use client::{ClientOptions, Message, PubSubClient, PublishResult, Subscription, Topic};
pub use config::{Config, MalformedPolicy};
pub use service::PubSubService;

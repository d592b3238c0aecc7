use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_OUTSTANDING: usize = 10;

/// Long flags that may also be spelled with a single dash (`-topic`).
const SINGLE_DASH_FLAGS: &[&str] = &[
    "topic",
    "subscription",
    "projectid",
    "config",
    "interval-secs",
    "max-outstanding",
    "on-malformed",
];

/// What to do with a delivered message whose payload is not a timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Acknowledge and drop it.
    #[default]
    Ack,
    /// Negative-acknowledge so the service redelivers it.
    Nack,
}

impl fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MalformedPolicy::Ack => write!(f, "ack"),
            MalformedPolicy::Nack => write!(f, "nack"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "pubsub-latency")]
#[command(about = "Publish timestamps to a Pub/Sub topic and log end-to-end latency", long_about = None)]
pub struct Args {
    /// Topic to publish to (required)
    #[arg(long)]
    pub topic: Option<String>,
    /// Optional subscription to listen on
    #[arg(long)]
    pub subscription: Option<String>,
    /// GCP project hosting the topic and subscription
    #[arg(long = "projectid", visible_alias = "project-id")]
    pub project_id: Option<String>,
    /// TOML file with a [pubsub] table; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Seconds between published messages (default: 5)
    #[arg(long)]
    pub interval_secs: Option<u64>,
    /// Maximum deliveries processed concurrently (default: 10)
    #[arg(long)]
    pub max_outstanding: Option<usize>,
    /// Settle undecodable messages with ack or nack (default: ack)
    #[arg(long, value_enum)]
    pub on_malformed: Option<MalformedPolicy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub pubsub: PubSubFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct PubSubFileConfig {
    pub topic: Option<String>,
    pub subscription: Option<String>,
    pub project_id: Option<String>,
    pub interval_secs: Option<u64>,
    pub max_outstanding: Option<usize>,
    pub on_malformed: Option<MalformedPolicy>,
    pub endpoint: Option<String>,
}

/// Raised when no topic is configured.
#[derive(Debug)]
pub struct MissingTopic;

impl fmt::Display for MissingTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "The pubsub topic must be provided")
    }
}

impl std::error::Error for MissingTopic {}

/// Immutable runtime configuration, built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub topic: String,
    pub subscription: Option<String>,
    pub project_id: String,
    pub interval: Duration,
    pub max_outstanding: usize,
    pub on_malformed: MalformedPolicy,
    pub endpoint: Option<String>,
}

impl Config {
    /// Parse process arguments, accepting single-dash long flags.
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let args = Args::try_parse_from(normalize_flags(args))?;
        Self::from_parsed(args)
    }

    /// Merge parsed flags over the optional config file and defaults.
    pub fn from_parsed(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => {
                let config_str = fs::read_to_string(path)
                    .with_context(|| format!("cannot read config file {}", path.display()))?;
                let file: FileConfig = toml::from_str(&config_str)
                    .with_context(|| format!("invalid config file {}", path.display()))?;
                file.pubsub
            }
            None => PubSubFileConfig::default(),
        };

        let topic = non_empty(args.topic.or(file.topic)).ok_or(MissingTopic)?;

        let interval_secs = args
            .interval_secs
            .or(file.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        if interval_secs == 0 {
            return Err(anyhow!("publish interval must be at least one second"));
        }

        let max_outstanding = args
            .max_outstanding
            .or(file.max_outstanding)
            .unwrap_or(DEFAULT_MAX_OUTSTANDING);
        if max_outstanding == 0 {
            return Err(anyhow!("max outstanding messages must be at least 1"));
        }

        let config = Config {
            topic,
            subscription: non_empty(args.subscription.or(file.subscription)),
            project_id: args.project_id.or(file.project_id).unwrap_or_default(),
            interval: Duration::from_secs(interval_secs),
            max_outstanding,
            on_malformed: args.on_malformed.or(file.on_malformed).unwrap_or_default(),
            endpoint: non_empty(file.endpoint),
        };
        debug!("Config: {:?}", config);
        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Rewrite `-topic x` / `-topic=x` into `--topic x` / `--topic=x`.
pub fn normalize_flags<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| {
            if i == 0 || arg.starts_with("--") {
                return arg;
            }
            let Some(flag) = arg.strip_prefix('-') else {
                return arg;
            };
            let name = flag.split('=').next().unwrap_or(flag);
            if SINGLE_DASH_FLAGS.contains(&name) {
                format!("-{}", arg)
            } else {
                arg
            }
        })
        .collect()
}

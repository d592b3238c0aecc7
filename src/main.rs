use clap::Parser;
use pubsub_latency::app;
use pubsub_latency::clock::SystemClock;
use pubsub_latency::config::{normalize_flags, Args, Config};
use pubsub_latency::shutdown;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pubsub_latency=info")),
        )
        .init();

    let args = Args::parse_from(normalize_flags(std::env::args()));
    let config = match Config::from_parsed(args) {
        Ok(config) => config,
        Err(e) => {
            println!("{:#}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let signals = shutdown::cancel_on_signal(cancel.clone());

    let result = app::start(&config, Arc::new(SystemClock), cancel.clone()).await;
    cancel.cancel();
    signals.await?;

    match result {
        Ok(()) => {
            info!("Stopped");
            Ok(())
        }
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}

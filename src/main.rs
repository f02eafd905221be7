//! Search Chat - HTTP Server Entry Point
//!
//! Starts the HTTP server that serves the chat page and its API.

use search_chat::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "search_chat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, streaming={}, max_iterations={}",
        config.default_model, config.streaming, config.max_iterations
    );

    api::serve(config).await?;

    Ok(())
}

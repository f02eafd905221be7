//! HTTP API: session store, chat endpoints and the single-page UI.

mod chat;
mod routes;
mod session_store;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

pub use routes::{router, AppState, LlmFactory};
pub use session_store::{ChatSession, InMemorySessionStore, SharedSession};

use crate::config::Config;

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config));

    let idle_ttl = state.config.session_idle_ttl;
    if !idle_ttl.is_zero() {
        state
            .sessions
            .spawn_eviction(idle_ttl.min(Duration::from_secs(60)));
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

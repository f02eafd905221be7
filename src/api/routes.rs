//! Router, shared state and the static page.

use std::sync::Arc;

use axum::{
    response::Html,
    routing::{get, post, put},
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::chat;
use super::session_store::InMemorySessionStore;
use super::types::HealthResponse;
use crate::config::Config;
use crate::llm::{LlmClient, OpenAiClient};
use crate::tools::ToolRegistry;

/// Builds a model client for a session's API key.
pub type LlmFactory = Arc<dyn Fn(&str) -> Arc<dyn LlmClient> + Send + Sync>;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub sessions: InMemorySessionStore,
    pub tools: Arc<ToolRegistry>,
    pub llm_factory: LlmFactory,
}

impl AppState {
    /// State backed by the OpenAI-compatible endpoint and the built-in tools.
    pub fn new(config: Config) -> Self {
        let base_url = config.openai_base_url.clone();
        let timeout = config.llm_timeout;
        let llm_factory: LlmFactory = Arc::new(move |api_key: &str| {
            Arc::new(OpenAiClient::with_base_url(api_key, base_url.clone(), timeout))
                as Arc<dyn LlmClient>
        });
        let tools = Arc::new(ToolRegistry::with_defaults(&config));
        let sessions = InMemorySessionStore::new(config.session_idle_ttl);

        Self {
            config,
            sessions,
            tools,
            llm_factory,
        }
    }

    pub fn with_llm_factory(mut self, llm_factory: LlmFactory) -> Self {
        self.llm_factory = llm_factory;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/sessions", post(chat::create_session))
        .route(
            "/api/sessions/:id",
            get(chat::get_session).delete(chat::delete_session),
        )
        .route("/api/sessions/:id/reset", post(chat::reset_session))
        .route("/api/sessions/:id/credential", put(chat::set_credential))
        .route("/api/sessions/:id/messages", post(chat::post_message))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

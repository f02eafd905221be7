//! Chat-completion endpoint abstraction.

mod openai;

pub use openai::OpenAiClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

/// Role of a message sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited by the model provider")]
    RateLimited,

    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("token stream failed: {0}")]
    Stream(String),

    #[error("unexpected model response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => LlmError::Auth(body),
            429 => LlmError::RateLimited,
            _ => LlmError::Api { status, body },
        }
    }
}

/// Stream of text chunks from the model.
pub type TokenStream = BoxStream<'static, Result<String, LlmError>>;

/// A chat-completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete in one shot and return the full text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Complete as a stream of text chunks.
    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream, LlmError>;
}

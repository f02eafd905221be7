//! Single-step decision making.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::config::Config;
use crate::events::EventSink;
use crate::history::Message;
use crate::llm::{CompletionRequest, LlmClient, LlmError};
use crate::tools::{ToolCall, ToolDescriptor, ToolResult};

use super::parser::parse_action;
use super::prompt::{build_system_prompt, render_messages};

/// What the agent does next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The turn is complete.
    Respond(String),
    /// Run a tool, then decide again.
    Invoke(ToolCall),
    /// The reply did not follow the action grammar. Recoverable.
    ParseError { raw: String, reason: String },
}

/// Within-turn memory fed back into each decision.
#[derive(Debug, Clone)]
pub enum ScratchpadEntry {
    Tool { call: ToolCall, result: ToolResult },
    Rejected { raw: String, reason: String },
}

/// Everything a policy sees when deciding.
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    /// Messages before the current input.
    pub history: &'a [Message],
    pub input: &'a str,
    pub tools: &'a [ToolDescriptor],
    pub scratchpad: &'a [ScratchpadEntry],
}

/// Decision engine behind the agent loop.
#[async_trait]
pub trait AgentPolicy: Send + Sync {
    /// Decide the next action. Progress such as model tokens goes to `sink`.
    async fn decide(&self, turn: &Turn<'_>, sink: &EventSink) -> Result<Action, LlmError>;
}

/// Policy backed by a chat-completion model.
pub struct LlmPolicy {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: Option<f32>,
    streaming: bool,
}

impl LlmPolicy {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature: None,
            streaming: true,
        }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, config: &Config) -> Self {
        Self::new(llm, config.default_model.clone())
            .with_temperature(config.temperature)
            .with_streaming(config.streaming)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

#[async_trait]
impl AgentPolicy for LlmPolicy {
    async fn decide(&self, turn: &Turn<'_>, sink: &EventSink) -> Result<Action, LlmError> {
        let system_prompt = build_system_prompt(turn.tools);
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: render_messages(&system_prompt, turn),
            temperature: self.temperature,
        };

        let text = if self.streaming {
            let mut stream = self.llm.stream(&request).await?;
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                sink.token(chunk.as_str());
                text.push_str(&chunk);
            }
            text
        } else {
            self.llm.complete(&request).await?
        };

        tracing::debug!(
            model = %self.model,
            scratchpad = turn.scratchpad.len(),
            reply_len = text.len(),
            "Model replied"
        );
        Ok(parse_action(&text))
    }
}

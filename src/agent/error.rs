use thiserror::Error;

use crate::llm::LlmError;
use crate::session::Trace;
use crate::tools::ToolError;

/// Why a run ended in the failed state.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Model(#[from] LlmError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("no answer after {0} steps")]
    StepBoundExceeded(usize),
}

/// A failed run, with the trace recorded up to the failure.
#[derive(Debug, Error)]
#[error("agent run failed: {failure}")]
pub struct AgentLoopError {
    #[source]
    pub failure: RunFailure,
    pub trace: Trace,
}

impl AgentLoopError {
    pub fn new(failure: impl Into<RunFailure>, trace: Trace) -> Self {
        Self {
            failure: failure.into(),
            trace,
        }
    }

    /// Stable code for clients.
    pub fn kind(&self) -> &'static str {
        match &self.failure {
            RunFailure::Model(LlmError::Auth(_)) => "auth_error",
            RunFailure::Model(LlmError::RateLimited) => "rate_limited",
            RunFailure::Model(_) => "model_error",
            RunFailure::Tool(ToolError::NotFound(_)) => "tool_not_found",
            RunFailure::Tool(ToolError::Timeout { .. }) => "tool_timeout",
            RunFailure::Tool(ToolError::Execution { .. }) => "tool_error",
            RunFailure::StepBoundExceeded(_) => "step_bound_exceeded",
        }
    }

    pub fn user_message(&self) -> String {
        match &self.failure {
            RunFailure::Model(LlmError::Auth(_)) => {
                "Your OpenAI API key was rejected. Please check it and try again.".to_string()
            }
            RunFailure::Model(LlmError::RateLimited) => {
                "The model provider is rate limiting requests. Please wait a moment and try again."
                    .to_string()
            }
            RunFailure::Model(_) => {
                "The language model could not be reached. Please try again.".to_string()
            }
            RunFailure::Tool(err) => err.user_message(),
            RunFailure::StepBoundExceeded(steps) => format!(
                "I couldn't finish answering within {steps} steps. Please try rephrasing your question."
            ),
        }
    }
}

//! Ordered event channel between a running agent and its consumer.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::session::Trace;

/// Incremental progress of an agent run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A chunk of model output.
    Token { text: String },
    /// A tool is about to run.
    ToolCallStarted { name: String, input: String },
    /// A tool returned.
    ToolCallFinished { name: String, output: String },
    /// The run produced its answer.
    FinalAnswer { text: String },
    /// The run failed. Emitted by the transport layer, never by the loop.
    Error {
        kind: String,
        message: String,
        trace: Trace,
    },
}

impl AgentEvent {
    /// Name used for the SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            AgentEvent::Token { .. } => "token",
            AgentEvent::ToolCallStarted { .. } => "tool_call_started",
            AgentEvent::ToolCallFinished { .. } => "tool_call_finished",
            AgentEvent::FinalAnswer { .. } => "final_answer",
            AgentEvent::Error { .. } => "error",
        }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

/// Producer half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

/// Create a single-consumer event channel.
pub fn event_channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

impl EventSink {
    /// Send an event. A consumer that went away is not an error.
    pub fn emit(&self, event: AgentEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(event = %e.0.event_name(), "Event consumer gone; dropping");
        }
    }

    pub fn token(&self, text: impl Into<String>) {
        self.emit(AgentEvent::Token { text: text.into() });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

//! Per-visit conversation state: history plus the tool trace of each answer.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::history::{MessageHistory, Role};
use crate::tools::{ToolCall, ToolResult};

/// One tool invocation made while producing an answer.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub call: ToolCall,
    /// `None` only in the partial trace of a failed run.
    pub result: Option<ToolResult>,
}

/// Ordered record of the tool invocations behind one assistant message.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Trace {
    steps: Vec<TraceStep>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call that is about to run.
    pub fn begin(&mut self, call: ToolCall) {
        self.steps.push(TraceStep { call, result: None });
    }

    /// Pair the most recent unpaired call with its result.
    pub fn complete(&mut self, result: ToolResult) {
        match self.steps.last_mut() {
            Some(step) if step.result.is_none() => step.result = Some(result),
            _ => tracing::warn!(tool = %result.tool_name, "Tool result without a pending call"),
        }
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Whether every call has its result.
    pub fn is_paired(&self) -> bool {
        self.steps.iter().all(|s| s.result.is_some())
    }
}

/// Conversation history and traces for one browser session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    greeting: String,
    history: MessageHistory,
    traces: BTreeMap<u64, Trace>,
}

impl Session {
    /// Create a session seeded with the assistant greeting.
    pub fn new(greeting: impl Into<String>) -> Self {
        let mut session = Self {
            id: Uuid::new_v4(),
            greeting: greeting.into(),
            history: MessageHistory::new(),
            traces: BTreeMap::new(),
        };
        session.reset();
        session
    }

    /// Drop all turns and traces, leaving only the seed greeting.
    pub fn reset(&mut self) {
        self.history.clear();
        self.history.append(Role::Assistant, self.greeting.clone());
        self.traces.clear();
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    pub fn traces(&self) -> &BTreeMap<u64, Trace> {
        &self.traces
    }

    pub fn trace_for(&self, ordinal: u64) -> Option<&Trace> {
        self.traces.get(&ordinal)
    }

    /// Store a completed turn. Returns the ordinal of the assistant message.
    pub fn record_turn(&mut self, input: &str, answer: &str, trace: Trace) -> u64 {
        self.history.append(Role::Human, input);
        let ordinal = self.history.append(Role::Assistant, answer);
        self.traces.insert(ordinal, trace);
        ordinal
    }
}

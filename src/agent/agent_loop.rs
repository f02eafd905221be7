//! Core agent loop implementation.

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::events::{AgentEvent, EventSink};
use crate::session::{Session, Trace};
use crate::tools::ToolRegistry;

use super::error::{AgentLoopError, RunFailure};
use super::policy::{Action, AgentPolicy, ScratchpadEntry, Turn};

/// Answer used when the model keeps replying with unparseable blank output.
pub const FALLBACK_ANSWER: &str =
    "I'm sorry, I couldn't put together a proper answer. Could you rephrase your question?";

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Thinking,
    Calling,
    Done,
    Failed,
}

/// Result of a run that reached `Done`.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub answer: String,
    /// Ordinal of the assistant message holding the answer.
    pub ordinal: u64,
    pub trace: Trace,
    /// Number of decide steps taken.
    pub steps: usize,
}

/// Drives an [`AgentPolicy`] to an answer, one tool call at a time.
pub struct AgentExecutor {
    policy: Arc<dyn AgentPolicy>,
    tools: Arc<ToolRegistry>,
    max_steps: usize,
    parse_retries: usize,
}

impl AgentExecutor {
    pub fn new(policy: Arc<dyn AgentPolicy>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            policy,
            tools,
            max_steps: 15,
            parse_retries: 1,
        }
    }

    pub fn from_config(
        policy: Arc<dyn AgentPolicy>,
        tools: Arc<ToolRegistry>,
        config: &Config,
    ) -> Self {
        Self::new(policy, tools)
            .with_max_steps(config.max_iterations)
            .with_parse_retries(config.parse_retries)
    }

    /// Upper bound on decide steps per run. Clamped to at least one.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_parse_retries(mut self, parse_retries: usize) -> Self {
        self.parse_retries = parse_retries;
        self
    }

    /// Answer `input` in the context of `session`.
    ///
    /// On success the human input and the answer are appended to the
    /// session history and the trace is stored under the answer's ordinal.
    /// On failure the session is left untouched and the partial trace is
    /// returned inside the error.
    pub async fn run(
        &self,
        session: &mut Session,
        input: &str,
        sink: &EventSink,
    ) -> Result<RunOutcome, AgentLoopError> {
        let span = tracing::info_span!("agent_run", run_id = %Uuid::new_v4(), session_id = %session.id);
        self.drive(session, input, sink).instrument(span).await
    }

    async fn drive(
        &self,
        session: &mut Session,
        input: &str,
        sink: &EventSink,
    ) -> Result<RunOutcome, AgentLoopError> {
        let tools = self.tools.descriptors();
        let mut scratchpad: Vec<ScratchpadEntry> = Vec::new();
        let mut trace = Trace::new();
        let mut rejected = 0usize;
        let mut state = RunState::Thinking;

        tracing::info!(input_len = input.len(), max_steps = self.max_steps, "Agent run started");

        for step in 1..=self.max_steps {
            transition(&mut state, RunState::Thinking, step);

            let turn = Turn {
                history: session.history().all(),
                input,
                tools: &tools,
                scratchpad: &scratchpad,
            };
            let action = match self.policy.decide(&turn, sink).await {
                Ok(action) => action,
                Err(e) => return Err(fail(&mut state, step, e.into(), trace)),
            };

            match action {
                Action::Respond(answer) => {
                    return Ok(finish(&mut state, session, input, answer, trace, sink, step));
                }
                Action::Invoke(mut call) => {
                    transition(&mut state, RunState::Calling, step);

                    let tool = match self.tools.resolve(&call.tool_name) {
                        Ok(tool) => tool,
                        Err(e) => {
                            trace.begin(call);
                            return Err(fail(&mut state, step, e.into(), trace));
                        }
                    };
                    call.tool_name = tool.name().to_string();

                    sink.emit(AgentEvent::ToolCallStarted {
                        name: call.tool_name.clone(),
                        input: call.tool_input.clone(),
                    });
                    trace.begin(call.clone());

                    let result = match self.tools.invoke(&call.tool_name, &call.tool_input).await {
                        Ok(result) => result,
                        Err(e) => return Err(fail(&mut state, step, e.into(), trace)),
                    };
                    tracing::debug!(
                        step,
                        tool = %result.tool_name,
                        output = %truncate_for_log(&result.output, 200),
                        "Tool result"
                    );

                    sink.emit(AgentEvent::ToolCallFinished {
                        name: result.tool_name.clone(),
                        output: result.output.clone(),
                    });
                    trace.complete(result.clone());
                    scratchpad.push(ScratchpadEntry::Tool { call, result });
                }
                Action::ParseError { raw, reason } => {
                    rejected += 1;
                    tracing::warn!(step, rejected, reason = %reason, "Model reply did not parse");

                    if rejected > self.parse_retries {
                        let answer = if raw.trim().is_empty() {
                            FALLBACK_ANSWER.to_string()
                        } else {
                            raw.trim().to_string()
                        };
                        return Ok(finish(&mut state, session, input, answer, trace, sink, step));
                    }
                    scratchpad.push(ScratchpadEntry::Rejected { raw, reason });
                }
            }
        }

        Err(fail(
            &mut state,
            self.max_steps,
            RunFailure::StepBoundExceeded(self.max_steps),
            trace,
        ))
    }
}

fn transition(state: &mut RunState, next: RunState, step: usize) {
    if *state != next {
        tracing::trace!(step, from = ?*state, to = ?next, "Run state changed");
    }
    *state = next;
}

fn finish(
    state: &mut RunState,
    session: &mut Session,
    input: &str,
    answer: String,
    trace: Trace,
    sink: &EventSink,
    steps: usize,
) -> RunOutcome {
    transition(state, RunState::Done, steps);
    let ordinal = session.record_turn(input, &answer, trace.clone());
    sink.emit(AgentEvent::FinalAnswer {
        text: answer.clone(),
    });
    tracing::info!(steps, tool_calls = trace.len(), ordinal, "Agent run completed");

    RunOutcome {
        answer,
        ordinal,
        trace,
        steps,
    }
}

fn fail(state: &mut RunState, step: usize, failure: RunFailure, trace: Trace) -> AgentLoopError {
    transition(state, RunState::Failed, step);
    let err = AgentLoopError::new(failure, trace);
    tracing::warn!(step, kind = err.kind(), error = %err, "Agent run failed");
    err
}

/// Truncate a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_channel, EventReceiver};
    use crate::history::Role;
    use crate::llm::LlmError;
    use crate::tools::{Tool, ToolCall, ToolError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct StubSearch;

    #[async_trait]
    impl Tool for StubSearch {
        fn name(&self) -> &str {
            "Search"
        }

        fn description(&self) -> &str {
            "Stub search."
        }

        async fn execute(&self, input: &str) -> anyhow::Result<String> {
            Ok(format!("results for {input}"))
        }
    }

    struct HangingSearch;

    #[async_trait]
    impl Tool for HangingSearch {
        fn name(&self) -> &str {
            "Search"
        }

        fn description(&self) -> &str {
            "Never returns."
        }

        async fn execute(&self, _input: &str) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    struct BrokenSearch;

    #[async_trait]
    impl Tool for BrokenSearch {
        fn name(&self) -> &str {
            "Search"
        }

        fn description(&self) -> &str {
            "Always fails."
        }

        async fn execute(&self, _input: &str) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("backend returned 503"))
        }
    }

    /// Returns queued actions in order, then keeps answering "done".
    struct ScriptedPolicy {
        actions: Mutex<VecDeque<Result<Action, LlmError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedPolicy {
        fn new(actions: Vec<Result<Action, LlmError>>) -> Self {
            Self {
                actions: Mutex::new(actions.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AgentPolicy for ScriptedPolicy {
        async fn decide(&self, _turn: &Turn<'_>, _sink: &EventSink) -> Result<Action, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.actions
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(Action::Respond("done".into())))
        }
    }

    struct AlwaysInvoke {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentPolicy for AlwaysInvoke {
        async fn decide(&self, turn: &Turn<'_>, _sink: &EventSink) -> Result<Action, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Action::Invoke(search(&format!("attempt {}", turn.scratchpad.len()))))
        }
    }

    /// Records the scratchpad length seen at each decision.
    struct ScratchpadRecorder {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl AgentPolicy for ScratchpadRecorder {
        async fn decide(&self, turn: &Turn<'_>, _sink: &EventSink) -> Result<Action, LlmError> {
            let mut seen = self.seen.lock().await;
            seen.push(turn.scratchpad.len());
            Ok(match seen.len() {
                1 => Action::Invoke(search("first")),
                2 => Action::Invoke(search("second")),
                _ => Action::Respond(format!("history had {} messages", turn.history.len())),
            })
        }
    }

    fn search(input: &str) -> ToolCall {
        ToolCall {
            tool_name: "Search".into(),
            tool_input: input.into(),
            log: format!("looking up {input}"),
        }
    }

    fn registry_with(tool: Arc<dyn Tool>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new(Duration::from_millis(50));
        registry.register(tool);
        Arc::new(registry)
    }

    fn executor(policy: Arc<dyn AgentPolicy>) -> AgentExecutor {
        AgentExecutor::new(policy, registry_with(Arc::new(StubSearch)))
    }

    async fn drain(sink: EventSink, mut rx: EventReceiver) -> Vec<AgentEvent> {
        drop(sink);
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn search_then_respond_emits_events_in_order() {
        let policy = Arc::new(ScriptedPolicy::new(vec![
            Ok(Action::Invoke(search("X"))),
            Ok(Action::Respond("Y".into())),
        ]));
        let mut session = Session::new("How can I help you?");
        let (sink, rx) = event_channel();

        let outcome = executor(policy)
            .run(&mut session, "question", &sink)
            .await
            .expect("run succeeds");
        let events = drain(sink, rx).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            AgentEvent::ToolCallStarted { name, input } if name == "Search" && input == "X"
        ));
        assert!(matches!(
            &events[1],
            AgentEvent::ToolCallFinished { name, output } if name == "Search" && output == "results for X"
        ));
        assert!(matches!(&events[2], AgentEvent::FinalAnswer { text } if text == "Y"));

        assert_eq!(outcome.answer, "Y");
        assert_eq!(outcome.steps, 2);
        assert_eq!(outcome.trace.len(), 1);
        assert!(outcome.trace.is_paired());
        assert_eq!(outcome.ordinal, 2);
        assert_eq!(session.trace_for(outcome.ordinal).map(Trace::len), Some(1));
    }

    #[tokio::test]
    async fn turns_without_tools_grow_history_by_two() {
        let policy = Arc::new(ScriptedPolicy::new(Vec::new()));
        let executor = executor(policy);
        let mut session = Session::new("How can I help you?");

        for n in 1..=4 {
            let (sink, _rx) = event_channel();
            executor
                .run(&mut session, &format!("turn {n}"), &sink)
                .await
                .expect("run succeeds");
            assert_eq!(session.history().len(), 2 * n + 1);
        }

        let messages = session.history().all();
        assert!(messages.windows(2).all(|w| w[0].ordinal < w[1].ordinal));
        assert_eq!(messages[1].role, Role::Human);
        assert_eq!(messages[2].role, Role::Assistant);
        assert!(session.traces().values().all(Trace::is_empty));
    }

    #[tokio::test]
    async fn always_invoking_policy_stops_at_step_bound() {
        let policy = Arc::new(AlwaysInvoke {
            calls: AtomicUsize::new(0),
        });
        let executor = executor(policy.clone()).with_max_steps(4);
        let mut session = Session::new("hi");
        let (sink, _rx) = event_channel();

        let err = executor.run(&mut session, "loop forever", &sink).await.unwrap_err();

        assert!(matches!(err.failure, RunFailure::StepBoundExceeded(4)));
        assert_eq!(err.kind(), "step_bound_exceeded");
        assert_eq!(policy.calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.trace.len(), 4);
        assert!(err.trace.is_paired());
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn default_step_bound_is_fifteen() {
        let policy = Arc::new(AlwaysInvoke {
            calls: AtomicUsize::new(0),
        });
        let executor = executor(policy.clone());
        let mut session = Session::new("hi");
        let (sink, _rx) = event_channel();

        let err = executor.run(&mut session, "loop", &sink).await.unwrap_err();
        assert!(matches!(err.failure, RunFailure::StepBoundExceeded(15)));
        assert_eq!(policy.calls.load(Ordering::SeqCst), 15);
    }

    #[tokio::test]
    async fn tool_timeout_leaves_unpaired_call() {
        let policy = Arc::new(ScriptedPolicy::new(vec![Ok(Action::Invoke(search("slow")))]));
        let executor = AgentExecutor::new(policy, registry_with(Arc::new(HangingSearch)));
        let mut session = Session::new("hi");
        let (sink, rx) = event_channel();

        let err = executor.run(&mut session, "q", &sink).await.unwrap_err();
        let events = drain(sink, rx).await;

        assert_eq!(err.kind(), "tool_timeout");
        assert_eq!(err.trace.len(), 1);
        assert_eq!(err.trace.steps()[0].call.tool_input, "slow");
        assert!(err.trace.steps()[0].result.is_none());
        assert_ne!(err.kind(), "auth_error");
        assert!(!err.user_message().contains("API key"));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentEvent::ToolCallStarted { .. }));
        assert_eq!(session.history().len(), 1);
        assert!(session.traces().is_empty());
    }

    #[tokio::test]
    async fn failing_tool_keeps_partial_trace() {
        let policy = Arc::new(ScriptedPolicy::new(vec![Ok(Action::Invoke(search("score")))]));
        let executor = AgentExecutor::new(policy, registry_with(Arc::new(BrokenSearch)));
        let mut session = Session::new("hi");
        session.record_turn("earlier", "answer", Trace::new());
        let (sink, rx) = event_channel();

        let err = executor.run(&mut session, "q", &sink).await.unwrap_err();
        let events = drain(sink, rx).await;

        assert_eq!(err.kind(), "tool_error");
        assert!(matches!(err.failure, RunFailure::Tool(ToolError::Execution { .. })));
        let last = err.trace.steps().last().expect("attempted call recorded");
        assert_eq!(last.call.tool_input, "score");
        assert!(last.result.is_none());
        assert!(!err.user_message().contains("API key"));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentEvent::ToolCallStarted { .. }));
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.traces().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_fails_closed() {
        let policy = Arc::new(ScriptedPolicy::new(vec![Ok(Action::Invoke(ToolCall {
            tool_name: "Calculator".into(),
            tool_input: "2+2".into(),
            log: String::new(),
        }))]));
        let mut session = Session::new("hi");
        let (sink, rx) = event_channel();

        let err = executor(policy).run(&mut session, "q", &sink).await.unwrap_err();
        let events = drain(sink, rx).await;

        assert_eq!(err.kind(), "tool_not_found");
        assert_eq!(err.trace.steps()[0].call.tool_name, "Calculator");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn parse_error_is_retried_once() {
        let policy = Arc::new(ScriptedPolicy::new(vec![
            Ok(Action::ParseError {
                raw: "not json".into(),
                reason: "no JSON".into(),
            }),
            Ok(Action::Respond("fixed".into())),
        ]));
        let mut session = Session::new("hi");
        let (sink, _rx) = event_channel();

        let outcome = executor(policy.clone())
            .run(&mut session, "q", &sink)
            .await
            .expect("run succeeds");

        assert_eq!(outcome.answer, "fixed");
        assert_eq!(outcome.steps, 2);
        assert!(outcome.trace.is_empty());
        assert_eq!(policy.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_parse_errors_surface_raw_text() {
        let policy = Arc::new(ScriptedPolicy::new(vec![
            Ok(Action::ParseError {
                raw: "first".into(),
                reason: "no JSON".into(),
            }),
            Ok(Action::ParseError {
                raw: "  The answer is 42.  ".into(),
                reason: "no JSON".into(),
            }),
        ]));
        let mut session = Session::new("hi");
        let (sink, rx) = event_channel();

        let outcome = executor(policy)
            .run(&mut session, "q", &sink)
            .await
            .expect("degrades to an answer");
        let events = drain(sink, rx).await;

        assert_eq!(outcome.answer, "The answer is 42.");
        assert!(matches!(events.last(), Some(AgentEvent::FinalAnswer { text }) if text == "The answer is 42."));
        assert_eq!(session.history().last().map(|m| m.content.as_str()), Some("The answer is 42."));
    }

    #[tokio::test]
    async fn blank_unparseable_reply_uses_fallback_answer() {
        let policy = Arc::new(ScriptedPolicy::new(vec![Ok(Action::ParseError {
            raw: "   ".into(),
            reason: "no JSON".into(),
        })]));
        let executor = executor(policy).with_parse_retries(0);
        let mut session = Session::new("hi");
        let (sink, _rx) = event_channel();

        let outcome = executor.run(&mut session, "q", &sink).await.expect("degrades");
        assert_eq!(outcome.answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn model_auth_error_keeps_history_intact() {
        let policy = Arc::new(ScriptedPolicy::new(vec![
            Ok(Action::Invoke(search("a"))),
            Err(LlmError::Auth("bad key".into())),
        ]));
        let mut session = Session::new("hi");
        session.record_turn("earlier", "answer", Trace::new());
        let (sink, _rx) = event_channel();

        let err = executor(policy).run(&mut session, "q", &sink).await.unwrap_err();

        assert_eq!(err.kind(), "auth_error");
        assert!(err.user_message().contains("API key"));
        assert_eq!(err.trace.len(), 1);
        assert!(err.trace.is_paired());
        assert_eq!(session.history().len(), 3);
        assert_eq!(session.traces().len(), 1);
    }

    #[tokio::test]
    async fn scratchpad_accumulates_within_a_turn() {
        let recorder = Arc::new(ScratchpadRecorder {
            seen: Mutex::new(Vec::new()),
        });
        let mut session = Session::new("hi");
        let (sink, _rx) = event_channel();

        let outcome = executor(recorder.clone())
            .run(&mut session, "q", &sink)
            .await
            .expect("run succeeds");

        assert_eq!(*recorder.seen.lock().await, vec![0, 1, 2]);
        assert_eq!(outcome.answer, "history had 1 messages");
        assert_eq!(outcome.trace.len(), 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "héllo wörld";
        let out = truncate_for_log(s, 2);
        assert!(out.starts_with('h'));
        assert!(out.ends_with("[truncated]"));
    }
}

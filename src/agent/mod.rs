//! Agent module - the conversational tool-using agent.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Build context with system prompt, history and the user input
//! 2. Ask the policy for the next action
//! 3. If the action is a tool call, execute it and feed the result back
//! 4. Repeat until the policy produces a final answer or the step bound is hit

mod agent_loop;
mod error;
mod parser;
mod policy;
mod prompt;

pub use agent_loop::{AgentExecutor, RunOutcome, RunState, FALLBACK_ANSWER};
pub use error::{AgentLoopError, RunFailure};
pub use parser::{parse_action, FINAL_ANSWER};
pub use policy::{Action, AgentPolicy, LlmPolicy, ScratchpadEntry, Turn};
pub use prompt::build_system_prompt;

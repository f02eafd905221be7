//! Prompt templates for the conversational agent.

use crate::history::Role as HistoryRole;
use crate::llm::ChatMessage;
use crate::tools::ToolDescriptor;

use super::parser::FINAL_ANSWER;
use super::policy::{ScratchpadEntry, Turn};

/// Build the system prompt with tool definitions.
pub fn build_system_prompt(tools: &[ToolDescriptor]) -> String {
    let tool_descriptions = tools
        .iter()
        .map(|t| format!("> {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    let tool_names = tools
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are a helpful assistant chatting with a user. You can hold a natural conversation, explain things in depth, and answer questions on a wide range of topics. When a question depends on recent events or facts you are not sure about, use a tool instead of guessing.

## Tools

{tool_descriptions}

## Response Format

Every reply MUST be a markdown code snippet containing a single JSON object, and nothing else. Use one of two shapes.

To use a tool:

```json
{{
    "action": string, // one of: {tool_names}
    "action_input": string // the input to the tool
}}
```

To reply to the user:

```json
{{
    "action": "{FINAL_ANSWER}",
    "action_input": string // your full answer to the user
}}
```"#,
    )
}

const FORMAT_REMINDER: &str =
    "Remember to reply with a markdown code snippet of a JSON object with a single action, and NOTHING else.";

/// Render history, the new input and the scratchpad as chat messages.
pub fn render_messages(system_prompt: &str, turn: &Turn<'_>) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turn.history.len() + turn.scratchpad.len() * 2 + 2);
    messages.push(ChatMessage::system(system_prompt));

    for message in turn.history {
        messages.push(match message.role {
            HistoryRole::Human => ChatMessage::user(message.content.clone()),
            HistoryRole::Assistant => ChatMessage::assistant(message.content.clone()),
        });
    }

    messages.push(ChatMessage::user(format!("{}\n\n{}", turn.input, FORMAT_REMINDER)));

    for entry in turn.scratchpad {
        match entry {
            ScratchpadEntry::Tool { call, result } => {
                messages.push(ChatMessage::assistant(call.log.clone()));
                messages.push(ChatMessage::user(format!(
                    "TOOL RESPONSE ({}):\n---------------------\n{}\n\nUsing the tool response above, reply to my last message. Mention the information you found without naming the tool. {}",
                    result.tool_name, result.output, FORMAT_REMINDER
                )));
            }
            ScratchpadEntry::Rejected { raw, reason } => {
                messages.push(ChatMessage::assistant(raw.clone()));
                messages.push(ChatMessage::user(format!(
                    "Your last reply could not be understood ({}). {}",
                    reason, FORMAT_REMINDER
                )));
            }
        }
    }

    messages
}

//! Turns a model reply into an [`Action`].
//!
//! Expected grammar: a JSON object, optionally inside a ```json fence, of the
//! form `{"action": "<tool name>" | "Final Answer", "action_input": "..."}`.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::policy::Action;
use crate::tools::ToolCall;

/// Action name that ends the turn.
pub const FINAL_ANSWER: &str = "Final Answer";

pub fn parse_action(text: &str) -> Action {
    let Some(value) = extract_json(text) else {
        return rejected(text, "reply did not contain a JSON object");
    };

    let Value::Object(map) = value else {
        return rejected(text, "reply JSON was not an object");
    };

    let Some(action) = map.get("action").and_then(Value::as_str) else {
        return rejected(text, "missing \"action\" field");
    };

    let input = match map.get("action_input") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => return rejected(text, "missing \"action_input\" field"),
        Some(other) => other.to_string(),
    };

    let action = action.trim();
    if action.eq_ignore_ascii_case(FINAL_ANSWER) {
        return Action::Respond(input);
    }

    // Any surrounding prose is the rationale for the call.
    Action::Invoke(ToolCall {
        tool_name: action.to_string(),
        tool_input: input,
        log: text.trim().to_string(),
    })
}

fn rejected(text: &str, reason: &str) -> Action {
    Action::ParseError {
        raw: text.to_string(),
        reason: reason.to_string(),
    }
}

fn fenced_block() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?i:json)?\s*(\{.*?\})\s*```").expect("fence pattern is valid")
    })
}

/// Find the action blob. Objects carrying an `action` field win over any
/// other JSON the reply happens to contain.
fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let fenced = fenced_block()
        .captures_iter(trimmed)
        .filter_map(|captures| captures.get(1))
        .filter_map(|block| serde_json::from_str::<Value>(block.as_str()).ok());

    let mut fallback = None;
    for value in fenced.chain(embedded_objects(trimmed)) {
        if value.get("action").is_some() {
            return Some(value);
        }
        fallback.get_or_insert(value);
    }
    fallback
}

/// Every JSON object that starts at a `{` in `text`, in order of position.
/// Trailing prose after an object does not stop it from parsing.
fn embedded_objects(text: &str) -> impl Iterator<Item = Value> + '_ {
    text.match_indices('{').filter_map(move |(start, _)| {
        serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<Value>()
            .next()?
            .ok()
            .filter(Value::is_object)
    })
}

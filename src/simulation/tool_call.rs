//! Parsing of raw agent output into a reply or a tool call.
//!
//! A tool call is a JSON object `{"name": ..., "arguments": {...}}`, found in
//! a ```` ```json ```` fence, a bare fence, or inline. A ```` ```json ````
//! fence is a commitment to call a tool: if its body does not parse, the
//! output is a protocol violation. Only the first call is honoured.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ProtocolViolation;
use crate::utils::json_extraction::{extract_json_object, fenced_blocks};

/// What the agent decided to do this step.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    /// A user-facing message. Control returns to the user.
    Reply(String),
    /// A request to execute one tool.
    ToolCall {
        /// Full raw output, kept for the transcript.
        content: String,
        name: String,
        arguments: Value,
    },
}

/// Candidate object carrying a `name` key, or a hard violation.
fn as_call(value: Value) -> Result<Option<(String, Value)>, ProtocolViolation> {
    let object = match value {
        Value::Object(obj) => obj,
        // An array of calls: only the first one counts.
        Value::Array(items) => match items.into_iter().find(|v| v.get("name").is_some()) {
            Some(Value::Object(obj)) => obj,
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };

    let Some(name) = object.get("name") else {
        return Ok(None);
    };
    let name = match name.as_str().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        Some(_) => return Err(ProtocolViolation::UnparseableToolCall("empty tool name".into())),
        None => return Err(ProtocolViolation::UnparseableToolCall("tool name is not a string".into())),
    };

    let arguments = match object.get("arguments") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(args)) => Value::Object(args.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            // Some models send arguments as a JSON-encoded string.
            Ok(Value::Object(args)) => Value::Object(args),
            _ => {
                return Err(ProtocolViolation::UnparseableToolCall(
                    "arguments must be an object".into(),
                ))
            }
        },
        Some(_) => {
            return Err(ProtocolViolation::UnparseableToolCall(
                "arguments must be an object".into(),
            ))
        }
    };

    Ok(Some((name, arguments)))
}

/// Interprets one agent output.
pub fn parse_agent_output(raw: &str) -> Result<AgentAction, ProtocolViolation> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProtocolViolation::EmptyOutput { role: "agent" });
    }

    let blocks = fenced_blocks(trimmed);
    let mut calls = Vec::new();

    for block in &blocks {
        match serde_json::from_str::<Value>(&block.body) {
            Ok(value) => {
                if let Some(call) = as_call(value)? {
                    calls.push(call);
                } else if block.is_json() {
                    return Err(ProtocolViolation::MissingField("name"));
                }
            }
            Err(e) if block.is_json() => {
                return Err(ProtocolViolation::UnparseableToolCall(e.to_string()));
            }
            // Bare fences may hold ordinary code in a reply.
            Err(_) => {}
        }
    }

    if calls.is_empty() && blocks.is_empty() {
        if let Ok(value) = extract_json_object(trimmed) {
            if let Some(call) = as_call(value)? {
                calls.push(call);
            }
        }
    }

    if calls.len() > 1 {
        debug!(count = calls.len(), "Agent emitted several tool calls, honouring the first");
    }

    match calls.into_iter().next() {
        Some((name, arguments)) => Ok(AgentAction::ToolCall {
            content: trimmed.to_string(),
            name,
            arguments,
        }),
        None => Ok(AgentAction::Reply(trimmed.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_parts(action: AgentAction) -> (String, Value) {
        match action {
            AgentAction::ToolCall {
                name, arguments, ..
            } => (name, arguments),
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_reply() {
        let action = parse_agent_output("Which city are you flying from?").unwrap();
        assert_eq!(
            action,
            AgentAction::Reply("Which city are you flying from?".into())
        );
    }

    #[test]
    fn test_json_fenced_call() {
        let raw = "```json\n{\"name\": \"search_flights\", \"arguments\": {\"origin\": \"LIS\"}}\n```";
        let (name, args) = call_parts(parse_agent_output(raw).unwrap());
        assert_eq!(name, "search_flights");
        assert_eq!(args, json!({"origin": "LIS"}));
    }

    #[test]
    fn test_inline_call_without_arguments() {
        let (name, args) = call_parts(parse_agent_output(r#"{"name": "list_orders"}"#).unwrap());
        assert_eq!(name, "list_orders");
        assert_eq!(args, json!({}));
    }

    #[test]
    fn test_string_encoded_arguments() {
        let raw = r#"{"name": "get_weather", "arguments": "{\"city\": \"Porto\"}"}"#;
        let (_, args) = call_parts(parse_agent_output(raw).unwrap());
        assert_eq!(args["city"], "Porto");
    }

    #[test]
    fn test_first_of_several_calls_wins() {
        let raw = "```json\n{\"name\": \"a\", \"arguments\": {}}\n```\n```json\n{\"name\": \"b\", \"arguments\": {}}\n```";
        let (name, _) = call_parts(parse_agent_output(raw).unwrap());
        assert_eq!(name, "a");
    }

    #[test]
    fn test_broken_json_fence_is_violation() {
        let raw = "```json\n{\"name\": \"search\", \"arguments\": {\n```";
        assert!(matches!(
            parse_agent_output(raw),
            Err(ProtocolViolation::UnparseableToolCall(_))
        ));
    }

    #[test]
    fn test_json_fence_without_name_is_violation() {
        let raw = "```json\n{\"arguments\": {}}\n```";
        assert_eq!(
            parse_agent_output(raw),
            Err(ProtocolViolation::MissingField("name"))
        );
    }

    #[test]
    fn test_non_object_arguments_is_violation() {
        let raw = r#"{"name": "search", "arguments": [1, 2]}"#;
        assert!(matches!(
            parse_agent_output(raw),
            Err(ProtocolViolation::UnparseableToolCall(_))
        ));
    }

    #[test]
    fn test_empty_output_is_violation() {
        assert_eq!(
            parse_agent_output("  \n "),
            Err(ProtocolViolation::EmptyOutput { role: "agent" })
        );
    }

    #[test]
    fn test_code_in_bare_fence_is_a_reply() {
        let raw = "Run this:\n```\nls -la\n```";
        assert!(matches!(
            parse_agent_output(raw).unwrap(),
            AgentAction::Reply(_)
        ));
    }

    #[test]
    fn test_prose_with_json_without_name_is_a_reply() {
        let raw = r#"Your booking is {"status": "confirmed"}."#;
        assert!(matches!(
            parse_agent_output(raw).unwrap(),
            AgentAction::Reply(_)
        ));
    }
}

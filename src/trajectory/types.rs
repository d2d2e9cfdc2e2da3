//! Trajectory data types for simulated multi-turn conversations.
//!
//! A trajectory is an append-only, ordered list of [`Message`]s. Each
//! message carries exactly one [`MessagePayload`] variant, so the set of
//! legal role/payload combinations is fixed by the type system.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::Usage;

/// Namespace for deterministic trajectory ids.
const TRAJECTORY_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_3c2e_8d4a_4f0b_9e51_27c6_d0a3_f812);

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Structured tool-call request issued by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique within the trajectory, e.g. `call-3`.
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Outcome class of a simulated tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success,
    PartialFailure,
    Failure,
}

impl ToolOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolOutcome::Success => "success",
            ToolOutcome::PartialFailure => "partial_failure",
            ToolOutcome::Failure => "failure",
        }
    }
}

impl fmt::Display for ToolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error attached to failed or partially failed results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolErrorPayload {
    pub error_type: String,
    pub message: String,
}

/// Simulated result of one tool call. Failures are ordinary data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Matches the [`ToolCall::call_id`] this answers.
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorPayload>,
}

impl ToolResult {
    /// JSON text shown to the agent as the execution observation.
    pub fn observation(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("tool_name".into(), Value::String(self.tool_name.clone()));
        obj.insert("status".into(), Value::String(self.outcome.as_str().into()));
        obj.insert("result".into(), self.payload.clone());
        if let Some(err) = &self.error {
            obj.insert(
                "error".into(),
                serde_json::json!({"type": err.error_type, "message": err.message}),
            );
        }
        Value::Object(obj).to_string()
    }
}

/// The fixed set of role/payload combinations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    User { content: String },
    AgentReply { content: String },
    AgentToolCall { content: String, call: ToolCall },
    ToolResult { result: ToolResult },
}

impl MessagePayload {
    pub fn role(&self) -> Role {
        match self {
            MessagePayload::User { .. } => Role::User,
            MessagePayload::AgentReply { .. } | MessagePayload::AgentToolCall { .. } => {
                Role::Agent
            }
            MessagePayload::ToolResult { .. } => Role::Tool,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MessagePayload::User { .. } => "user",
            MessagePayload::AgentReply { .. } => "agent_reply",
            MessagePayload::AgentToolCall { .. } => "agent_tool_call",
            MessagePayload::ToolResult { .. } => "tool_result",
        }
    }
}

/// One entry in a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Ordinal of the user turn this message belongs to (1-based).
    pub turn_index: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl Message {
    pub fn new(turn_index: u32, payload: MessagePayload) -> Self {
        Self {
            role: payload.role(),
            turn_index,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn user(turn_index: u32, content: impl Into<String>) -> Self {
        Self::new(
            turn_index,
            MessagePayload::User {
                content: content.into(),
            },
        )
    }

    pub fn agent_reply(turn_index: u32, content: impl Into<String>) -> Self {
        Self::new(
            turn_index,
            MessagePayload::AgentReply {
                content: content.into(),
            },
        )
    }

    pub fn agent_tool_call(turn_index: u32, content: impl Into<String>, call: ToolCall) -> Self {
        Self::new(
            turn_index,
            MessagePayload::AgentToolCall {
                content: content.into(),
                call,
            },
        )
    }

    pub fn tool_result(turn_index: u32, result: ToolResult) -> Self {
        Self::new(turn_index, MessagePayload::ToolResult { result })
    }

    /// Text content. Tool results render as their observation JSON.
    pub fn text(&self) -> String {
        match &self.payload {
            MessagePayload::User { content }
            | MessagePayload::AgentReply { content }
            | MessagePayload::AgentToolCall { content, .. } => content.clone(),
            MessagePayload::ToolResult { result } => result.observation(),
        }
    }

    pub fn tool_call(&self) -> Option<&ToolCall> {
        match &self.payload {
            MessagePayload::AgentToolCall { call, .. } => Some(call),
            _ => None,
        }
    }

    pub fn tool_result_ref(&self) -> Option<&ToolResult> {
        match &self.payload {
            MessagePayload::ToolResult { result } => Some(result),
            _ => None,
        }
    }
}

/// Why a rollout ended. Exactly one per trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    GoalReached,
    MaxTurns,
    ProtocolViolation,
    FatalError,
}

impl TerminationReason {
    pub const ALL: [TerminationReason; 4] = [
        TerminationReason::GoalReached,
        TerminationReason::MaxTurns,
        TerminationReason::ProtocolViolation,
        TerminationReason::FatalError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::GoalReached => "goal_reached",
            TerminationReason::MaxTurns => "max_turns",
            TerminationReason::ProtocolViolation => "protocol_violation",
            TerminationReason::FatalError => "fatal_error",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage summed over every model call of a rollout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Number of model calls that reported usage.
    pub calls: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            calls: 0,
        }
    }

    /// Adds the usage of a single response.
    pub fn record(&mut self, usage: &Usage) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total_tokens);
        self.calls += 1;
    }

    /// Adds another TokenUsage to this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.calls += other.calls;
    }
}

/// A completed rollout. Immutable after termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub id: Uuid,
    pub task_id: String,
    pub agent_id: String,
    pub persona_id: String,
    pub attempt: u32,
    pub messages: Vec<Message>,
    pub termination: TerminationReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_detail: Option<String>,
    /// Number of user messages, the sentinel message included.
    pub turn_count: u32,
    pub tool_call_count: u32,
    /// Calls per tool name, copied from the tool state at termination.
    #[serde(default)]
    pub tool_usage: BTreeMap<String, u32>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Trajectory {
    /// Deterministic id for a (task, agent, attempt) combination.
    pub fn derive_id(task_id: &str, agent_id: &str, attempt: u32) -> Uuid {
        let name = format!("{task_id}:{agent_id}:{attempt}");
        Uuid::new_v5(&TRAJECTORY_NAMESPACE, name.as_bytes())
    }

    pub fn is_goal_reached(&self) -> bool {
        self.termination == TerminationReason::GoalReached
    }

    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::User)
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.messages.iter().filter_map(Message::tool_result_ref)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derived_id_is_stable_and_distinct() {
        let a = Trajectory::derive_id("task-1", "agent-1", 0);
        assert_eq!(a, Trajectory::derive_id("task-1", "agent-1", 0));
        assert_ne!(a, Trajectory::derive_id("task-1", "agent-1", 1));
        assert_ne!(a, Trajectory::derive_id("task-1", "agent-2", 0));
    }

    #[test]
    fn test_message_role_follows_payload() {
        let call = ToolCall {
            call_id: "call-1".into(),
            name: "lookup".into(),
            arguments: json!({"id": 7}),
        };
        assert_eq!(Message::user(1, "hi").role, Role::User);
        assert_eq!(
            Message::agent_tool_call(1, "", call.clone()).role,
            Role::Agent
        );
        assert_eq!(Message::agent_reply(1, "done").role, Role::Agent);
        let result = ToolResult {
            call_id: call.call_id,
            tool_name: call.name,
            outcome: ToolOutcome::Success,
            payload: json!({"ok": true}),
            error: None,
        };
        assert_eq!(Message::tool_result(1, result).role, Role::Tool);
    }

    #[test]
    fn test_message_serialization_is_tagged() {
        let msg = Message::agent_reply(2, "Which date?");
        let value = serde_json::to_value(&msg).expect("serializes");
        assert_eq!(value["role"], "agent");
        assert_eq!(value["kind"], "agent_reply");
        assert_eq!(value["turn_index"], 2);
        let back: Message = serde_json::from_value(value).expect("deserializes");
        assert_eq!(back, msg);
    }

    #[test]
    fn test_observation_includes_error() {
        let result = ToolResult {
            call_id: "call-1".into(),
            tool_name: "lookup".into(),
            outcome: ToolOutcome::Failure,
            payload: Value::Null,
            error: Some(ToolErrorPayload {
                error_type: "not_found".into(),
                message: "no such record".into(),
            }),
        };
        let observed: Value = serde_json::from_str(&result.observation()).expect("json");
        assert_eq!(observed["status"], "failure");
        assert_eq!(observed["error"]["type"], "not_found");
    }

    #[test]
    fn test_token_usage_record() {
        let mut usage = TokenUsage::default();
        usage.record(&Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        });
        usage.add(&TokenUsage::new(10, 5));
        assert_eq!(usage.prompt_tokens, 110);
        assert_eq!(usage.total_tokens, 135);
        assert_eq!(usage.calls, 1);
    }

    #[test]
    fn test_termination_reason_serialization() {
        let json = serde_json::to_string(&TerminationReason::ProtocolViolation).expect("json");
        assert_eq!(json, "\"protocol_violation\"");
    }
}

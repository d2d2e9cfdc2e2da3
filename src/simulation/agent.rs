//! Simulated tool-using agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::prompts::build_agent_system;
use super::ModelSettings;
use crate::error::LlmError;
use crate::llm::{LlmProvider, Message as ChatMessage, Usage};
use crate::trajectory::{AgentConfig, Message, MessagePayload};

/// Raw output of one agent step, parsed later by the coordinator.
#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub raw: String,
    pub usage: Usage,
}

impl AgentTurn {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            usage: Usage::default(),
        }
    }
}

/// Produces the agent's next output given the conversation so far.
#[async_trait]
pub trait AgentSimulator: Send + Sync {
    async fn act(&self, agent: &AgentConfig, history: &[Message]) -> Result<AgentTurn, LlmError>;
}

/// Agent simulator backed by the model capability.
pub struct LlmAgentSimulator {
    llm: Arc<dyn LlmProvider>,
    settings: ModelSettings,
}

impl LlmAgentSimulator {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: ModelSettings) -> Self {
        Self { llm, settings }
    }
}

/// Chat view of the transcript from the agent's side.
///
/// Tool calls are replayed in canonical JSON form and tool results arrive
/// as user-role `execution:` messages.
pub fn agent_chat_history(agent: &AgentConfig, history: &[Message]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(build_agent_system(agent)));
    for message in history {
        let chat = match &message.payload {
            MessagePayload::User { content } => ChatMessage::user(content.clone()),
            MessagePayload::AgentReply { content } => ChatMessage::assistant(content.clone()),
            MessagePayload::AgentToolCall { call, .. } => ChatMessage::assistant(format!(
                "```json\n{}\n```",
                json!({"name": call.name, "arguments": call.arguments})
            )),
            MessagePayload::ToolResult { result } => {
                ChatMessage::user(format!("execution: {}", result.observation()))
            }
        };
        messages.push(chat);
    }
    messages
}

#[async_trait]
impl AgentSimulator for LlmAgentSimulator {
    async fn act(&self, agent: &AgentConfig, history: &[Message]) -> Result<AgentTurn, LlmError> {
        let response = self
            .llm
            .generate(self.settings.request(agent_chat_history(agent, history)))
            .await?;
        Ok(AgentTurn {
            raw: response.first_content().unwrap_or_default().to_string(),
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::{ToolCall, ToolDefinition, ToolOutcome, ToolResult};

    #[test]
    fn test_history_mapping() {
        let tool = ToolDefinition {
            id: "t".into(),
            name: "check_stock".into(),
            description: "Check stock".into(),
            parameters: vec![],
            examples: vec![],
        };
        let agent = AgentConfig::new("a", "You run a shop.", vec![Arc::new(tool)]);
        let call = ToolCall {
            call_id: "call-1".into(),
            name: "check_stock".into(),
            arguments: json!({"sku": "X1"}),
        };
        let history = vec![
            Message::user(1, "Is X1 in stock?"),
            Message::agent_tool_call(1, "let me check", call),
            Message::tool_result(
                1,
                ToolResult {
                    call_id: "call-1".into(),
                    tool_name: "check_stock".into(),
                    outcome: ToolOutcome::Success,
                    payload: json!({"available": 3}),
                    error: None,
                },
            ),
        ];

        let chat = agent_chat_history(&agent, &history);
        let roles: Vec<_> = chat.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert!(chat[2].content.contains("\"check_stock\""));
        assert!(chat[3].content.starts_with("execution: "));
        assert!(chat[3].content.contains("\"available\":3"));
    }
}

//! Simulated user.

use std::sync::Arc;

use async_trait::async_trait;

use super::prompts::{build_user_continue, build_user_system, USER_OPENING};
use super::ModelSettings;
use crate::error::LlmError;
use crate::llm::{LlmProvider, Message as ChatMessage, Usage};
use crate::trajectory::{Message, MessagePayload, Task, UserPersona};

/// One message produced by the user simulator.
#[derive(Debug, Clone)]
pub struct UserUtterance {
    pub content: String,
    pub usage: Usage,
}

impl UserUtterance {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: Usage::default(),
        }
    }
}

/// Produces the next user message for a conversation.
///
/// `history` is empty for the opening message.
#[async_trait]
pub trait UserSimulator: Send + Sync {
    async fn respond(
        &self,
        task: &Task,
        persona: &UserPersona,
        history: &[Message],
    ) -> Result<UserUtterance, LlmError>;
}

/// User simulator backed by the model capability.
pub struct LlmUserSimulator {
    llm: Arc<dyn LlmProvider>,
    settings: ModelSettings,
    sentinel: String,
}

impl LlmUserSimulator {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: ModelSettings, sentinel: impl Into<String>) -> Self {
        Self {
            llm,
            settings,
            sentinel: sentinel.into(),
        }
    }
}

/// Renders what the user can see: their own messages and the agent's replies.
pub fn render_user_view(history: &[Message]) -> String {
    history
        .iter()
        .filter_map(|m| match &m.payload {
            MessagePayload::User { content } => Some(format!("user: {content}")),
            MessagePayload::AgentReply { content } => Some(format!("agent: {content}")),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl UserSimulator for LlmUserSimulator {
    async fn respond(
        &self,
        task: &Task,
        persona: &UserPersona,
        history: &[Message],
    ) -> Result<UserUtterance, LlmError> {
        let system = build_user_system(task, persona, &self.sentinel);
        let prompt = if history.is_empty() {
            USER_OPENING.to_string()
        } else {
            build_user_continue(&render_user_view(history))
        };

        let response = self
            .llm
            .generate(
                self.settings
                    .request(vec![ChatMessage::system(system), ChatMessage::user(prompt)]),
            )
            .await?;

        Ok(UserUtterance {
            content: response.first_content().unwrap_or_default().trim().to_string(),
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationRequest, GenerationResponse};
    use crate::trajectory::{InteractionStyle, Personality, Rubric};
    use std::sync::Mutex;

    struct Recording {
        requests: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl LlmProvider for Recording {
        async fn generate(&self, r: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().expect("lock").push(r);
            Ok(GenerationResponse::from_text("stub", "  I need a taxi.  "))
        }
    }

    fn fixtures() -> (Task, UserPersona) {
        (
            Task {
                id: "t".into(),
                agent_id: "a".into(),
                title: String::new(),
                description: "Get a taxi to the airport".into(),
                difficulty: Default::default(),
                expected_tools: vec![],
                rubric: Rubric::default(),
            },
            UserPersona {
                id: "p".into(),
                name: String::new(),
                personality: Personality::Impatient,
                style: InteractionStyle::Informal,
            },
        )
    }

    #[tokio::test]
    async fn test_opening_uses_dedicated_prompt() {
        let llm = Arc::new(Recording {
            requests: Mutex::new(vec![]),
        });
        let user = LlmUserSimulator::new(llm.clone(), ModelSettings::default(), "finish conversation");
        let (task, persona) = fixtures();

        let out = user.respond(&task, &persona, &[]).await.expect("ok");
        assert_eq!(out.content, "I need a taxi.");

        let requests = llm.requests.lock().expect("lock");
        assert_eq!(requests[0].messages[1].content, USER_OPENING);
        assert!(requests[0].messages[0].content.contains("airport"));
    }

    #[test]
    fn test_user_view_hides_tool_traffic() {
        let call = crate::trajectory::ToolCall {
            call_id: "call-1".into(),
            name: "order_taxi".into(),
            arguments: serde_json::json!({}),
        };
        let history = vec![
            Message::user(1, "taxi please"),
            Message::agent_tool_call(1, "{\"name\":\"order_taxi\"}", call),
            Message::agent_reply(1, "Booked."),
        ];
        assert_eq!(
            render_user_view(&history),
            "user: taxi please\nagent: Booked."
        );
    }
}

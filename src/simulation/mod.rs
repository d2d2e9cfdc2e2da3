//! Simulated participants of a rollout.
//!
//! - [`UserSimulator`]: plays the persona and decides when the goal is met
//! - [`AgentSimulator`]: plays the tool-using agent
//! - [`ToolExecutionSimulator`]: answers tool calls with seeded outcomes
//!
//! User and agent simulators are traits so the coordinator can be driven by
//! deterministic stubs in tests. The LLM-backed implementations take the
//! model-invocation capability as an explicit `Arc<dyn LlmProvider>`.

pub mod agent;
pub mod prompts;
pub mod tool_call;
pub mod tools;
pub mod user;

use serde::{Deserialize, Serialize};

use crate::llm::GenerationRequest;

pub use agent::{AgentSimulator, AgentTurn, LlmAgentSimulator};
pub use tool_call::{parse_agent_output, AgentAction};
pub use tools::{
    validate_arguments, ExecutionRecord, LlmResultSynthesizer, OutcomeWeights, ResultSynthesizer,
    SynthesisRequest, Synthesized, TemplateSynthesizer, ToolExecutionSimulator, ToolState,
};
pub use user::{LlmUserSimulator, UserSimulator, UserUtterance};

/// Model name and sampling settings for one simulated role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Empty means the provider's default model.
    pub model: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

impl ModelSettings {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Applies these settings to a request.
    pub fn request(&self, messages: Vec<crate::llm::Message>) -> GenerationRequest {
        let request =
            GenerationRequest::new(self.model.clone(), messages).with_temperature(self.temperature);
        match self.max_tokens {
            Some(max) => request.with_max_tokens(max),
            None => request,
        }
    }
}

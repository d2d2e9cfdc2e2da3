//! Coordinator settings and the task-completion policy.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::simulation::OutcomeWeights;

/// Phrase the simulated user is told to send when the task is done.
pub const DEFAULT_SENTINEL: &str = "finish conversation";

/// How a user message is compared against the sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// The normalized message contains the sentinel.
    #[default]
    Contains,
    /// The normalized message is the sentinel and nothing else.
    Exact,
}

/// Recognizes the user's "task complete" signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionPolicy {
    pub sentinel: String,
    pub mode: CompletionMode,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL.to_string(),
            mode: CompletionMode::default(),
        }
    }
}

impl CompletionPolicy {
    pub fn new(sentinel: impl Into<String>, mode: CompletionMode) -> Self {
        Self {
            sentinel: sentinel.into(),
            mode,
        }
    }

    /// Lowercases and strips surrounding whitespace, quotes and trailing
    /// punctuation.
    fn normalize(text: &str) -> String {
        text.trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
            .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
            .trim()
            .to_lowercase()
    }

    pub fn is_complete(&self, message: &str) -> bool {
        let sentinel = Self::normalize(&self.sentinel);
        if sentinel.is_empty() {
            return false;
        }
        let text = Self::normalize(message);
        match self.mode {
            CompletionMode::Contains => text.contains(&sentinel),
            CompletionMode::Exact => text == sentinel,
        }
    }
}

/// Per-rollout limits and simulation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Maximum number of user turns.
    pub max_turns: u32,
    /// Maximum consecutive tool calls before the agent must reply.
    pub max_tool_calls_per_turn: u32,
    pub completion: CompletionPolicy,
    pub seed: u64,
    pub outcome_weights: OutcomeWeights,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tool_calls_per_turn: 8,
            completion: CompletionPolicy::default(),
            seed: 42,
            outcome_weights: OutcomeWeights::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_outcome_weights(mut self, weights: OutcomeWeights) -> Self {
        self.outcome_weights = weights;
        self
    }

    pub fn with_completion(mut self, completion: CompletionPolicy) -> Self {
        self.completion = completion;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_turns must be greater than 0".to_string(),
            ));
        }
        if self.max_tool_calls_per_turn == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tool_calls_per_turn must be greater than 0".to_string(),
            ));
        }
        if self.completion.sentinel.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "completion sentinel must not be empty".to_string(),
            ));
        }
        self.outcome_weights.validate()
    }
}

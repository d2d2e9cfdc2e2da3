//! Error types for trajforge operations.
//!
//! Defines error types for the major subsystems:
//! - Model invocation (transient vs. fatal classification)
//! - Configuration and upstream input loading
//! - Agent/user protocol violations
//! - Quality judging

use thiserror::Error;

/// Errors that can occur during LLM operations.
///
/// Every variant is classified as either transient (retried with backoff)
/// or fatal (surfaced immediately) by [`LlmError::is_transient`].
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM call timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("LLM call failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("LLM call cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Returns true when the failure is worth retrying.
    ///
    /// Network failures, rate limits, server-side errors, timeouts and
    /// unparseable bodies are transient. Authentication, configuration,
    /// client errors and exhausted retries are fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_)
            | LlmError::ParseError(_)
            | LlmError::RateLimited(_)
            | LlmError::Timeout { .. } => true,
            LlmError::ApiError { code, .. } => *code == 408 || *code == 429 || *code >= 500,
            LlmError::MissingApiKey
            | LlmError::MissingApiBase
            | LlmError::InvalidModel(_)
            | LlmError::RetriesExhausted { .. }
            | LlmError::Cancelled
            | LlmError::Io(_) => false,
        }
    }
}

/// Errors raised while validating configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Upstream task/agent/persona/tool records are structurally incomplete.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Structural failure of simulated agent or user output.
///
/// Recorded as a terminal trajectory outcome, never propagated as a
/// process fault.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("{role} produced an empty message")]
    EmptyOutput { role: &'static str },

    #[error("unparseable tool call: {0}")]
    UnparseableToolCall(String),

    #[error("tool call is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("tool '{0}' is not declared in the agent configuration")]
    UndeclaredTool(String),

    #[error("agent exceeded {limit} tool calls within a single turn")]
    ToolCallBudgetExceeded { limit: u32 },
}

/// Errors that can occur while scoring a trajectory.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Scorer output could not be turned into per-criterion scores.
    #[error("Malformed scorer output: {0}")]
    Malformed(String),

    /// The model-invocation capability failed.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl JudgeError {
    /// Malformed output and transient invocation failures are retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            JudgeError::Malformed(_) => true,
            JudgeError::Llm(e) => e.is_transient(),
        }
    }
}

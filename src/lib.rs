//! trajforge: multi-turn agent trajectory generator.
//!
//! Simulates conversations between a synthetic user, a tool-using agent and
//! simulated tools, judges each finished conversation against its task
//! rubric, and keeps the ones above threshold as training data.

// Core modules
pub mod cli;
pub mod coordinator;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod quality;
pub mod scheduler;
pub mod simulation;
pub mod trajectory;
pub mod utils;

// Re-export commonly used error types
pub use error::{ConfigError, JudgeError, LlmError, ProtocolViolation};

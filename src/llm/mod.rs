//! LLM integration for trajforge.
//!
//! The model-invocation capability is an explicitly passed handle
//! (`Arc<dyn LlmProvider>`). Production code wraps the HTTP client in a
//! [`RateLimitedProvider`], which is shared by every rollout and the judge:
//!
//! ```ignore
//! use std::sync::Arc;
//! use trajforge::llm::{LiteLlmClient, RateLimitedProvider, RetryPolicy};
//!
//! let client = Arc::new(LiteLlmClient::from_env()?);
//! let gate = Arc::new(RateLimitedProvider::new(client, 16, RetryPolicy::default()));
//! ```

pub mod gate;
pub mod litellm;

pub use gate::{GateStats, RateLimitedProvider, RetryPolicy};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};

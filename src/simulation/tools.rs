//! Seeded tool execution simulation.
//!
//! Each rollout owns one [`ToolExecutionSimulator`]. It holds the
//! trajectory-scoped [`ToolState`] and a ChaCha8 stream seeded from the run
//! seed and the trajectory id, so the sequence of outcomes for a given
//! (seed, trajectory, call index) is reproducible. The outcome class is
//! always drawn here; a [`ResultSynthesizer`] only fills in the payload.
//!
//! Tool failure is data. Every call yields a well-formed [`ToolResult`]; the
//! only error path is a failure of the model capability behind an
//! LLM-backed synthesizer.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::prompts::{build_tool_call, TOOL_SYSTEM};
use super::ModelSettings;
use crate::error::{ConfigError, LlmError};
use crate::llm::{LlmProvider, Message, Usage};
use crate::trajectory::{ToolCall, ToolDefinition, ToolErrorPayload, ToolOutcome, ToolResult};
use crate::utils::json_extraction::extract_json_object;

/// Relative probabilities of the three outcome classes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeWeights {
    pub success: f64,
    pub partial_failure: f64,
    pub failure: f64,
}

impl Default for OutcomeWeights {
    fn default() -> Self {
        Self {
            success: 0.85,
            partial_failure: 0.10,
            failure: 0.05,
        }
    }
}

impl OutcomeWeights {
    pub fn new(success: f64, partial_failure: f64, failure: f64) -> Self {
        Self {
            success,
            partial_failure,
            failure,
        }
    }

    /// Every call fails.
    pub fn always_failure() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    /// Every call succeeds.
    pub fn always_success() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }

    pub fn total(&self) -> f64 {
        self.success + self.partial_failure + self.failure
    }

    /// Weights must be finite, non-negative, and not all zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in [
            ("success", self.success),
            ("partial_failure", self.partial_failure),
            ("failure", self.failure),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "outcome weight '{name}' must be a non-negative number, got {w}"
                )));
            }
        }
        if self.total() <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "outcome weights must not all be zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Maps a uniform draw in `[0, total)` to an outcome.
    fn pick(&self, roll: f64) -> ToolOutcome {
        if roll < self.success {
            ToolOutcome::Success
        } else if roll < self.success + self.partial_failure {
            ToolOutcome::PartialFailure
        } else {
            ToolOutcome::Failure
        }
    }
}

/// One executed call, kept in the state's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub call_index: u64,
    pub tool_name: String,
    pub arguments: Value,
    pub outcome: ToolOutcome,
}

/// Mutable state of one trajectory's tool session. Never shared.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolState {
    /// Calls executed so far, parameter errors included.
    pub call_index: u64,
    /// Last successful payload per tool name.
    pub entries: BTreeMap<String, Value>,
    pub history: Vec<ExecutionRecord>,
    pub usage: BTreeMap<String, u32>,
}

impl ToolState {
    /// Compact view handed to result synthesizers.
    pub fn snapshot(&self) -> Value {
        let recent: Vec<_> = self
            .history
            .iter()
            .rev()
            .take(10)
            .rev()
            .map(|r| json!({"tool": r.tool_name, "arguments": r.arguments, "outcome": r.outcome}))
            .collect();
        json!({
            "calls_so_far": self.call_index,
            "latest_results": self.entries,
            "recent_calls": recent,
        })
    }
}

/// Everything a synthesizer needs to produce one payload.
pub struct SynthesisRequest<'a> {
    pub tool: &'a ToolDefinition,
    pub call: &'a ToolCall,
    pub outcome: ToolOutcome,
    pub state: &'a ToolState,
}

/// Payload produced for a drawn outcome.
#[derive(Debug, Clone)]
pub struct Synthesized {
    pub payload: Value,
    pub error: Option<ToolErrorPayload>,
    pub usage: Usage,
}

/// Produces result payloads for an already-drawn outcome.
#[async_trait]
pub trait ResultSynthesizer: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<Synthesized, LlmError>;
}

/// Deterministic canned payloads. Makes no model calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateSynthesizer;

impl TemplateSynthesizer {
    pub fn render(&self, request: &SynthesisRequest<'_>) -> Synthesized {
        let name = &request.call.name;
        let index = request.state.call_index;
        let (payload, error) = match request.outcome {
            ToolOutcome::Success => (
                json!({
                    "status": "success",
                    "data": {
                        "tool": name,
                        "echo": request.call.arguments,
                        "reference": format!("{name}-{index:04}"),
                    },
                    "message": format!("{name} completed successfully"),
                }),
                None,
            ),
            ToolOutcome::PartialFailure => (
                json!({
                    "status": "partial",
                    "data": {"tool": name, "echo": request.call.arguments},
                    "warnings": ["Some fields could not be retrieved"],
                }),
                Some(ToolErrorPayload {
                    error_type: "partial_failure".to_string(),
                    message: format!("{name} returned incomplete data"),
                }),
            ),
            ToolOutcome::Failure => (
                Value::Null,
                Some(ToolErrorPayload {
                    error_type: "execution_error".to_string(),
                    message: format!("{name} failed: the service could not process the request"),
                }),
            ),
        };
        Synthesized {
            payload,
            error,
            usage: Usage::default(),
        }
    }
}

#[async_trait]
impl ResultSynthesizer for TemplateSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<Synthesized, LlmError> {
        Ok(self.render(&request))
    }
}

/// Model-generated payloads consistent with the session state.
///
/// Falls back to [`TemplateSynthesizer`] for the drawn outcome when the model
/// call fails or its output is unparseable. Only cancellation propagates.
pub struct LlmResultSynthesizer {
    llm: Arc<dyn LlmProvider>,
    settings: ModelSettings,
    fallback: TemplateSynthesizer,
}

impl LlmResultSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: ModelSettings) -> Self {
        Self {
            llm,
            settings,
            fallback: TemplateSynthesizer,
        }
    }

    fn interpret(
        value: Value,
        outcome: ToolOutcome,
        tool_name: &str,
    ) -> (Value, Option<ToolErrorPayload>) {
        let payload = value.get("result").cloned().unwrap_or_else(|| value.clone());
        if outcome == ToolOutcome::Success {
            return (payload, None);
        }
        let error = value.get("error");
        let error_type = error
            .and_then(|e| e.get("type"))
            .and_then(Value::as_str)
            .unwrap_or(match outcome {
                ToolOutcome::PartialFailure => "partial_failure",
                _ => "execution_error",
            })
            .to_string();
        let message = error
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{tool_name} did not complete ({outcome})"));
        (payload, Some(ToolErrorPayload { error_type, message }))
    }
}

#[async_trait]
impl ResultSynthesizer for LlmResultSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<Synthesized, LlmError> {
        let prompt = build_tool_call(
            request.tool,
            request.call,
            &request.state.snapshot(),
            request.outcome.as_str(),
        );
        let response = match self
            .llm
            .generate(
                self.settings
                    .request(vec![Message::system(TOOL_SYSTEM), Message::user(prompt)]),
            )
            .await
        {
            Ok(response) => response,
            Err(LlmError::Cancelled) => return Err(LlmError::Cancelled),
            Err(e) => {
                warn!(tool = %request.call.name, error = %e, "Tool result synthesis failed, using template");
                return Ok(self.fallback.render(&request));
            }
        };

        let content = response.first_content().unwrap_or_default();
        match extract_json_object(content) {
            Ok(value) => {
                let (payload, error) =
                    Self::interpret(value, request.outcome, &request.call.name);
                Ok(Synthesized {
                    payload,
                    error,
                    usage: response.usage,
                })
            }
            Err(e) => {
                warn!(tool = %request.call.name, error = %e, "Unparseable tool result, using template");
                let mut synthesized = self.fallback.render(&request);
                synthesized.usage = response.usage;
                Ok(synthesized)
            }
        }
    }
}

/// Checks call arguments against the tool's declared parameters.
///
/// Returns a description of the first problem found.
pub fn validate_arguments(tool: &ToolDefinition, arguments: &Value) -> Result<(), String> {
    let Some(args) = arguments.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    for param in &tool.parameters {
        match args.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required && param.default.is_none() {
                    return Err(format!("missing required parameter '{}'", param.name));
                }
            }
            Some(value) => {
                if !param.accepts(value) {
                    return Err(format!(
                        "parameter '{}' must be of type {}",
                        param.name, param.param_type
                    ));
                }
                if let (Some(allowed), Some(s)) = (&param.enum_values, value.as_str()) {
                    if !allowed.iter().any(|a| a == s) {
                        return Err(format!(
                            "parameter '{}' must be one of [{}], got '{}'",
                            param.name,
                            allowed.join(", "),
                            s
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Per-trajectory tool simulator.
pub struct ToolExecutionSimulator {
    rng: ChaCha8Rng,
    weights: OutcomeWeights,
    synthesizer: Arc<dyn ResultSynthesizer>,
    state: ToolState,
}

impl ToolExecutionSimulator {
    pub fn new(
        seed: u64,
        trajectory_id: Uuid,
        weights: OutcomeWeights,
        synthesizer: Arc<dyn ResultSynthesizer>,
    ) -> Self {
        Self {
            rng: ChaCha8Rng::from_seed(stream_seed(seed, trajectory_id)),
            weights,
            synthesizer,
            state: ToolState::default(),
        }
    }

    pub fn state(&self) -> &ToolState {
        &self.state
    }

    /// Draws the next outcome class from the seeded stream.
    pub fn draw_outcome(&mut self) -> ToolOutcome {
        let total = self.weights.total();
        if !total.is_finite() || total <= 0.0 {
            return ToolOutcome::Failure;
        }
        let roll: f64 = self.rng.random_range(0.0..total);
        self.weights.pick(roll)
    }

    /// Executes one call and updates the state.
    ///
    /// Invalid arguments produce a `parameter_error` failure without
    /// consuming a draw.
    pub async fn execute(
        &mut self,
        tool: &ToolDefinition,
        call: &ToolCall,
    ) -> Result<(ToolResult, Usage), LlmError> {
        self.state.call_index += 1;

        if let Err(problem) = validate_arguments(tool, &call.arguments) {
            debug!(tool = %call.name, problem = %problem, "Rejected tool arguments");
            self.record(call, ToolOutcome::Failure);
            let result = ToolResult {
                call_id: call.call_id.clone(),
                tool_name: call.name.clone(),
                outcome: ToolOutcome::Failure,
                payload: Value::Null,
                error: Some(ToolErrorPayload {
                    error_type: "parameter_error".to_string(),
                    message: problem,
                }),
            };
            return Ok((result, Usage::default()));
        }

        let outcome = self.draw_outcome();
        let synthesized = self
            .synthesizer
            .synthesize(SynthesisRequest {
                tool,
                call,
                outcome,
                state: &self.state,
            })
            .await?;

        if outcome == ToolOutcome::Success {
            self.state
                .entries
                .insert(call.name.clone(), synthesized.payload.clone());
        }
        self.record(call, outcome);

        let error = match outcome {
            ToolOutcome::Success => None,
            _ => synthesized.error.or_else(|| {
                Some(ToolErrorPayload {
                    error_type: outcome.as_str().to_string(),
                    message: format!("{} did not complete", call.name),
                })
            }),
        };

        Ok((
            ToolResult {
                call_id: call.call_id.clone(),
                tool_name: call.name.clone(),
                outcome,
                payload: synthesized.payload,
                error,
            },
            synthesized.usage,
        ))
    }

    fn record(&mut self, call: &ToolCall, outcome: ToolOutcome) {
        *self.state.usage.entry(call.name.clone()).or_insert(0) += 1;
        self.state.history.push(ExecutionRecord {
            call_index: self.state.call_index,
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            outcome,
        });
    }

    /// Ends the session, returning the per-tool usage and dropping the state.
    pub fn finish(self) -> BTreeMap<String, u32> {
        self.state.usage
    }
}

/// Mixes the run seed with the trajectory id into a 256-bit stream seed.
fn stream_seed(seed: u64, trajectory_id: Uuid) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(trajectory_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

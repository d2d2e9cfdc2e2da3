//! Pipeline configuration.
//!
//! Layered as defaults, then an optional YAML file, then environment
//! variables; the CLI applies its flags last and calls [`PipelineConfig::validate`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::{CompletionMode, CompletionPolicy, CoordinatorConfig, DEFAULT_SENTINEL};
use crate::error::ConfigError;
use crate::llm::RetryPolicy;
use crate::quality::{AggregationPolicy, JudgeConfig, JudgeMode, Thresholds, MAX_SCORE};
use crate::simulation::{ModelSettings, OutcomeWeights};

/// Model settings per simulated role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleModels {
    pub user: ModelSettings,
    pub agent: ModelSettings,
    pub tool: ModelSettings,
    pub judge: ModelSettings,
}

impl Default for RoleModels {
    fn default() -> Self {
        Self {
            user: ModelSettings::default(),
            agent: ModelSettings::default(),
            tool: ModelSettings::default(),
            judge: ModelSettings::default().with_temperature(0.0),
        }
    }
}

/// Configuration for the trajectory pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // Concurrency
    /// Rollouts in flight at once.
    pub max_workers: usize,
    /// Model calls in flight at once, across all rollouts.
    pub max_concurrent_llm_calls: usize,

    // Rollouts
    pub max_turns: u32,
    pub max_tool_calls_per_turn: u32,
    /// Rollouts per (task, agent) pair.
    pub attempts_per_task: u32,
    pub completion_sentinel: String,
    pub completion_mode: CompletionMode,

    // Model calls
    pub retry: RetryPolicy,
    /// Per-call timeout in seconds, 0 disables it.
    pub call_timeout_secs: u64,
    pub models: RoleModels,

    // Tool simulation
    pub outcome_weights: OutcomeWeights,
    pub seed: u64,
    /// Synthesize tool payloads with the model instead of templates.
    pub llm_tool_results: bool,

    // Scoring
    pub pass_threshold: f64,
    pub high_quality_threshold: f64,
    pub judge_incomplete: bool,
    pub judge_mode: JudgeMode,
    pub aggregation: AggregationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 64,
            max_concurrent_llm_calls: 16,

            max_turns: 20,
            max_tool_calls_per_turn: 8,
            attempts_per_task: 1,
            completion_sentinel: DEFAULT_SENTINEL.to_string(),
            completion_mode: CompletionMode::default(),

            retry: RetryPolicy::default(),
            call_timeout_secs: 120,
            models: RoleModels::default(),

            outcome_weights: OutcomeWeights::default(),
            seed: 42,
            llm_tool_results: true,

            pass_threshold: 4.0,
            high_quality_threshold: 4.5,
            judge_incomplete: false,
            judge_mode: JudgeMode::default(),
            aggregation: AggregationPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Defaults and environment variables, validated.
    ///
    /// # Environment Variables
    ///
    /// - `TRAJECTORY_MAX_WORKERS`, `LLM_MAX_CONCURRENT_CALLS`
    /// - `TRAJECTORY_MAX_TURNS`, `TRAJECTORY_MAX_TOOL_CALLS_PER_TURN`, `TRAJECTORY_ATTEMPTS_PER_TASK`
    /// - `LLM_RETRY_ATTEMPTS`, `LLM_RETRY_BASE_DELAY_MS`, `LLM_RETRY_MAX_DELAY_MS`, `LLM_CALL_TIMEOUT_SECS`
    /// - `QUALITY_PASS_THRESHOLD`, `QUALITY_HIGH_THRESHOLD`, `QUALITY_JUDGE_INCOMPLETE`
    /// - `SIMULATOR_SUCCESS_RATE`, `SIMULATOR_PARTIAL_FAILURE_RATE`, `SIMULATOR_COMPLETE_FAILURE_RATE`
    /// - `SIMULATOR_SEED`, `SIMULATOR_LLM_RESULTS`, `COMPLETION_SENTINEL`
    /// - `{USER,AGENT,TOOL,JUDGE}_MODEL`, `{USER,AGENT,TOOL,JUDGE}_TEMPERATURE`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Optional YAML file, then environment. Not validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup, using the environment variable names.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        macro_rules! set {
            ($key:literal => bool $field:expr) => {
                if let Some(val) = lookup($key) {
                    $field = parse_env_bool(&val, $key)?;
                }
            };
            ($key:literal => $field:expr) => {
                if let Some(val) = lookup($key) {
                    $field = parse_env_value(&val, $key)?;
                }
            };
        }

        set!("TRAJECTORY_MAX_WORKERS" => self.max_workers);
        set!("LLM_MAX_CONCURRENT_CALLS" => self.max_concurrent_llm_calls);
        set!("TRAJECTORY_MAX_TURNS" => self.max_turns);
        set!("TRAJECTORY_MAX_TOOL_CALLS_PER_TURN" => self.max_tool_calls_per_turn);
        set!("TRAJECTORY_ATTEMPTS_PER_TASK" => self.attempts_per_task);

        set!("LLM_RETRY_ATTEMPTS" => self.retry.max_attempts);
        set!("LLM_RETRY_BASE_DELAY_MS" => self.retry.base_delay_ms);
        set!("LLM_RETRY_MAX_DELAY_MS" => self.retry.max_delay_ms);
        set!("LLM_CALL_TIMEOUT_SECS" => self.call_timeout_secs);

        set!("QUALITY_PASS_THRESHOLD" => self.pass_threshold);
        set!("QUALITY_HIGH_THRESHOLD" => self.high_quality_threshold);
        set!("QUALITY_JUDGE_INCOMPLETE" => bool self.judge_incomplete);

        set!("SIMULATOR_SUCCESS_RATE" => self.outcome_weights.success);
        set!("SIMULATOR_PARTIAL_FAILURE_RATE" => self.outcome_weights.partial_failure);
        set!("SIMULATOR_COMPLETE_FAILURE_RATE" => self.outcome_weights.failure);
        set!("SIMULATOR_SEED" => self.seed);
        set!("SIMULATOR_LLM_RESULTS" => bool self.llm_tool_results);

        if let Some(val) = lookup("COMPLETION_SENTINEL") {
            self.completion_sentinel = val;
        }

        for (prefix, settings) in [
            ("USER", &mut self.models.user),
            ("AGENT", &mut self.models.agent),
            ("TOOL", &mut self.models.tool),
            ("JUDGE", &mut self.models.judge),
        ] {
            let model_key = format!("{prefix}_MODEL");
            if let Some(val) = lookup(&model_key) {
                settings.model = val;
            }
            let temp_key = format!("{prefix}_TEMPERATURE");
            if let Some(val) = lookup(&temp_key) {
                settings.temperature = parse_env_value(&val, &temp_key)?;
            }
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_workers must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_llm_calls == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_llm_calls must be greater than 0".to_string(),
            ));
        }

        if self.attempts_per_task == 0 {
            return Err(ConfigError::ValidationFailed(
                "attempts_per_task must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        if !(0.0..=MAX_SCORE).contains(&self.pass_threshold) {
            return Err(ConfigError::ValidationFailed(format!(
                "pass_threshold must be between 0 and {MAX_SCORE}"
            )));
        }

        if !(self.pass_threshold..=MAX_SCORE).contains(&self.high_quality_threshold) {
            return Err(ConfigError::ValidationFailed(format!(
                "high_quality_threshold must be between pass_threshold and {MAX_SCORE}"
            )));
        }

        for (role, settings) in [
            ("user", &self.models.user),
            ("agent", &self.models.agent),
            ("tool", &self.models.tool),
            ("judge", &self.models.judge),
        ] {
            if !(0.0..=2.0).contains(&settings.temperature) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{role} temperature must be between 0.0 and 2.0"
                )));
            }
        }

        self.coordinator_config().validate()
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_turns: self.max_turns,
            max_tool_calls_per_turn: self.max_tool_calls_per_turn,
            completion: CompletionPolicy::new(self.completion_sentinel.clone(), self.completion_mode),
            seed: self.seed,
            outcome_weights: self.outcome_weights,
        }
    }

    pub fn judge_config(&self) -> JudgeConfig {
        JudgeConfig {
            mode: self.judge_mode,
            aggregation: self.aggregation,
            settings: self.models.judge.clone(),
            retry: self.retry.clone(),
            judge_incomplete: self.judge_incomplete,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.pass_threshold, self.high_quality_threshold)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }

    /// Builder method to set the worker count.
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Builder method to set the turn budget.
    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = max;
        self
    }

    /// Builder method to set the simulator seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder method to set both score thresholds.
    pub fn with_thresholds(mut self, pass: f64, high_quality: f64) -> Self {
        self.pass_threshold = pass;
        self.high_quality_threshold = high_quality;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

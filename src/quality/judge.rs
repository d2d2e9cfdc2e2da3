//! Rubric scoring of completed trajectories by a model-backed judge.
//!
//! The judge is stateless: every call to [`QualityJudge::score`] builds its
//! prompts from the trajectory and the task rubric alone, so re-scoring an
//! unchanged trajectory with a zero-temperature judge yields the same
//! aggregate. Malformed judge output is retried; when retries run out the
//! result is a [`Score`] marked invalid, never a made-up number.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::JudgeError;
use crate::llm::{LlmProvider, Message as ChatMessage, RetryPolicy};
use crate::simulation::prompts::{build_judge_criterion, build_judge_rubric, build_judge_system};
use crate::simulation::ModelSettings;
use crate::trajectory::{
    Criterion, MessagePayload, Task, TerminationReason, TokenUsage, Trajectory,
};
use crate::utils::json_extraction::extract_json_object;

/// Upper end of the scoring scale.
pub const MAX_SCORE: f64 = 5.0;

/// How many model calls one scoring takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeMode {
    /// One call scores the whole rubric.
    #[default]
    SingleCall,
    /// One call per criterion.
    PerCriterion,
}

/// How per-criterion scores combine into the aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    #[default]
    WeightedMean,
    Mean,
    Min,
}

impl AggregationPolicy {
    /// `None` when there is nothing to aggregate.
    pub fn aggregate(self, scores: &[CriterionScore]) -> Option<f64> {
        if scores.is_empty() {
            return None;
        }
        let mean = scores.iter().map(|s| s.score).sum::<f64>() / scores.len() as f64;
        let value = match self {
            AggregationPolicy::Mean => mean,
            AggregationPolicy::Min => scores.iter().map(|s| s.score).fold(f64::INFINITY, f64::min),
            AggregationPolicy::WeightedMean => {
                let total_weight: f64 = scores.iter().map(|s| s.weight.max(0.0)).sum();
                if total_weight > 0.0 {
                    scores
                        .iter()
                        .map(|s| s.score * s.weight.max(0.0))
                        .sum::<f64>()
                        / total_weight
                } else {
                    mean
                }
            }
        };
        Some(value)
    }
}

/// Score of one rubric criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub name: String,
    pub score: f64,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

/// How a score was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetadata {
    pub judge_model: String,
    pub mode: JudgeMode,
    pub aggregation: AggregationPolicy,
    /// Judge attempts made, 0 when the trajectory was prefiltered.
    pub attempts: u32,
    pub termination: TerminationReason,
    #[serde(default)]
    pub token_usage: TokenUsage,
    pub scored_at: DateTime<Utc>,
}

/// Judge verdict for one trajectory. Never mutated: tagging makes a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub trajectory_id: Uuid,
    pub task_id: String,
    pub criteria: Vec<CriterionScore>,
    pub aggregate: Option<f64>,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub quality_tags: Vec<String>,
    pub metadata: ScoreMetadata,
}

impl Score {
    /// The aggregate, if the score is usable for filtering.
    pub fn usable_aggregate(&self) -> Option<f64> {
        if self.valid {
            self.aggregate.filter(|a| a.is_finite())
        } else {
            None
        }
    }

    /// Copy carrying the given quality tags.
    pub fn with_tags(&self, tags: &[&str]) -> Score {
        let mut tagged = self.clone();
        tagged.quality_tags = tags.iter().map(|t| t.to_string()).collect();
        tagged
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.quality_tags.iter().any(|t| t == tag)
    }
}

/// Judge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub mode: JudgeMode,
    pub aggregation: AggregationPolicy,
    pub settings: ModelSettings,
    /// Retries on malformed output.
    pub retry: RetryPolicy,
    /// Score trajectories that did not reach their goal.
    pub judge_incomplete: bool,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            mode: JudgeMode::default(),
            aggregation: AggregationPolicy::default(),
            settings: ModelSettings::default().with_temperature(0.0),
            retry: RetryPolicy::default(),
            judge_incomplete: false,
        }
    }
}

/// Renders a trajectory for the judge, tool traffic included.
pub fn render_transcript(trajectory: &Trajectory) -> String {
    trajectory
        .messages
        .iter()
        .map(|m| match &m.payload {
            MessagePayload::User { content } => format!("[turn {}] user: {content}", m.turn_index),
            MessagePayload::AgentReply { content } => {
                format!("[turn {}] agent: {content}", m.turn_index)
            }
            MessagePayload::AgentToolCall { call, .. } => format!(
                "[turn {}] agent calls {}({})",
                m.turn_index, call.name, call.arguments
            ),
            MessagePayload::ToolResult { result } => {
                format!("[turn {}] tool: {}", m.turn_index, result.observation())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reads a numeric score out of a judge value: a number, a numeric
/// string, or an object with a `score` field.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(obj) => obj.get("score").and_then(numeric),
        _ => None,
    }
}

fn checked(name: &str, value: Option<f64>) -> Result<f64, JudgeError> {
    match value {
        Some(v) if v.is_finite() && (0.0..=MAX_SCORE).contains(&v) => Ok(v),
        Some(v) => Err(JudgeError::Malformed(format!(
            "score {v} for '{name}' is outside 0..={MAX_SCORE}"
        ))),
        None => Err(JudgeError::Malformed(format!("missing score for '{name}'"))),
    }
}

/// Parses a whole-rubric answer into per-criterion scores.
pub fn parse_rubric_scores(
    content: &str,
    criteria: &[Criterion],
) -> Result<(Vec<CriterionScore>, Option<String>), JudgeError> {
    let value = extract_json_object(content).map_err(|e| JudgeError::Malformed(e.to_string()))?;
    let scores = value.get("scores").unwrap_or(&value);
    let feedback = value
        .get("feedback")
        .and_then(Value::as_str)
        .map(str::to_string);

    let parsed = criteria
        .iter()
        .map(|c| {
            let raw = scores.get(&c.name);
            Ok(CriterionScore {
                name: c.name.clone(),
                score: checked(&c.name, raw.and_then(numeric))?,
                weight: c.weight,
                feedback: raw
                    .and_then(|r| r.get("feedback"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        })
        .collect::<Result<Vec<_>, JudgeError>>()?;
    Ok((parsed, feedback))
}

/// Parses a single-criterion answer.
pub fn parse_criterion_score(content: &str, criterion: &Criterion) -> Result<CriterionScore, JudgeError> {
    let value = extract_json_object(content).map_err(|e| JudgeError::Malformed(e.to_string()))?;
    Ok(CriterionScore {
        name: criterion.name.clone(),
        score: checked(&criterion.name, numeric(&value))?,
        weight: criterion.weight,
        feedback: value
            .get("feedback")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Model-backed rubric scorer.
pub struct QualityJudge {
    llm: Arc<dyn LlmProvider>,
    config: JudgeConfig,
}

impl QualityJudge {
    pub fn new(llm: Arc<dyn LlmProvider>, config: JudgeConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    /// Reason to reject without a model call, if any.
    pub fn prefilter(&self, trajectory: &Trajectory) -> Option<String> {
        if self.config.judge_incomplete || trajectory.is_goal_reached() {
            return None;
        }
        Some(format!("prefiltered: terminated as {}", trajectory.termination))
    }

    fn metadata(&self, trajectory: &Trajectory, attempts: u32, usage: TokenUsage) -> ScoreMetadata {
        ScoreMetadata {
            judge_model: self.config.settings.model.clone(),
            mode: self.config.mode,
            aggregation: self.config.aggregation,
            attempts,
            termination: trajectory.termination,
            token_usage: usage,
            scored_at: Utc::now(),
        }
    }

    fn invalid(
        &self,
        trajectory: &Trajectory,
        reason: String,
        attempts: u32,
        usage: TokenUsage,
    ) -> Score {
        Score {
            trajectory_id: trajectory.id,
            task_id: trajectory.task_id.clone(),
            criteria: Vec::new(),
            aggregate: None,
            valid: false,
            invalid_reason: Some(reason),
            feedback: None,
            quality_tags: Vec::new(),
            metadata: self.metadata(trajectory, attempts, usage),
        }
    }

    /// Scores `trajectory` against the rubric of `task`.
    pub async fn score(&self, trajectory: &Trajectory, task: &Task) -> Score {
        if let Some(reason) = self.prefilter(trajectory) {
            debug!(trajectory_id = %trajectory.id, reason = %reason, "Skipping judge");
            return self.invalid(trajectory, reason, 0, TokenUsage::default());
        }

        let criteria = task.rubric.effective_criteria();
        let transcript = render_transcript(trajectory);
        let system = build_judge_system(MAX_SCORE);
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut usage = TokenUsage::default();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = self
                .attempt(task, &criteria, &transcript, &system, &mut usage)
                .await;

            match outcome {
                Ok((scores, feedback)) => {
                    let aggregate = self.config.aggregation.aggregate(&scores);
                    return Score {
                        trajectory_id: trajectory.id,
                        task_id: trajectory.task_id.clone(),
                        criteria: scores,
                        aggregate,
                        valid: aggregate.is_some(),
                        invalid_reason: aggregate
                            .is_none()
                            .then(|| "no criteria to score".to_string()),
                        feedback,
                        quality_tags: Vec::new(),
                        metadata: self.metadata(trajectory, attempt, usage),
                    };
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        trajectory_id = %trajectory.id,
                        attempt = attempt,
                        error = %e,
                        "Judge attempt failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry.delay_for(attempt)).await;
                }
                Err(e) => {
                    warn!(trajectory_id = %trajectory.id, attempts = attempt, error = %e, "Judge gave up");
                    return self.invalid(trajectory, e.to_string(), attempt, usage);
                }
            }
        }
    }

    async fn attempt(
        &self,
        task: &Task,
        criteria: &[Criterion],
        transcript: &str,
        system: &str,
        usage: &mut TokenUsage,
    ) -> Result<(Vec<CriterionScore>, Option<String>), JudgeError> {
        match self.config.mode {
            JudgeMode::SingleCall => {
                let prompt = build_judge_rubric(task, transcript, criteria);
                let content = self.ask(system, prompt, usage).await?;
                parse_rubric_scores(&content, criteria)
            }
            JudgeMode::PerCriterion => {
                let mut scores = Vec::with_capacity(criteria.len());
                for criterion in criteria {
                    let prompt = build_judge_criterion(task, transcript, criterion);
                    let content = self.ask(system, prompt, usage).await?;
                    scores.push(parse_criterion_score(&content, criterion)?);
                }
                Ok((scores, None))
            }
        }
    }

    async fn ask(
        &self,
        system: &str,
        prompt: String,
        usage: &mut TokenUsage,
    ) -> Result<String, JudgeError> {
        let response = self
            .llm
            .generate(
                self.config
                    .settings
                    .request(vec![ChatMessage::system(system), ChatMessage::user(prompt)]),
            )
            .await?;
        usage.record(&response.usage);
        Ok(response.first_content().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{GenerationRequest, GenerationResponse};
    use crate::trajectory::{Message, Rubric};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    struct Scripted(Mutex<VecDeque<String>>);

    impl Scripted {
        fn new(outputs: &[&str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                outputs.iter().map(|s| s.to_string()).collect(),
            )))
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        async fn generate(&self, _r: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            let next = self.0.lock().expect("lock").pop_front().unwrap_or_default();
            Ok(GenerationResponse::from_text("judge", next))
        }
    }

    fn task() -> Task {
        Task {
            id: "t".into(),
            agent_id: "a".into(),
            title: String::new(),
            description: "Cancel my order".into(),
            difficulty: Default::default(),
            expected_tools: vec![],
            rubric: Rubric::default(),
        }
    }

    fn trajectory(termination: TerminationReason) -> Trajectory {
        Trajectory {
            id: Trajectory::derive_id("t", "a", 0),
            task_id: "t".into(),
            agent_id: "a".into(),
            persona_id: "p".into(),
            attempt: 0,
            messages: vec![
                Message::user(1, "cancel order 7"),
                Message::agent_reply(1, "Done."),
                Message::user(2, "finish conversation"),
            ],
            termination,
            termination_detail: None,
            turn_count: 2,
            tool_call_count: 0,
            tool_usage: BTreeMap::new(),
            token_usage: TokenUsage::default(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
        }
    }

    fn config() -> JudgeConfig {
        JudgeConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 0,
                max_delay_ms: 0,
            },
            ..JudgeConfig::default()
        }
    }

    const GOOD: &str = r#"{"scores": {"task_completion": 5, "tool_usage": 4, "interaction_quality": 3}, "feedback": "ok"}"#;

    #[test]
    fn test_aggregation_policies() {
        let scores = vec![
            CriterionScore { name: "a".into(), score: 5.0, weight: 0.4, feedback: None },
            CriterionScore { name: "b".into(), score: 4.0, weight: 0.3, feedback: None },
            CriterionScore { name: "c".into(), score: 3.0, weight: 0.3, feedback: None },
        ];
        let weighted = AggregationPolicy::WeightedMean.aggregate(&scores).expect("some");
        assert!((weighted - 4.1).abs() < 1e-9);
        let mean = AggregationPolicy::Mean.aggregate(&scores).expect("some");
        assert!((mean - 4.0).abs() < 1e-9);
        assert_eq!(AggregationPolicy::Min.aggregate(&scores), Some(3.0));
        assert_eq!(AggregationPolicy::Mean.aggregate(&[]), None);
    }

    #[test]
    fn test_parse_rubric_scores_variants() {
        let criteria = Rubric::default_criteria();
        let content = "```json\n{\"scores\": {\"task_completion\": \"4.5\", \"tool_usage\": {\"score\": 4}, \"interaction_quality\": 5}}\n```";
        let (scores, _) = parse_rubric_scores(content, &criteria).expect("parses");
        assert_eq!(scores[0].score, 4.5);
        assert_eq!(scores[1].score, 4.0);

        let missing = r#"{"scores": {"task_completion": 4}}"#;
        assert!(matches!(
            parse_rubric_scores(missing, &criteria),
            Err(JudgeError::Malformed(_))
        ));
        let out_of_range = r#"{"scores": {"task_completion": 9, "tool_usage": 4, "interaction_quality": 4}}"#;
        assert!(parse_rubric_scores(out_of_range, &criteria).is_err());
    }

    #[tokio::test]
    async fn test_single_call_score() {
        let judge = QualityJudge::new(Scripted::new(&[GOOD]), config());
        let score = judge
            .score(&trajectory(TerminationReason::GoalReached), &task())
            .await;
        assert!(score.valid);
        assert!((score.aggregate.expect("aggregate") - 4.1).abs() < 1e-9);
        assert_eq!(score.metadata.attempts, 1);
        assert_eq!(score.feedback.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_malformed_output_is_retried() {
        let judge = QualityJudge::new(Scripted::new(&["I think it went well", GOOD]), config());
        let score = judge
            .score(&trajectory(TerminationReason::GoalReached), &task())
            .await;
        assert!(score.valid);
        assert_eq!(score.metadata.attempts, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_yields_invalid_score() {
        let judge = QualityJudge::new(Scripted::new(&["nope", "still nope"]), config());
        let score = judge
            .score(&trajectory(TerminationReason::GoalReached), &task())
            .await;
        assert!(!score.valid);
        assert_eq!(score.aggregate, None);
        assert!(score.invalid_reason.is_some());
        assert_eq!(score.usable_aggregate(), None);
    }

    #[tokio::test]
    async fn test_per_criterion_mode() {
        let judge = QualityJudge::new(
            Scripted::new(&[r#"{"score": 5}"#, r#"{"score": 5}"#, r#"{"score": 2}"#]),
            JudgeConfig {
                mode: JudgeMode::PerCriterion,
                aggregation: AggregationPolicy::Min,
                ..config()
            },
        );
        let score = judge
            .score(&trajectory(TerminationReason::GoalReached), &task())
            .await;
        assert_eq!(score.criteria.len(), 3);
        assert_eq!(score.aggregate, Some(2.0));
    }

    #[tokio::test]
    async fn test_incomplete_trajectories_are_prefiltered() {
        let llm = Scripted::new(&[GOOD]);
        let judge = QualityJudge::new(llm.clone(), config());
        let score = judge
            .score(&trajectory(TerminationReason::MaxTurns), &task())
            .await;
        assert!(!score.valid);
        assert_eq!(score.metadata.attempts, 0);
        assert_eq!(llm.0.lock().expect("lock").len(), 1);

        let eager = QualityJudge::new(
            llm,
            JudgeConfig {
                judge_incomplete: true,
                ..config()
            },
        );
        let score = eager
            .score(&trajectory(TerminationReason::MaxTurns), &task())
            .await;
        assert!(score.valid);
    }

    #[test]
    fn test_transcript_rendering() {
        let text = render_transcript(&trajectory(TerminationReason::GoalReached));
        assert!(text.starts_with("[turn 1] user: cancel order 7"));
        assert!(text.contains("[turn 1] agent: Done."));
    }
}

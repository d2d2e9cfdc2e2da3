//! Pipeline orchestrator: worker pool, then judge, then filter, then corpus.
//!
//! Every stage is resumable. Rollouts whose trajectory id is already in
//! `trajectories.jsonl` are not dispatched again, trajectories that already
//! have a line in `scores.jsonl` are not judged again, and the training
//! files are rebuilt from the full score file on every run. An interrupted
//! run keeps whatever it finished and the next run picks up the rest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::coordinator::InteractionCoordinator;
use crate::llm::{GateStats, LlmProvider, RateLimitedProvider};
use crate::quality::{partition, FilterOutcome, QualityJudge, Score, Thresholds};
use crate::scheduler::{PoolStats, RolloutJob, ShutdownHandle, WorkerPool};
use crate::simulation::{
    AgentSimulator, LlmAgentSimulator, LlmResultSynthesizer, LlmUserSimulator, ResultSynthesizer,
    TemplateSynthesizer, UserSimulator,
};
use crate::trajectory::{
    read_jsonl, validate_transcript, write_json, write_jsonl, CorpusWriter,
    StorageError, Task, TrainingRecord, Trajectory,
};

use super::config::PipelineConfig;
use super::inputs::InputBundle;
use crate::error::ConfigError;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration or input error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// No tasks to execute.
    #[error("No tasks to execute")]
    NoTasks,

    /// A file the stage depends on does not exist.
    #[error("Missing input file: {0}")]
    MissingFile(PathBuf),
}

/// File layout of an output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trajectories(&self) -> PathBuf {
        self.root.join("trajectories.jsonl")
    }

    pub fn scores(&self) -> PathBuf {
        self.root.join("scores.jsonl")
    }

    pub fn passed(&self) -> PathBuf {
        self.root.join("training").join("passed.jsonl")
    }

    pub fn high_quality(&self) -> PathBuf {
        self.root.join("training").join("high_quality.jsonl")
    }

    pub fn summary(&self) -> PathBuf {
        self.root.join("summary.json")
    }
}

/// Rollout stage counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RolloutSummary {
    /// Rollouts implied by the inputs.
    pub planned: usize,
    /// Already present in the corpus from an earlier run.
    pub resumed: usize,
    pub generated: usize,
    /// Not started because of a shutdown.
    pub skipped: usize,
    pub panicked: usize,
    /// Written despite failing the transcript checks.
    pub invalid_transcripts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
}

/// Scoring stage counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoringSummary {
    /// Scores produced in this run.
    pub judged: usize,
    /// Rejected without a judge call.
    pub prefiltered: usize,
    /// Judge output unusable after all retries.
    pub invalid: usize,
    /// Trajectories whose task is not among the inputs.
    pub unknown_task: usize,
}

/// Filter stage counters.
#[derive(Debug, Clone, Serialize)]
pub struct FilterSummary {
    pub thresholds: Thresholds,
    pub total: usize,
    pub rejected: usize,
    pub passed: usize,
    pub high_quality: usize,
}

impl FilterSummary {
    fn from_outcome(outcome: &FilterOutcome, thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            total: outcome.passed.len() + outcome.rejected.len(),
            rejected: outcome.rejected.len(),
            passed: outcome.passed.len(),
            high_quality: outcome.high_quality.len(),
        }
    }
}

/// Contents of `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// SHA-256 of the effective configuration.
    pub config_digest: String,
    pub interrupted: bool,
    pub rollouts: RolloutSummary,
    pub scoring: ScoringSummary,
    pub filter: FilterSummary,
    pub llm: GateStats,
}

/// Hex digest identifying a configuration in run summaries.
pub fn config_digest(config: &PipelineConfig) -> String {
    let json = serde_json::to_vec(config).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}

/// Coordinates rollout generation, judging, filtering and export.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    inputs: InputBundle,
    gate: Arc<RateLimitedProvider>,
    judge: QualityJudge,
    pool: WorkerPool,
}

impl PipelineOrchestrator {
    /// Builds LLM-backed simulators around `provider`.
    ///
    /// All model calls, simulator and judge alike, share one concurrency gate.
    pub fn new(
        config: PipelineConfig,
        inputs: InputBundle,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self, PipelineError> {
        let gate = Self::gate(&config, provider);
        let llm: Arc<dyn LlmProvider> = gate.clone();
        let user: Arc<dyn UserSimulator> = Arc::new(LlmUserSimulator::new(
            Arc::clone(&llm),
            config.models.user.clone(),
            config.completion_sentinel.clone(),
        ));
        let agent: Arc<dyn AgentSimulator> = Arc::new(LlmAgentSimulator::new(
            Arc::clone(&llm),
            config.models.agent.clone(),
        ));
        Self::build(config, inputs, gate, user, agent)
    }

    /// Uses the given user and agent simulators; tools and judge still go
    /// through `provider`.
    pub fn with_simulators(
        config: PipelineConfig,
        inputs: InputBundle,
        provider: Arc<dyn LlmProvider>,
        user: Arc<dyn UserSimulator>,
        agent: Arc<dyn AgentSimulator>,
    ) -> Result<Self, PipelineError> {
        let gate = Self::gate(&config, provider);
        Self::build(config, inputs, gate, user, agent)
    }

    fn gate(config: &PipelineConfig, provider: Arc<dyn LlmProvider>) -> Arc<RateLimitedProvider> {
        Arc::new(
            RateLimitedProvider::new(
                provider,
                config.max_concurrent_llm_calls,
                config.retry.clone(),
            )
            .with_call_timeout(config.call_timeout()),
        )
    }

    fn build(
        config: PipelineConfig,
        inputs: InputBundle,
        gate: Arc<RateLimitedProvider>,
        user: Arc<dyn UserSimulator>,
        agent: Arc<dyn AgentSimulator>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let llm: Arc<dyn LlmProvider> = gate.clone();

        let synthesizer: Arc<dyn ResultSynthesizer> = if config.llm_tool_results {
            Arc::new(LlmResultSynthesizer::new(
                Arc::clone(&llm),
                config.models.tool.clone(),
            ))
        } else {
            Arc::new(TemplateSynthesizer)
        };
        let coordinator = Arc::new(InteractionCoordinator::new(
            user,
            agent,
            synthesizer,
            config.coordinator_config(),
        ));

        Ok(Self {
            judge: QualityJudge::new(llm, config.judge_config()),
            pool: WorkerPool::new(config.max_workers, coordinator),
            config,
            inputs,
            gate,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn inputs(&self) -> &InputBundle {
        &self.inputs
    }

    /// Handle that stops the run, e.g. on Ctrl-C. Pending rollouts are
    /// skipped, in-flight ones cancelled, and judging stops after the
    /// scores already finished are written.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.pool.shutdown_handle()
    }

    /// Counters of the shared model-call gate.
    pub fn llm_stats(&self) -> GateStats {
        self.gate.stats()
    }

    /// Runs every stage and writes the full output directory.
    pub async fn run(&self, output: &OutputLayout) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        if self.inputs.tasks.is_empty() {
            return Err(PipelineError::NoTasks);
        }
        info!(
            output = %output.root().display(),
            tasks = self.inputs.tasks.len(),
            attempts_per_task = self.config.attempts_per_task,
            "Starting pipeline run"
        );

        let rollouts = self.generate(output).await?;
        let shutdown = self.pool.shutdown_handle();

        let scoring = if shutdown.is_triggered() {
            warn!("Shutdown requested, skipping the scoring stage");
            ScoringSummary::default()
        } else {
            self.score_corpus(&output.trajectories(), output).await?
        };
        let interrupted = shutdown.is_triggered();
        let filter = refilter(output, self.config.thresholds()).await?;

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            config_digest: config_digest(&self.config),
            interrupted,
            rollouts,
            scoring,
            filter,
            llm: self.gate.stats(),
        };
        write_json(&output.summary(), &summary).await?;
        info!(
            generated = summary.rollouts.generated,
            judged = summary.scoring.judged,
            passed = summary.filter.passed,
            high_quality = summary.filter.high_quality,
            interrupted = summary.interrupted,
            "Pipeline run finished"
        );
        Ok(summary)
    }

    /// Judges trajectories in `trajectories` that have no score yet in the
    /// output directory, then rebuilds the training files.
    pub async fn rescore(
        &self,
        trajectories: &Path,
        output: &OutputLayout,
    ) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        if !trajectories.exists() {
            return Err(PipelineError::MissingFile(trajectories.to_path_buf()));
        }
        let scoring = self.score_corpus(trajectories, output).await?;
        let filter = refilter(output, self.config.thresholds()).await?;
        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            config_digest: config_digest(&self.config),
            interrupted: self.pool.shutdown_handle().is_triggered(),
            rollouts: RolloutSummary::default(),
            scoring,
            filter,
            llm: self.gate.stats(),
        };
        write_json(&output.summary(), &summary).await?;
        Ok(summary)
    }

    async fn generate(&self, output: &OutputLayout) -> Result<RolloutSummary, PipelineError> {
        let mut writer = CorpusWriter::open(output.trajectories()).await?;
        let rollouts = self.inputs.rollouts(self.config.attempts_per_task);
        let planned = rollouts.len();

        let jobs: Vec<RolloutJob> = rollouts
            .into_iter()
            .filter(|r| !writer.contains(&r.trajectory_id()))
            .enumerate()
            .map(|(index, rollout)| RolloutJob::new(index, rollout))
            .collect();
        let resumed = planned - jobs.len();
        if resumed > 0 {
            info!(resumed = resumed, "Skipping rollouts already in the corpus");
        }

        let report = self.pool.run(jobs).await;

        let mut invalid_transcripts = 0;
        for trajectory in &report.trajectories {
            if let Err(e) = validate_transcript(trajectory, Some(self.config.max_turns)) {
                invalid_transcripts += 1;
                warn!(
                    trajectory_id = %trajectory.id,
                    task_id = %trajectory.task_id,
                    error = %e,
                    "Transcript failed validation"
                );
            }
        }
        let generated = writer.append(&report.trajectories, |t| t.id).await?;

        Ok(RolloutSummary {
            planned,
            resumed,
            generated,
            skipped: report.skipped.len(),
            panicked: report.panicked,
            invalid_transcripts,
            pool: Some(report.stats),
        })
    }

    async fn score_corpus(
        &self,
        trajectories: &Path,
        output: &OutputLayout,
    ) -> Result<ScoringSummary, PipelineError> {
        let corpus: Vec<Trajectory> = if trajectories.exists() {
            read_jsonl(trajectories).await?
        } else {
            Vec::new()
        };
        let mut writer = CorpusWriter::open(output.scores()).await?;
        let mut summary = ScoringSummary::default();

        let mut pending: Vec<(usize, &Trajectory, &Task)> = Vec::new();
        for (position, trajectory) in corpus.iter().enumerate() {
            if writer.contains(&trajectory.id) {
                continue;
            }
            match self.inputs.task(&trajectory.task_id) {
                Some(task) => pending.push((position, trajectory, task.as_ref())),
                None => {
                    summary.unknown_task += 1;
                    warn!(
                        trajectory_id = %trajectory.id,
                        task_id = %trajectory.task_id,
                        "No task for trajectory, not scoring"
                    );
                }
            }
        }
        info!(pending = pending.len(), "Judging trajectories");

        let judge = &self.judge;
        let shutdown = self.pool.shutdown_handle();
        let mut scored: Vec<(usize, Score)> = stream::iter(pending)
            .map(|(position, trajectory, task)| async move {
                (position, judge.score(trajectory, task).await)
            })
            .buffer_unordered(self.config.max_concurrent_llm_calls.max(1))
            .take_until(async move { shutdown.triggered().await })
            .collect()
            .await;
        if self.pool.shutdown_handle().is_triggered() {
            warn!(
                judged = scored.len(),
                "Shutdown requested, keeping the scores finished so far"
            );
        }
        scored.sort_by_key(|(position, _)| *position);
        let scores: Vec<Score> = scored.into_iter().map(|(_, s)| s).collect();

        for score in &scores {
            if score.valid {
                continue;
            }
            if score.metadata.attempts == 0 {
                summary.prefiltered += 1;
            } else {
                summary.invalid += 1;
            }
        }
        summary.judged = writer.append(&scores, |s| s.trajectory_id).await?;
        Ok(summary)
    }
}

/// Re-partitions every score in the output directory and rebuilds the
/// training files. Makes no model calls.
pub async fn refilter(
    output: &OutputLayout,
    thresholds: Thresholds,
) -> Result<FilterSummary, PipelineError> {
    let scores_path = output.scores();
    let scores: Vec<Score> = if scores_path.exists() {
        read_jsonl(&scores_path).await?
    } else {
        Vec::new()
    };
    let outcome = partition(&scores, thresholds);

    let trajectories_path = output.trajectories();
    let corpus: HashMap<Uuid, Trajectory> = if trajectories_path.exists() {
        read_jsonl::<Trajectory>(&trajectories_path)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect()
    } else {
        HashMap::new()
    };

    let to_records = |bucket: &[Score]| -> Vec<TrainingRecord> {
        bucket
            .iter()
            .filter_map(|score| {
                let Some(trajectory) = corpus.get(&score.trajectory_id) else {
                    warn!(trajectory_id = %score.trajectory_id, "Score without trajectory");
                    return None;
                };
                Some(TrainingRecord::from_trajectory(
                    trajectory,
                    score.aggregate,
                    score.quality_tags.clone(),
                    outcome.is_high_quality(&score.trajectory_id),
                ))
            })
            .collect()
    };
    write_jsonl(&output.passed(), &to_records(&outcome.passed)).await?;
    write_jsonl(&output.high_quality(), &to_records(&outcome.high_quality)).await?;

    let summary = FilterSummary::from_outcome(&outcome, thresholds);
    info!(
        total = summary.total,
        passed = summary.passed,
        high_quality = summary.high_quality,
        rejected = summary.rejected,
        "Filtered scores"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{GenerationRequest, GenerationResponse};
    use crate::simulation::{AgentTurn, UserUtterance};
    use crate::trajectory::{
        AgentConfig, AgentRecord, Message, Rubric, TerminationReason, ToolDefinition, UserPersona,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;
    use tempfile::TempDir;

    /// Answers every judge request with the same rubric scores.
    struct FixedJudge {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for FixedJudge {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerationResponse::from_text(
                "judge",
                r#"{"scores": {"task_completion": 5, "tool_usage": 4, "interaction_quality": 4}}"#,
            ))
        }
    }

    /// Scores like [`FixedJudge`] but requests shutdown on its first call.
    struct InterruptingJudge {
        shutdown: OnceLock<ShutdownHandle>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for InterruptingJudge {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = self.shutdown.get() {
                handle.trigger();
            }
            Ok(GenerationResponse::from_text(
                "judge",
                r#"{"scores": {"task_completion": 5, "tool_usage": 4, "interaction_quality": 4}}"#,
            ))
        }
    }

    struct TwoTurnUser;

    #[async_trait]
    impl UserSimulator for TwoTurnUser {
        async fn respond(
            &self,
            task: &Task,
            _persona: &UserPersona,
            history: &[Message],
        ) -> Result<UserUtterance, LlmError> {
            if history.is_empty() {
                Ok(UserUtterance::new(format!("Please help: {}", task.description)))
            } else {
                Ok(UserUtterance::new("finish conversation"))
            }
        }
    }

    struct PoliteAgent;

    #[async_trait]
    impl AgentSimulator for PoliteAgent {
        async fn act(
            &self,
            _agent: &AgentConfig,
            _history: &[Message],
        ) -> Result<AgentTurn, LlmError> {
            Ok(AgentTurn::new("Done, anything else?"))
        }
    }

    fn inputs() -> InputBundle {
        let tool = ToolDefinition {
            id: "t1".into(),
            name: "lookup".into(),
            description: "Look things up".into(),
            parameters: vec![],
            examples: vec![],
        };
        let agent = AgentRecord {
            id: "a1".into(),
            system_prompt: "You help.".into(),
            tools: vec!["t1".into()],
        };
        let tasks = ["k1", "k2"]
            .iter()
            .map(|id| Task {
                id: id.to_string(),
                agent_id: "a1".into(),
                title: String::new(),
                description: "look something up".into(),
                difficulty: Default::default(),
                expected_tools: vec![],
                rubric: Rubric::default(),
            })
            .collect();
        let persona = UserPersona {
            id: "p1".into(),
            name: String::new(),
            personality: Default::default(),
            style: Default::default(),
        };
        InputBundle::resolve(vec![tool], vec![agent], tasks, vec![persona]).expect("inputs")
    }

    fn orchestrator(config: PipelineConfig, judge: Arc<FixedJudge>) -> PipelineOrchestrator {
        PipelineOrchestrator::with_simulators(
            config,
            inputs(),
            judge,
            Arc::new(TwoTurnUser),
            Arc::new(PoliteAgent),
        )
        .expect("valid orchestrator")
    }

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default().with_max_workers(2);
        config.llm_tool_results = false;
        config
    }

    #[tokio::test]
    async fn test_run_writes_every_output_and_is_idempotent() {
        let dir = TempDir::new().expect("tempdir");
        let output = OutputLayout::new(dir.path());
        let judge = Arc::new(FixedJudge {
            calls: AtomicUsize::new(0),
        });

        let summary = orchestrator(config(), Arc::clone(&judge))
            .run(&output)
            .await
            .expect("run");
        assert_eq!(summary.rollouts.planned, 2);
        assert_eq!(summary.rollouts.generated, 2);
        assert_eq!(summary.rollouts.invalid_transcripts, 0);
        assert_eq!(summary.scoring.judged, 2);
        // 0.4 * 5 + 0.3 * 4 + 0.3 * 4 = 4.4
        assert_eq!(summary.filter.passed, 2);
        assert_eq!(summary.filter.high_quality, 0);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 2);

        let stored: Vec<Trajectory> = read_jsonl(&output.trajectories()).await.expect("read");
        assert!(stored
            .iter()
            .all(|t| t.termination == TerminationReason::GoalReached && t.turn_count == 2));
        let passed: Vec<TrainingRecord> = read_jsonl(&output.passed()).await.expect("read");
        assert_eq!(passed.len(), 2);
        assert!(output.summary().exists());

        // A rerun dispatches and judges nothing new.
        let again = orchestrator(config(), Arc::clone(&judge))
            .run(&output)
            .await
            .expect("rerun");
        assert_eq!(again.rollouts.resumed, 2);
        assert_eq!(again.rollouts.generated, 0);
        assert_eq!(again.scoring.judged, 0);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 2);
        let stored: Vec<Trajectory> = read_jsonl(&output.trajectories()).await.expect("read");
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_refilter_rebuilds_training_files() {
        let dir = TempDir::new().expect("tempdir");
        let output = OutputLayout::new(dir.path());
        let judge = Arc::new(FixedJudge {
            calls: AtomicUsize::new(0),
        });
        orchestrator(config(), Arc::clone(&judge))
            .run(&output)
            .await
            .expect("run");

        let strict = refilter(&output, Thresholds::new(4.5, 4.8)).await.expect("refilter");
        assert_eq!(strict.passed, 0);
        assert_eq!(strict.rejected, 2);
        let passed: Vec<TrainingRecord> = read_jsonl(&output.passed()).await.expect("read");
        assert!(passed.is_empty());

        let lenient = refilter(&output, Thresholds::new(3.0, 4.0)).await.expect("refilter");
        assert_eq!(lenient.high_quality, 2);
        let high: Vec<TrainingRecord> = read_jsonl(&output.high_quality()).await.expect("read");
        assert!(high.iter().all(|r| r.metadata.is_high_quality));
        assert_eq!(judge.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_interrupt_during_scoring_keeps_partial_scores() {
        let dir = TempDir::new().expect("tempdir");
        let output = OutputLayout::new(dir.path());
        let judge = Arc::new(InterruptingJudge {
            shutdown: OnceLock::new(),
            calls: AtomicUsize::new(0),
        });
        let interrupted = PipelineOrchestrator::with_simulators(
            config(),
            inputs(),
            Arc::clone(&judge) as Arc<dyn LlmProvider>,
            Arc::new(TwoTurnUser),
            Arc::new(PoliteAgent),
        )
        .expect("valid orchestrator");
        let _ = judge.shutdown.set(interrupted.shutdown_handle());

        let first = interrupted.run(&output).await.expect("run");
        assert!(first.interrupted);
        assert_eq!(first.rollouts.generated, 2);
        assert!(first.scoring.judged < 2);
        assert!(output.summary().exists());

        // The next run judges only what is still missing.
        let fixed = Arc::new(FixedJudge {
            calls: AtomicUsize::new(0),
        });
        let second = orchestrator(config(), Arc::clone(&fixed))
            .run(&output)
            .await
            .expect("rerun");
        assert!(!second.interrupted);
        assert_eq!(second.rollouts.generated, 0);
        assert_eq!(first.scoring.judged + second.scoring.judged, 2);
        assert_eq!(fixed.calls.load(Ordering::SeqCst), second.scoring.judged);
        assert_eq!(second.filter.total, 2);
    }

    #[tokio::test]
    async fn test_rescore_after_shutdown_makes_no_judge_calls() {
        let dir = TempDir::new().expect("tempdir");
        let output = OutputLayout::new(dir.path());
        let fixed = Arc::new(FixedJudge {
            calls: AtomicUsize::new(0),
        });
        let generated = orchestrator(config(), Arc::clone(&fixed));
        generated.run(&output).await.expect("run");

        let fresh = OutputLayout::new(dir.path().join("rescored"));
        let stopped = orchestrator(config(), Arc::clone(&fixed));
        stopped.shutdown_handle().trigger();
        let summary = stopped
            .rescore(&output.trajectories(), &fresh)
            .await
            .expect("rescore");

        assert!(summary.interrupted);
        assert_eq!(summary.scoring.judged, 0);
        assert_eq!(fixed.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rescore_requires_trajectory_file() {
        let dir = TempDir::new().expect("tempdir");
        let output = OutputLayout::new(dir.path());
        let judge = Arc::new(FixedJudge {
            calls: AtomicUsize::new(0),
        });
        let err = orchestrator(config(), judge)
            .rescore(&dir.path().join("missing.jsonl"), &output)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingFile(_)));
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let judge = Arc::new(FixedJudge {
            calls: AtomicUsize::new(0),
        });
        let result = PipelineOrchestrator::with_simulators(
            config().with_max_workers(0),
            inputs(),
            judge,
            Arc::new(TwoTurnUser),
            Arc::new(PoliteAgent),
        );
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_config_digest_tracks_changes() {
        let base = config_digest(&PipelineConfig::default());
        assert_eq!(base.len(), 64);
        assert_eq!(base, config_digest(&PipelineConfig::default()));
        assert_ne!(base, config_digest(&PipelineConfig::default().with_seed(7)));
    }
}

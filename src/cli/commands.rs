//! CLI command definitions for trajforge.
//!
//! Every command layers configuration the same way: defaults, then the
//! optional `--config` YAML file, then environment variables, then flags.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::llm::{LiteLlmClient, LlmProvider};
use crate::pipeline::{
    refilter, InputBundle, OutputLayout, PipelineConfig, PipelineOrchestrator, RunSummary,
};
use crate::scheduler::ShutdownHandle;

/// Default output directory for generated corpora.
const DEFAULT_OUTPUT_DIR: &str = "./trajectories";

/// Conventional exit status after SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Multi-turn agent trajectory generator.
#[derive(Parser)]
#[command(name = "trajforge")]
#[command(about = "Simulate user/agent/tool conversations and turn them into training data")]
#[command(version)]
#[command(
    long_about = "trajforge simulates conversations between a synthetic user, a tool-using agent and simulated tools, scores each conversation with a rubric judge and keeps the ones above threshold.\n\nExample usage:\n  trajforge run --input ./data --output ./trajectories --workers 32"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate, judge and filter trajectories.
    Run(RunArgs),

    /// Judge an existing trajectories.jsonl again.
    Rescore(RescoreArgs),

    /// Re-partition existing scores with new thresholds. No model calls.
    Filter(FilterArgs),

    /// Check configuration and inputs without running anything.
    Validate(ValidateArgs),
}

/// Arguments for `trajforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding tools.json, agents.json, tasks.json and personas.json.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum user turns per conversation.
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Conversations in flight at once.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Seed for simulated tool outcomes.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Rollouts per task.
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Print the run summary as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `trajforge rescore`.
#[derive(Parser, Debug)]
pub struct RescoreArgs {
    /// Trajectories to judge.
    #[arg(short, long)]
    pub trajectories: PathBuf,

    /// Directory holding the input records; task rubrics come from here.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory for scores and training files.
    #[arg(short, long)]
    pub output: PathBuf,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the summary as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `trajforge filter`.
#[derive(Parser, Debug)]
pub struct FilterArgs {
    /// Output directory of an earlier run.
    #[arg(short, long)]
    pub output: PathBuf,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Minimum aggregate score to pass.
    #[arg(long)]
    pub pass_threshold: Option<f64>,

    /// Minimum aggregate score for the high-quality tier.
    #[arg(long)]
    pub high_quality_threshold: Option<f64>,

    /// Print the summary as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `trajforge validate`.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Directory holding the input records.
    #[arg(short, long)]
    pub input: PathBuf,

    /// YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Rescore(args) => run_rescore_command(args).await,
        Commands::Filter(args) => run_filter_command(args).await,
        Commands::Validate(args) => run_validate_command(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = PipelineConfig::load(path).with_context(|| match path {
        Some(p) => format!("Failed to load configuration from {}", p.display()),
        None => "Failed to load configuration from the environment".to_string(),
    })?;
    Ok(config)
}

fn load_inputs(dir: &Path) -> anyhow::Result<InputBundle> {
    InputBundle::load_dir(dir).with_context(|| format!("Invalid inputs in {}", dir.display()))
}

fn provider() -> anyhow::Result<Arc<dyn LlmProvider>> {
    let client = LiteLlmClient::from_env().context(
        "No model endpoint configured. Set LITELLM_API_BASE (and LITELLM_API_KEY) or OPENROUTER_API_KEY.",
    )?;
    info!(
        api_base = client.api_base(),
        model = client.default_model(),
        "Using model endpoint"
    );
    Ok(Arc::new(client))
}

/// First Ctrl-C stops the run and keeps finished work; a second exits at once.
fn install_interrupt_handler(handle: ShutdownHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, stopping (press Ctrl-C again to exit immediately)");
        handle.trigger();

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Second interrupt, exiting without writing a summary");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });
}

fn print_summary(summary: &RunSummary, output: &Path, json: bool) -> anyhow::Result<()> {
    if json {
        let text = serde_json::to_string_pretty(summary)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    if summary.interrupted {
        println!("! Run interrupted, finished work was kept");
    } else {
        println!("✓ Run completed");
    }
    println!("  Output dir: {}", output.display());
    let r = &summary.rollouts;
    if r.planned > 0 {
        println!(
            "  Rollouts: {} planned, {} generated, {} resumed, {} skipped",
            r.planned, r.generated, r.resumed, r.skipped
        );
    }
    if let Some(pool) = &r.pool {
        println!(
            "  Outcomes: {} completed, {} failed ({:.1}% success)",
            pool.completed,
            pool.failed,
            pool.success_rate()
        );
    }
    let s = &summary.scoring;
    println!(
        "  Scoring: {} judged, {} prefiltered, {} invalid",
        s.judged, s.prefiltered, s.invalid
    );
    let f = &summary.filter;
    println!(
        "  Filter: {} passed, {} high quality, {} rejected (of {})",
        f.passed, f.high_quality, f.rejected, f.total
    );
    println!(
        "  Model calls: {} ({} retries, {} timeouts)",
        summary.llm.calls, summary.llm.retries, summary.llm.timeouts
    );
    Ok(())
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(max_turns) = args.max_turns {
        config = config.with_max_turns(max_turns);
    }
    if let Some(workers) = args.workers {
        config = config.with_max_workers(workers);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(attempts) = args.attempts {
        config.attempts_per_task = attempts;
    }
    config.validate().context("Invalid configuration")?;

    let inputs = load_inputs(&args.input)?;
    let orchestrator = PipelineOrchestrator::new(config, inputs, provider()?)?;
    install_interrupt_handler(orchestrator.shutdown_handle());

    let layout = OutputLayout::new(&args.output);
    let summary = orchestrator.run(&layout).await?;
    print_summary(&summary, &args.output, args.json)
}

async fn run_rescore_command(args: RescoreArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate().context("Invalid configuration")?;

    let inputs = load_inputs(&args.input)?;
    let orchestrator = PipelineOrchestrator::new(config, inputs, provider()?)?;
    install_interrupt_handler(orchestrator.shutdown_handle());
    let layout = OutputLayout::new(&args.output);
    let summary = orchestrator.rescore(&args.trajectories, &layout).await?;
    print_summary(&summary, &args.output, args.json)
}

#[derive(Serialize)]
struct FilterOutput<'a> {
    output: &'a Path,
    #[serde(flatten)]
    summary: &'a crate::pipeline::FilterSummary,
}

async fn run_filter_command(args: FilterArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    let pass = args.pass_threshold.unwrap_or(config.pass_threshold);
    let high = args
        .high_quality_threshold
        .unwrap_or(config.high_quality_threshold);
    config = config.with_thresholds(pass, high);
    config.validate().context("Invalid thresholds")?;

    let layout = OutputLayout::new(&args.output);
    if !layout.scores().exists() {
        anyhow::bail!("No scores found at {}", layout.scores().display());
    }
    let summary = refilter(&layout, config.thresholds()).await?;

    if args.json {
        let text = serde_json::to_string_pretty(&FilterOutput {
            output: &args.output,
            summary: &summary,
        })?;
        println!("{}", text);
    } else {
        println!("✓ Filter completed");
        println!(
            "  Thresholds: pass {:.2}, high quality {:.2}",
            summary.thresholds.pass, summary.thresholds.high_quality
        );
        println!(
            "  {} passed, {} high quality, {} rejected (of {})",
            summary.passed, summary.high_quality, summary.rejected, summary.total
        );
    }
    Ok(())
}

fn run_validate_command(args: ValidateArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    config.validate().context("Invalid configuration")?;
    let inputs = load_inputs(&args.input)?;
    let rollouts = inputs.rollouts(config.attempts_per_task).len();

    println!("✓ Configuration and inputs are valid");
    println!(
        "  {} tasks, {} agents, {} personas",
        inputs.tasks.len(),
        inputs.agents.len(),
        inputs.personas.len()
    );
    println!(
        "  {} rollouts at {} attempt(s) per task",
        rollouts, config.attempts_per_task
    );
    Ok(())
}

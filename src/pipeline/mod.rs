//! End-to-end trajectory generation.
//!
//! # Pipeline Flow
//!
//! 1. **Inputs**: tools, agents, tasks and personas are loaded and resolved
//! 2. **Rollouts**: the worker pool drives one coordinator run per
//!    (task, attempt), skipping ids already in the corpus
//! 3. **Validation**: each transcript is checked against the turn-taking rules
//! 4. **Judging**: trajectories without a score are judged concurrently
//! 5. **Filtering**: all scores are partitioned by threshold
//! 6. **Export**: retained trajectories are written in training format
//!
//! # Example
//!
//! ```rust,ignore
//! use trajforge::llm::LiteLlmClient;
//! use trajforge::pipeline::{InputBundle, OutputLayout, PipelineConfig, PipelineOrchestrator};
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::load(None)?.with_max_workers(8);
//! let inputs = InputBundle::load_dir("data/")?;
//! let orchestrator =
//!     PipelineOrchestrator::new(config, inputs, Arc::new(LiteLlmClient::from_env()?))?;
//!
//! let summary = orchestrator.run(&OutputLayout::new("out/")).await?;
//! println!("{} passed, {} high quality", summary.filter.passed, summary.filter.high_quality);
//! ```
//!
//! # Output Directory
//!
//! | File | Contents |
//! |---|---|
//! | `trajectories.jsonl` | every finished trajectory |
//! | `scores.jsonl` | one judge score per trajectory |
//! | `training/passed.jsonl` | training records at or above the pass threshold |
//! | `training/high_quality.jsonl` | training records at or above the high-quality threshold |
//! | `summary.json` | counters of the last run |

pub mod config;
pub mod inputs;
pub mod orchestrator;

pub use config::{PipelineConfig, RoleModels};
pub use inputs::InputBundle;
pub use orchestrator::{
    config_digest, refilter, FilterSummary, OutputLayout, PipelineError, PipelineOrchestrator,
    RolloutSummary, RunSummary, ScoringSummary,
};

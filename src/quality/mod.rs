//! Scoring and filtering of completed trajectories.
//!
//! [`QualityJudge`] turns a trajectory and its task rubric into a [`Score`];
//! [`partition`] splits a batch of scores into rejected, passed and
//! high-quality buckets.

mod filter;
mod judge;

pub use filter::{partition, FilterOutcome, Thresholds, TAG_HIGH_QUALITY, TAG_PASSED};
pub use judge::{
    parse_criterion_score, parse_rubric_scores, render_transcript, AggregationPolicy,
    CriterionScore, JudgeConfig, JudgeMode, QualityJudge, Score, ScoreMetadata, MAX_SCORE,
};

//! Threshold partitioning of scores into the output corpus.
//!
//! Pure selection: the input scores are never modified, tagged copies are
//! returned instead.

use serde::Serialize;
use uuid::Uuid;

use super::judge::Score;

pub const TAG_PASSED: &str = "passed";
pub const TAG_HIGH_QUALITY: &str = "high_quality";

/// Score thresholds on the judge's scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub pass: f64,
    pub high_quality: f64,
}

impl Thresholds {
    pub fn new(pass: f64, high_quality: f64) -> Self {
        Self { pass, high_quality }
    }

    /// Tags earned by a score. Invalid scores earn none.
    pub fn tags_for(&self, score: &Score) -> Vec<&'static str> {
        let Some(aggregate) = score.usable_aggregate() else {
            return Vec::new();
        };
        if aggregate < self.pass {
            return Vec::new();
        }
        if aggregate >= self.high_quality {
            vec![TAG_PASSED, TAG_HIGH_QUALITY]
        } else {
            vec![TAG_PASSED]
        }
    }
}

/// Result of partitioning.
///
/// `rejected` and `passed` are disjoint and together hold every input;
/// `high_quality` is the subset of `passed` above the higher threshold.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub rejected: Vec<Score>,
    pub passed: Vec<Score>,
    pub high_quality: Vec<Score>,
}

impl FilterOutcome {
    /// Every input score, tagged, retained ones first.
    pub fn all(&self) -> impl Iterator<Item = &Score> {
        self.passed.iter().chain(self.rejected.iter())
    }

    pub fn passed_ids(&self) -> Vec<Uuid> {
        self.passed.iter().map(|s| s.trajectory_id).collect()
    }

    pub fn high_quality_ids(&self) -> Vec<Uuid> {
        self.high_quality.iter().map(|s| s.trajectory_id).collect()
    }

    pub fn is_high_quality(&self, id: &Uuid) -> bool {
        self.high_quality.iter().any(|s| s.trajectory_id == *id)
    }
}

/// Splits `scores` by threshold, preserving input order within each bucket.
pub fn partition(scores: &[Score], thresholds: Thresholds) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for score in scores {
        let tags = thresholds.tags_for(score);
        let tagged = score.with_tags(&tags);
        if tags.contains(&TAG_HIGH_QUALITY) {
            outcome.high_quality.push(tagged.clone());
        }
        if tags.is_empty() {
            outcome.rejected.push(tagged);
        } else {
            outcome.passed.push(tagged);
        }
    }
    outcome
}

//! Final suite score.

use crate::reducer::FAILED_SCORE;
use crate::stats::{round4, weighted_geometric_mean};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalScore {
    pub score: f64,
    pub status: Status,
}

impl FinalScore {
    pub fn failed() -> Self {
        Self {
            score: FAILED_SCORE,
            status: Status::Failed,
        }
    }
}

/// Benchmark scores and weights, in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreAccumulator {
    scores: Vec<f64>,
    weights: Vec<f64>,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, score: f64, weight: f64) {
        self.scores.push(score);
        self.weights.push(weight);
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Weighted geometric mean, optionally scaled, rounded to 4 decimals.
    /// A NaN result is a failure.
    pub fn combine(&self, scaling: Option<f64>) -> FinalScore {
        let mut value = weighted_geometric_mean(&self.scores, &self.weights);
        if let Some(s) = scaling {
            value *= s;
        }
        let value = round4(value);
        if value.is_nan() {
            FinalScore::failed()
        } else {
            FinalScore {
                score: value,
                status: Status::Success,
            }
        }
    }
}

//! Median selection and weighted geometric mean.

/// Round half away from zero to 4 decimal places.
pub fn round4(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

/// `exp(Σ wᵢ·ln vᵢ / Σ wᵢ)`.
///
/// Returns 0 when the slices differ in length or the weights sum to 0, and
/// NaN when any value is not strictly positive.
pub fn weighted_geometric_mean(values: &[f64], weights: &[f64]) -> f64 {
    if values.len() != weights.len() {
        return 0.0;
    }
    let total_weight: f64 = weights.iter().sum();
    if total_weight == 0.0 {
        return 0.0;
    }
    if values.iter().any(|v| *v <= 0.0 || v.is_nan()) {
        return f64::NAN;
    }
    let log_sum: f64 = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * v.ln())
        .sum();
    (log_sum / total_weight).exp()
}

/// Unweighted geometric mean.
pub fn geometric_mean(values: &[f64]) -> f64 {
    weighted_geometric_mean(values, &vec![1.0; values.len()])
}

/// Which run(s) a median came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MedianRuns {
    Single(u32),
    Pair(u32, u32),
}

impl MedianRuns {
    pub fn ids(&self) -> Vec<u32> {
        match *self {
            MedianRuns::Single(a) => vec![a],
            MedianRuns::Pair(a, b) => vec![a, b],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Median {
    pub value: f64,
    pub runs: MedianRuns,
}

/// Median of `(run id, score)` pairs, sorted by score.
///
/// Odd count: the middle value and its run. Even count: the mean of the two
/// middle values and both runs, lower score first. `None` when empty.
pub fn median_tuple(scores: &[(u32, f64)]) -> Option<Median> {
    if scores.is_empty() {
        return None;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        let (run, value) = sorted[mid];
        return Some(Median {
            value,
            runs: MedianRuns::Single(run),
        });
    }
    let (run_a, a) = sorted[mid - 1];
    let (run_b, b) = sorted[mid];
    Some(Median {
        value: (a + b) / 2.0,
        runs: MedianRuns::Pair(run_a, run_b),
    })
}

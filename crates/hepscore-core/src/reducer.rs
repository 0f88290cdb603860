//! Reduction of a benchmark's per-run JSON summaries to one score.
//!
//! Each run directory `<results>/<benchmark>/run<i>` may hold a summary file.
//! A run counts only if its summary parses, carries `app`, `run_info` and
//! `report.<score key>`, and reports every declared sub-benchmark. The
//! benchmark score is the median of the per-run scores, and only when the
//! number of valid runs equals the configured repetitions.

use crate::config::validate::as_float;
use crate::config::BenchmarkSpec;
use crate::error::RunParseError;
use crate::stats::{geometric_mean, median_tuple, round4, MedianRuns};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

pub const DEFAULT_SCORE_KEY: &str = "wl-scores";
pub const FAILED_SCORE: f64 = -1.0;

/// A summary that passed the structural checks.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run: u32,
    pub app: Value,
    pub run_info: Value,
    pub report: Value,
}

/// A run that contributes to the median.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRun {
    pub run: u32,
    /// Raw sub-scores as reported, keyed by sub-benchmark.
    pub raw: BTreeMap<String, f64>,
    pub score: f64,
}

/// Outcome of reducing one benchmark.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedScore {
    pub benchmark: String,
    /// Median score, or -1 when the benchmark failed.
    pub score: f64,
    pub selected: Option<MedianRuns>,
    /// Structurally valid summaries, by run index.
    pub summaries: BTreeMap<u32, RunSummary>,
    pub scored: Vec<ScoredRun>,
    /// `<sub>` (raw or pair average) and `<sub>_ref` entries.
    pub wl_scores: Map<String, Value>,
}

impl ReducedScore {
    pub fn failed(&self) -> bool {
        self.score < 0.0
    }

    /// `app` and `run_info` of the first structurally valid run.
    pub fn first_summary(&self) -> Option<&RunSummary> {
        self.summaries.values().next()
    }

    fn failure(benchmark: &str, summaries: BTreeMap<u32, RunSummary>, scored: Vec<ScoredRun>) -> Self {
        Self {
            benchmark: benchmark.to_string(),
            score: FAILED_SCORE,
            selected: None,
            summaries,
            scored,
            wl_scores: Map::new(),
        }
    }
}

/// Reads and reduces run summaries.
#[derive(Debug, Clone)]
pub struct ResultReducer {
    score_key: String,
}

impl Default for ResultReducer {
    fn default() -> Self {
        Self::new(DEFAULT_SCORE_KEY)
    }
}

impl ResultReducer {
    pub fn new(score_key: impl Into<String>) -> Self {
        Self {
            score_key: score_key.into(),
        }
    }

    /// Reduce the runs of `spec` found under `results_dir`.
    pub fn reduce(&self, results_dir: &Path, spec: &BenchmarkSpec, repetitions: u32) -> ReducedScore {
        let file_name = spec.summary_file();
        let mut summaries = BTreeMap::new();
        let mut scored = Vec::new();

        for (run, dir) in run_dirs(&results_dir.join(&spec.name)) {
            let path = dir.join(&file_name);
            if !path.is_file() {
                debug!(path = %path.display(), "no summary for run");
                continue;
            }
            let summary = match self.read_summary(&path, run) {
                Ok(s) => s,
                Err(e) => {
                    error!(benchmark = %spec.name, run = run, "{}", e);
                    continue;
                }
            };
            let result = self.score_run(&summary, spec);
            summaries.insert(run, summary);
            match result {
                Ok(s) => {
                    debug!(benchmark = %spec.name, run = run, score = s.score, "run scored");
                    scored.push(s);
                }
                Err(e) => error!(benchmark = %spec.name, run = run, "{}", e),
            }
        }

        if scored.is_empty() {
            warn!(benchmark = %spec.name, "no results: fail");
            return ReducedScore::failure(&spec.name, summaries, scored);
        }
        if scored.len() != repetitions as usize {
            error!(
                benchmark = %spec.name,
                "expected {} scores, got {}",
                repetitions,
                scored.len()
            );
            return ReducedScore::failure(&spec.name, summaries, scored);
        }

        let pairs: Vec<(u32, f64)> = scored.iter().map(|s| (s.run, s.score)).collect();
        let Some(median) = median_tuple(&pairs) else {
            return ReducedScore::failure(&spec.name, summaries, scored);
        };

        let wl_scores = selected_sub_scores(spec, &scored, median.runs);
        if scored.len() > 1 {
            debug!(benchmark = %spec.name, median = median.value, "median selected");
        }

        ReducedScore {
            benchmark: spec.name.clone(),
            score: median.value,
            selected: Some(median.runs),
            summaries,
            scored,
            wl_scores,
        }
    }

    /// Parse one summary file and check its required keys.
    pub fn read_summary(&self, path: &Path, run: u32) -> Result<RunSummary, RunParseError> {
        let text = std::fs::read_to_string(path).map_err(|source| RunParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut doc: Map<String, Value> =
            serde_json::from_str(&text).map_err(|source| RunParseError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let app = doc
            .remove("app")
            .ok_or_else(|| RunParseError::MissingKey("app".to_string()))?;
        let run_info = doc
            .remove("run_info")
            .ok_or_else(|| RunParseError::MissingKey("run_info".to_string()))?;
        let report = doc
            .remove("report")
            .ok_or_else(|| RunParseError::MissingKey("report".to_string()))?;
        if !report.get(&self.score_key).is_some_and(Value::is_object) {
            return Err(RunParseError::MissingKey(format!("report[{}]", self.score_key)));
        }

        Ok(RunSummary {
            run,
            app,
            run_info,
            report,
        })
    }

    /// Normalize each declared sub-score by its reference and combine them.
    pub fn score_run(&self, summary: &RunSummary, spec: &BenchmarkSpec) -> Result<ScoredRun, RunParseError> {
        let scores = &summary.report[&self.score_key];
        let run_name = format!("run{}", summary.run);

        let mut raw = BTreeMap::new();
        let mut normalized = Vec::with_capacity(spec.ref_scores.len());
        for (sub, reference) in &spec.ref_scores {
            let value = scores.get(sub).ok_or_else(|| RunParseError::MissingSubScore {
                sub_benchmark: sub.clone(),
                run: run_name.clone(),
            })?;
            let value = as_float(value).ok_or_else(|| RunParseError::NonNumericSubScore {
                sub_benchmark: sub.clone(),
                run: run_name.clone(),
            })?;
            raw.insert(sub.clone(), value);
            normalized.push(round4(value / reference));
        }

        let score = round4(geometric_mean(&normalized));
        if !score.is_finite() {
            return Err(RunParseError::NonFiniteScore(run_name));
        }
        Ok(ScoredRun {
            run: summary.run,
            raw,
            score,
        })
    }
}

/// `run<i>` directories under `bench_dir`, ordered by `i`.
pub fn run_dirs(bench_dir: &Path) -> Vec<(u32, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(bench_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<(u32, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name();
            let idx = name.to_str()?.strip_prefix("run")?.parse::<u32>().ok()?;
            Some((idx, e.path()))
        })
        .collect();
    dirs.sort_by_key(|(idx, _)| *idx);
    dirs
}

/// Sub-scores of the selected run, or for a pair the mean of both runs' raw
/// values per sub-benchmark, each with its reference alongside.
fn selected_sub_scores(spec: &BenchmarkSpec, scored: &[ScoredRun], runs: MedianRuns) -> Map<String, Value> {
    let lookup = |id: u32| scored.iter().find(|s| s.run == id);
    let mut out = Map::new();
    for (sub, reference) in &spec.ref_scores {
        let value = match runs {
            MedianRuns::Single(id) => lookup(id).and_then(|s| s.raw.get(sub)).copied(),
            MedianRuns::Pair(a, b) => {
                match (lookup(a).and_then(|s| s.raw.get(sub)), lookup(b).and_then(|s| s.raw.get(sub))) {
                    (Some(x), Some(y)) => Some((x + y) / 2.0),
                    _ => None,
                }
            }
        };
        if let Some(v) = value {
            out.insert(sub.clone(), Value::from(v));
        }
        out.insert(format!("{sub}_ref"), Value::from(*reference));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(refs: &[(&str, f64)]) -> BenchmarkSpec {
        BenchmarkSpec {
            name: "db12".to_string(),
            version: "v1.1".to_string(),
            weight: None,
            ref_scores: refs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            args: None,
            registry: None,
            results_file: None,
            gpu: None,
            extra: Map::new(),
        }
    }

    fn write_run(root: &Path, run: u32, body: &str) {
        let dir = root.join("db12").join(format!("run{run}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("db12_summary.json"), body).unwrap();
    }

    fn summary(score: f64) -> String {
        json!({"app": {"name": "db12"}, "run_info": {"copies": 1}, "report": {"wl-scores": {"db12": score}}})
            .to_string()
    }

    #[test]
    fn test_odd_median() {
        let tmp = tempfile::tempdir().unwrap();
        for (i, s) in [1.0, 1.2, 0.9].iter().enumerate() {
            write_run(tmp.path(), i as u32, &summary(*s));
        }
        let r = ResultReducer::default().reduce(tmp.path(), &spec(&[("db12", 1.0)]), 3);
        assert_eq!(r.score, 1.0);
        assert_eq!(r.selected, Some(MedianRuns::Single(0)));
        assert_eq!(r.wl_scores["db12"], 1.0);
        assert_eq!(r.wl_scores["db12_ref"], 1.0);
    }

    #[test]
    fn test_too_few_valid_runs() {
        let tmp = tempfile::tempdir().unwrap();
        write_run(tmp.path(), 0, &summary(1.0));
        write_run(tmp.path(), 1, &summary(1.1));
        write_run(tmp.path(), 2, "{not json");
        let r = ResultReducer::default().reduce(tmp.path(), &spec(&[("db12", 1.0)]), 3);
        assert_eq!(r.score, FAILED_SCORE);
        assert!(r.selected.is_none());
        assert_eq!(r.scored.len(), 2);
    }

    #[test]
    fn test_no_runs_at_all() {
        let tmp = tempfile::tempdir().unwrap();
        let r = ResultReducer::default().reduce(tmp.path(), &spec(&[("db12", 1.0)]), 1);
        assert!(r.failed());
    }

    #[test]
    fn test_missing_sub_score_invalidates_run() {
        let tmp = tempfile::tempdir().unwrap();
        write_run(tmp.path(), 0, &summary(2.0));
        let r = ResultReducer::default().reduce(tmp.path(), &spec(&[("db12", 1.0), ("other", 1.0)]), 1);
        assert!(r.failed());
        // structurally valid, so still reported
        assert!(r.summaries.contains_key(&0));
    }

    #[test]
    fn test_missing_required_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("s.json");
        let reducer = ResultReducer::default();
        for body in [
            json!({"run_info": {}, "report": {"wl-scores": {}}}),
            json!({"app": {}, "report": {"wl-scores": {}}}),
            json!({"app": {}, "run_info": {}}),
            json!({"app": {}, "run_info": {}, "report": {"other": {}}}),
            json!({"app": {}, "run_info": {}, "report": []}),
        ] {
            std::fs::write(&path, body.to_string()).unwrap();
            assert!(matches!(
                reducer.read_summary(&path, 0),
                Err(RunParseError::MissingKey(_))
            ));
        }
    }

    #[test]
    fn test_normalization_and_rounding() {
        let reducer = ResultReducer::default();
        let s = RunSummary {
            run: 0,
            app: json!({}),
            run_info: json!({}),
            report: json!({"wl-scores": {"gen": 30.0, "sim": 120.0}}),
        };
        let scored = reducer
            .score_run(&s, &spec(&[("gen", 10.0), ("sim", 40.0)]))
            .unwrap();
        assert_eq!(scored.score, 3.0);
    }

    #[test]
    fn test_zero_sub_score_is_rejected() {
        let reducer = ResultReducer::default();
        let s = RunSummary {
            run: 4,
            app: json!({}),
            run_info: json!({}),
            report: json!({"wl-scores": {"gen": 0.0}}),
        };
        assert!(matches!(
            reducer.score_run(&s, &spec(&[("gen", 10.0)])),
            Err(RunParseError::NonFiniteScore(_))
        ));
    }

    #[test]
    fn test_run_dirs_sorted_numerically() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["run10", "run2", "run0", "notarun", "runx"] {
            std::fs::create_dir_all(tmp.path().join(name)).unwrap();
        }
        let ids: Vec<u32> = run_dirs(tmp.path()).into_iter().map(|(i, _)| i).collect();
        assert_eq!(ids, vec![0, 2, 10]);
    }

    #[test]
    fn test_even_median_averages_raw_sub_scores() {
        // Two runs with two sub-benchmarks. The benchmark score is the mean of
        // the per-run geometric means, while the reported sub-scores are the
        // means of the raw values, which is a different statistic.
        let tmp = tempfile::tempdir().unwrap();
        let body = |a: f64, b: f64| {
            json!({"app": {}, "run_info": {}, "report": {"wl-scores": {"a": a, "b": b}}}).to_string()
        };
        write_run(tmp.path(), 0, &body(1.0, 1.0));
        write_run(tmp.path(), 1, &body(4.0, 16.0));
        let r = ResultReducer::default().reduce(tmp.path(), &spec(&[("a", 1.0), ("b", 1.0)]), 2);

        assert_eq!(r.selected, Some(MedianRuns::Pair(0, 1)));
        assert_eq!(r.score, (1.0 + 8.0) / 2.0);
        assert_eq!(r.wl_scores["a"], 2.5);
        assert_eq!(r.wl_scores["b"], 8.5);
        let from_subs = geometric_mean(&[2.5, 8.5]);
        assert_ne!(round4(from_subs), r.score);
    }
}

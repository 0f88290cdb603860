//! The final report: validated configuration annotated with results.

use crate::config::ValidatedConfig;
use crate::environment::EnvironmentSnapshot;
use crate::error::{HepscoreError, Result};
use crate::executor::BenchmarkOutcome;
use crate::scorer::{FinalScore, Status};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Output format of the report file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            other => Err(format!("output format must be 'json' or 'yaml', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
struct BenchmarkEntry {
    outcome: BenchmarkOutcome,
    scored: bool,
}

#[derive(Debug, Clone)]
pub struct FinalReport {
    config: ValidatedConfig,
    config_hash: String,
    version: String,
    replay: bool,
    environment: EnvironmentSnapshot,
    entries: Vec<BenchmarkEntry>,
    result: Option<FinalScore>,
    error: Option<String>,
}

impl FinalReport {
    pub fn new(
        config: ValidatedConfig,
        config_hash: String,
        version: impl Into<String>,
        environment: EnvironmentSnapshot,
        replay: bool,
    ) -> Self {
        Self {
            config,
            config_hash,
            version: version.into(),
            replay,
            environment,
            entries: Vec::new(),
            result: None,
            error: None,
        }
    }

    /// Record a finished benchmark. `scored` is true when its score entered
    /// the final mean, which also fixes its weight in the report.
    pub fn add_benchmark(&mut self, outcome: BenchmarkOutcome, scored: bool) {
        self.entries.push(BenchmarkEntry { outcome, scored });
    }

    /// Remember the first failing benchmark only.
    pub fn set_error(&mut self, benchmark: &str) {
        if self.error.is_none() {
            self.error = Some(benchmark.to_string());
        }
    }

    /// Stamp the end time and the final score. Later calls are ignored.
    pub fn finalize(&mut self, result: FinalScore) {
        if self.result.is_some() {
            return;
        }
        self.environment.finish();
        self.result = Some(result);
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn score(&self) -> Option<f64> {
        self.result.map(|r| r.score)
    }

    pub fn status(&self) -> Option<Status> {
        self.result.map(|r| r.status)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn environment(&self) -> &EnvironmentSnapshot {
        &self.environment
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &BenchmarkOutcome> {
        self.entries.iter().map(|e| &e.outcome)
    }

    /// Render the report document.
    pub fn to_document(&self) -> Result<Value> {
        let mut doc = match self.config.to_document()? {
            Value::Object(map) => map,
            _ => return Err(HepscoreError::Serialize("configuration is not a mapping".to_string())),
        };

        if let Some(Value::Object(settings)) = doc.get_mut("settings") {
            settings.insert("replay".to_string(), Value::Bool(self.replay));
        }

        let mut wl_scores = Map::new();
        if let Some(Value::Object(benchmarks)) = doc.get_mut("benchmarks") {
            for entry in &self.entries {
                let outcome = &entry.outcome;
                let Some(Value::Object(bench)) = benchmarks.get_mut(&outcome.benchmark) else {
                    continue;
                };
                annotate_benchmark(bench, entry);
                if outcome.reduced.selected.is_some() {
                    wl_scores.insert(
                        outcome.benchmark.clone(),
                        Value::Object(outcome.reduced.wl_scores.clone()),
                    );
                }
            }
        }

        let mut app_info = Map::new();
        app_info.insert("config_hash".to_string(), Value::from(self.config_hash.clone()));
        app_info.insert("hepscore_ver".to_string(), Value::from(self.version.clone()));
        doc.insert("app_info".to_string(), Value::Object(app_info));
        doc.insert("environment".to_string(), self.environment.to_value());
        doc.insert("wl-scores".to_string(), Value::Object(wl_scores));

        if let Some(result) = self.result {
            doc.insert("score".to_string(), Value::from(result.score));
            doc.insert("status".to_string(), Value::from(result.status.as_str()));
        }
        if let Some(err) = &self.error {
            doc.insert("error".to_string(), Value::from(err.clone()));
        }
        Ok(Value::Object(doc))
    }

    /// Serialize in `format`. YAML output is wrapped under `hepscore`.
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        let doc = self.to_document()?;
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(&doc)?),
            OutputFormat::Yaml => {
                let mut root = Map::new();
                root.insert(crate::config::ROOT_KEY.to_string(), doc);
                serde_yaml::to_string(&Value::Object(root)).map_err(|e| HepscoreError::Serialize(e.to_string()))
            }
        }
    }

    /// `<results>/<name>.<ext>`.
    pub fn default_path(&self, results_dir: &Path, format: OutputFormat) -> PathBuf {
        results_dir.join(format!("{}.{}", self.config.settings.name, format.extension()))
    }

    pub async fn write(&self, format: OutputFormat, path: &Path) -> Result<()> {
        if path.extension().and_then(|e| e.to_str()) != Some(format.extension()) {
            warn!(
                "{} output requested, but {} does not match",
                format.extension(),
                path.display()
            );
        }
        let text = self.render(format)?;
        tokio::fs::write(path, text)
            .await
            .map_err(|source| HepscoreError::Output {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("output file with detailed results: {}", path.display());
        Ok(())
    }
}

fn annotate_benchmark(bench: &mut Map<String, Value>, entry: &BenchmarkEntry) {
    let outcome = &entry.outcome;
    for record in &outcome.records {
        let mut run = match record.to_value() {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        if let Some(summary) = outcome.reduced.summaries.get(&record.attempt) {
            run.insert("report".to_string(), summary.report.clone());
        }
        bench.insert(format!("run{}", record.attempt), Value::Object(run));
    }
    // replayed results have no records but still carry their reports
    for (run, summary) in &outcome.reduced.summaries {
        let key = format!("run{run}");
        if !bench.contains_key(&key) {
            let mut m = Map::new();
            m.insert("report".to_string(), summary.report.clone());
            bench.insert(key, Value::Object(m));
        }
    }

    if let Some(first) = outcome.reduced.first_summary() {
        bench.insert("app".to_string(), first.app.clone());
        bench.insert("run_info".to_string(), first.run_info.clone());
    }
    if entry.scored && !bench.contains_key("weight") {
        bench.insert("weight".to_string(), Value::from(1.0));
    }
    if outcome.reduced.selected.is_some() {
        // references are reported next to the sub-scores in `wl-scores`
        bench.remove("ref_scores");
    }
}

//! In-memory stand-ins for the container engine, for tests and dry runs.

use crate::executor::{Invocation, OutputSink, ProcessLauncher};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::Mutex;

/// What one scripted `run` invocation does.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedRun {
    /// Exit 0 after writing this document as the run summary.
    Succeed(Value),
    /// Exit 0 without writing a summary.
    SucceedEmpty,
    /// Exit with the given non-zero code.
    Exit(i32),
    /// The process cannot be spawned.
    SpawnError,
}

impl ScriptedRun {
    /// A successful run whose summary carries `scores` under `wl-scores`.
    pub fn with_scores<'a>(scores: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        let scores: BTreeMap<&str, f64> = scores.into_iter().collect();
        ScriptedRun::Succeed(summary_document(&scores))
    }
}

/// A per-run summary with the keys the reducer requires.
pub fn summary_document(scores: &BTreeMap<&str, f64>) -> Value {
    json!({
        "app": {"name": "scripted", "version": "v1.0"},
        "run_info": {"copies": 1, "threads_per_copy": 1, "events_per_thread": 1},
        "report": {"wl-scores": scores},
    })
}

/// Replays scripted outcomes per benchmark and records every invocation.
///
/// A `run` invocation's benchmark is taken from its run directory
/// (`<results>/<benchmark>/run<i>`). Benchmarks without a remaining script
/// entry exit with 1. Every other invocation (image cleanup) exits with 0.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedRun>>>,
    summary_files: HashMap<String, String>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, benchmark: &str, runs: impl IntoIterator<Item = ScriptedRun>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(benchmark.to_string())
                .or_default()
                .extend(runs);
        }
        self
    }

    /// Write summaries of `benchmark` under `file` instead of the default.
    pub fn summary_file(mut self, benchmark: &str, file: &str) -> Self {
        self.summary_files.insert(benchmark.to_string(), file.to_string());
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Number of container `run` launches, spawn failures included.
    pub fn run_launches(&self) -> usize {
        self.invocations()
            .iter()
            .filter(|inv| is_run(inv))
            .count()
    }

    fn next_run(&self, benchmark: &str) -> ScriptedRun {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(benchmark).and_then(VecDeque::pop_front))
            .unwrap_or(ScriptedRun::Exit(1))
    }
}

fn is_run(inv: &Invocation) -> bool {
    inv.args.first().map(String::as_str) == Some("run")
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, invocation: &Invocation, run_dir: &Path, sink: &mut OutputSink) -> io::Result<i32> {
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(invocation.clone());
        }
        if !is_run(invocation) {
            return Ok(0);
        }

        let benchmark = run_dir
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        match self.next_run(&benchmark) {
            ScriptedRun::SpawnError => Err(io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure")),
            ScriptedRun::Exit(code) => {
                sink.push(format!("{benchmark}: scripted failure")).await;
                Ok(code)
            }
            ScriptedRun::SucceedEmpty => {
                sink.push(format!("{benchmark}: done")).await;
                Ok(0)
            }
            ScriptedRun::Succeed(summary) => {
                let file = self
                    .summary_files
                    .get(&benchmark)
                    .cloned()
                    .unwrap_or_else(|| format!("{benchmark}_summary.json"));
                let text = serde_json::to_vec_pretty(&summary).map_err(io::Error::other)?;
                tokio::fs::write(run_dir.join(file), text).await?;
                sink.push(format!("{benchmark}: done")).await;
                Ok(0)
            }
        }
    }
}

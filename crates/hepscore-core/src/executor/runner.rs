//! Runs every attempt of one benchmark and reduces its results.

use super::command::{image_reference, workload_args, ChildEnv, EngineFlags, Invocation, RunCommand};
use super::process::{OutputSink, ProcessLauncher};
use super::state::{AttemptOutcome, RunLoop, RunState};
use crate::config::{BenchmarkSpec, ContainerEngine};
use crate::error::{HepscoreError, Result};
use crate::obs;
use crate::power::PowerLog;
use crate::reducer::{ReducedScore, ResultReducer, FAILED_SCORE};
use crate::registry::strip_for;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const LOG_TAIL_LINES: usize = 100;
const STICKY_WORLD_WRITABLE: u32 = 0o1777;
const DIR_DEFAULT: u32 = 0o755;

/// Suite-wide facts every benchmark run needs.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub results_dir: PathBuf,
    pub suite_log: PathBuf,
    pub engine: ContainerEngine,
    /// Registry from settings, scheme prefix included.
    pub registry: String,
    pub flags: EngineFlags,
    /// Architecture suffix for image tags, when enabled.
    pub arch: Option<String>,
    pub repetitions: u32,
    pub retries: u32,
    pub ncores: u32,
    pub clean: bool,
    pub clean_files: bool,
    pub replay: bool,
}

impl RunContext {
    pub fn tmp_dir(&self) -> PathBuf {
        self.results_dir.join("tmp")
    }

    pub fn unpack_dir(&self) -> PathBuf {
        self.results_dir.join("unpack")
    }

    /// Singularity image cache, only used with `clean`.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        (self.clean && self.engine == ContainerEngine::Singularity).then(|| self.results_dir.join("scache"))
    }

    pub fn run_dir(&self, benchmark: &str, attempt: u32) -> PathBuf {
        self.results_dir.join(benchmark).join(format!("run{attempt}"))
    }

    pub fn child_env(&self) -> ChildEnv {
        ChildEnv::for_engine(self.engine, &self.unpack_dir(), self.cache_dir().as_deref())
    }
}

/// One launch attempt as recorded in the report.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub attempt: u32,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    /// `None` when the process could not be spawned.
    pub exit_status: Option<i32>,
    /// Captured output, oldest line first.
    pub output: Vec<String>,
}

impl RunRecord {
    /// Whole seconds, as differences of truncated timestamps.
    pub fn duration_secs(&self) -> i64 {
        self.end_at.timestamp() - self.start_at.timestamp()
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("start_at".to_string(), Value::from(self.start_at.to_rfc3339()));
        map.insert("end_at".to_string(), Value::from(self.end_at.to_rfc3339()));
        map.insert("duration".to_string(), Value::from(self.duration_secs()));
        map.insert(
            "exit_status".to_string(),
            self.exit_status.map(Value::from).unwrap_or(Value::Null),
        );
        Value::Object(map)
    }
}

/// Everything known about one benchmark once it finished.
#[derive(Debug, Clone)]
pub struct BenchmarkOutcome {
    pub benchmark: String,
    pub state: RunState,
    pub records: Vec<RunRecord>,
    pub reduced: ReducedScore,
}

impl BenchmarkOutcome {
    /// Reduced score, or -1 when retries ran out.
    pub fn score(&self) -> f64 {
        if self.state == RunState::RetryExhausted {
            FAILED_SCORE
        } else {
            self.reduced.score
        }
    }

    pub fn failed(&self) -> bool {
        self.score() < 0.0
    }
}

pub struct BenchmarkRunner<'a> {
    ctx: &'a RunContext,
    launcher: &'a dyn ProcessLauncher,
    reducer: ResultReducer,
}

impl<'a> BenchmarkRunner<'a> {
    pub fn new(ctx: &'a RunContext, launcher: &'a dyn ProcessLauncher) -> Self {
        Self {
            ctx,
            launcher,
            reducer: ResultReducer::default(),
        }
    }

    pub fn with_reducer(mut self, reducer: ResultReducer) -> Self {
        self.reducer = reducer;
        self
    }

    fn command_for(&self, spec: &BenchmarkSpec) -> RunCommand {
        let ctx = self.ctx;
        let registry = match &spec.registry {
            Some(r) => {
                info!(benchmark = %spec.name, "overriding registry for this container: {}", r);
                r.as_str()
            }
            None => ctx.registry.as_str(),
        };
        let registry = strip_for(ctx.engine, registry);
        RunCommand {
            engine: ctx.engine,
            tmp_dir: ctx.tmp_dir(),
            flags: ctx.flags,
            gpu: spec.uses_gpu(),
            image: image_reference(registry, spec, ctx.engine, ctx.arch.as_deref()),
            workload_args: workload_args(spec, ctx.clean_files, ctx.ncores),
            env: ctx.child_env(),
        }
    }

    /// Run all attempts of `spec`, then clean up and reduce its results.
    ///
    /// Errors are reserved for conditions that stop the whole suite; a
    /// benchmark that fails is reported through the returned outcome.
    pub async fn run(&self, spec: &BenchmarkSpec, power: &mut PowerLog) -> Result<BenchmarkOutcome> {
        let ctx = self.ctx;
        let command = self.command_for(spec);
        obs::emit_benchmark_started(&spec.name, &spec.version, ctx.repetitions);
        info!(
            "executing {} run{} of {} [{}]",
            ctx.repetitions,
            if ctx.repetitions == 1 { "" } else { "s" },
            spec.name,
            command.image
        );

        let mut sink = match OutputSink::open(&ctx.suite_log).await {
            Ok(sink) => sink,
            Err(e) => {
                error!("failure to open {}: {}", ctx.suite_log.display(), e);
                return Ok(self.finish(spec, RunState::RetryExhausted, Vec::new()));
            }
        };

        if let Some(cache) = ctx.cache_dir().filter(|_| !ctx.replay) {
            debug!("creating singularity cache {}", cache.display());
            tokio::fs::create_dir_all(&cache)
                .await
                .map_err(|source| HepscoreError::Prepare {
                    what: "singularity cache",
                    path: cache.clone(),
                    source,
                })?;
        }

        let mut run_loop = RunLoop::new(ctx.repetitions, ctx.retries);
        let mut records = Vec::new();
        while let Some(attempt) = run_loop.next_attempt() {
            let run_dir = ctx.run_dir(&spec.name, attempt);
            if !ctx.replay {
                self.prepare_run_dir(&run_dir).await?;
            }
            info!(benchmark = %spec.name, "starting run{}", attempt);

            power.mark_start(&spec.name, attempt);
            let record = self.attempt(&command, attempt, &run_dir, &mut sink).await;
            power.mark_end(&spec.name, attempt);

            let outcome = match record.exit_status {
                _ if ctx.replay => AttemptOutcome::Succeeded,
                Some(code) => AttemptOutcome::from_exit_code(code),
                None => AttemptOutcome::SpawnFailed,
            };
            obs::emit_attempt_finished(&spec.name, attempt, record.exit_status, record.duration_secs());
            records.push(record);

            run_loop = run_loop.record(outcome);
            if !outcome.is_success() {
                if run_loop.retries_exhausted() {
                    error!(benchmark = %spec.name, "retries exhausted");
                } else {
                    warn!(benchmark = %spec.name, "retrying...");
                }
            }
        }

        sink.close().await;
        self.cleanup(&command.image).await;

        Ok(self.finish(spec, run_loop.state(), records))
    }

    fn finish(&self, spec: &BenchmarkSpec, state: RunState, records: Vec<RunRecord>) -> BenchmarkOutcome {
        let reduced = self
            .reducer
            .reduce(&self.ctx.results_dir, spec, self.ctx.repetitions);
        let outcome = BenchmarkOutcome {
            benchmark: spec.name.clone(),
            state,
            records,
            reduced,
        };
        obs::emit_benchmark_finished(&spec.name, outcome.score(), outcome.failed());
        outcome
    }

    async fn prepare_run_dir(&self, run_dir: &Path) -> Result<()> {
        let prepare = |source| HepscoreError::Prepare {
            what: "run directory",
            path: run_dir.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(run_dir).await.map_err(prepare)?;
        if self.ctx.engine == ContainerEngine::Docker {
            set_mode(run_dir, STICKY_WORLD_WRITABLE).await.map_err(prepare)?;
        }
        Ok(())
    }

    async fn attempt(&self, command: &RunCommand, attempt: u32, run_dir: &Path, sink: &mut OutputSink) -> RunRecord {
        let start_at = Utc::now();
        if self.ctx.replay {
            return RunRecord {
                attempt,
                start_at,
                end_at: Utc::now(),
                exit_status: Some(0),
                output: Vec::new(),
            };
        }

        let invocation = command.for_run(run_dir);
        debug!("running {}", invocation);
        let result = self.launcher.launch(&invocation, run_dir, sink).await;

        if self.ctx.engine == ContainerEngine::Docker {
            if let Err(e) = set_mode(run_dir, DIR_DEFAULT).await {
                warn!("failed to restore permissions on {}: {}", run_dir.display(), e);
            }
        }

        let code = match result {
            Ok(code) => code,
            Err(e) => {
                error!("failure to execute: {} ({})", invocation, e);
                return RunRecord {
                    attempt,
                    start_at,
                    end_at: start_at,
                    exit_status: None,
                    output: sink.take_lines(),
                };
            }
        };

        self.log_exit_code(code);
        if code != 0 {
            error!("{} output logs:", self.ctx.engine);
            for line in sink.tail(LOG_TAIL_LINES) {
                error!("{}", line);
            }
        }

        let output = sink.take_lines();
        let log_path = run_dir.join(format!("{}_logs", self.ctx.engine));
        let mut text = output.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        if let Err(e) = tokio::fs::write(&log_path, text).await {
            warn!("failed to write logs to {}: {}", log_path.display(), e);
        }

        RunRecord {
            attempt,
            start_at,
            end_at: Utc::now(),
            exit_status: Some(code),
            output,
        }
    }

    fn log_exit_code(&self, code: i32) {
        let engine = self.ctx.engine;
        match code {
            0 => debug!("{} terminated without errors", engine),
            137 if engine == ContainerEngine::Docker => {
                error!("{} returned code 137: OOM-kill or intervention", engine)
            }
            _ => error!("{} returned code {}", engine, code),
        }
    }

    /// Remove the pulled image (docker) or the private cache (singularity).
    async fn cleanup(&self, image: &str) {
        let ctx = self.ctx;
        if !ctx.clean || ctx.replay {
            return;
        }
        match ctx.engine {
            ContainerEngine::Docker => {
                info!("deleting docker image {}", image);
                let inv = Invocation::new("docker").args(["rmi", "-f", image]);
                let mut sink = OutputSink::in_memory();
                match self.launcher.launch(&inv, &ctx.results_dir, &mut sink).await {
                    Ok(0) => {}
                    Ok(code) => warn!("docker rmi exited with {}", code),
                    Err(e) => error!("failed to clean docker images: {}", e),
                }
            }
            ContainerEngine::Singularity => {
                let Some(cache) = ctx.cache_dir() else { return };
                if !is_removable_cache(&cache, &ctx.results_dir) {
                    error!("invalid cache path specified, skipping cleanup");
                    return;
                }
                debug!("removing temporary singularity cache {}", cache.display());
                if let Err(e) = tokio::fs::remove_dir_all(&cache).await {
                    error!("failed to clean up singularity cache at {}: {}", cache.display(), e);
                }
            }
        }
    }
}

/// The cache may only be deleted when it is `<results>/.../scache`.
fn is_removable_cache(cache: &Path, results_dir: &Path) -> bool {
    cache != Path::new("/") && cache.ends_with("scache") && cache.starts_with(results_dir)
}

async fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

//! Structured observability hooks for the benchmark suite lifecycle.
//!
//! Every helper emits one `tracing` event carrying an `event = "..."` field
//! so log pipelines can filter on lifecycle transitions without parsing
//! free-form messages.

use tracing::{info, warn};

/// RAII guard that enters a suite-scoped tracing span.
///
/// ```ignore
/// let _span = SuiteSpan::enter("HEPscore23", "3f2a…");
/// // every event below carries suite and config_hash
/// ```
pub struct SuiteSpan {
    _span: tracing::span::EnteredSpan,
}

impl SuiteSpan {
    pub fn enter(suite: &str, config_hash: &str) -> Self {
        let short = &config_hash[..12.min(config_hash.len())];
        let span = tracing::info_span!("hepscore.suite", suite = %suite, config_hash = %short);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_suite_started(suite: &str, benchmarks: usize, replay: bool) {
    info!(
        event = "suite.started",
        suite = %suite,
        benchmarks = benchmarks,
        replay = replay,
    );
}

pub fn emit_benchmark_started(benchmark: &str, version: &str, repetitions: u32) {
    info!(
        event = "benchmark.started",
        benchmark = %benchmark,
        version = %version,
        repetitions = repetitions,
    );
}

/// Emit event: one launch attempt finished. `exit_status` is `None` when the
/// process could not be spawned at all.
pub fn emit_attempt_finished(benchmark: &str, attempt: u32, exit_status: Option<i32>, duration_secs: i64) {
    match exit_status {
        Some(0) => info!(
            event = "attempt.finished",
            benchmark = %benchmark,
            attempt = attempt,
            exit_status = 0,
            duration_secs = duration_secs,
        ),
        Some(code) => warn!(
            event = "attempt.finished",
            benchmark = %benchmark,
            attempt = attempt,
            exit_status = code,
            duration_secs = duration_secs,
        ),
        None => warn!(
            event = "attempt.spawn_failed",
            benchmark = %benchmark,
            attempt = attempt,
        ),
    }
}

pub fn emit_benchmark_finished(benchmark: &str, score: f64, failed: bool) {
    info!(
        event = "benchmark.finished",
        benchmark = %benchmark,
        score = score,
        failed = failed,
    );
}

pub fn emit_suite_finished(suite: &str, score: f64, status: &str, duration_secs: i64) {
    info!(
        event = "suite.finished",
        suite = %suite,
        score = score,
        status = %status,
        duration_secs = duration_secs,
    );
}

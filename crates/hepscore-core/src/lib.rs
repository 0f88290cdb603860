//! HEPscore Core Library
//!
//! Runs containerized HEP workloads in sequence, reduces repeated runs to a
//! median score per workload and combines the workload scores into a single
//! weighted geometric mean.

pub mod config;
pub mod digest;
pub mod environment;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod obs;
pub mod power;
pub mod reducer;
pub mod registry;
pub mod report;
pub mod scorer;
pub mod stats;
pub mod suite;
pub mod telemetry;

pub use config::{
    list_named, load_str, named_path, read_config, validate, BenchmarkSpec, ContainerEngine,
    LoadedConfig, RunOptions, ScoreMethod, Settings, UriScheme, ValidatedConfig,
    ValidationContext, ROOT_KEY,
};
pub use digest::{canonical_json, compute_digest, config_fingerprint, image_list_digest, sha256_hex};
pub use environment::{EngineProfile, EnvironmentSnapshot};
pub use error::{ConfigError, HepscoreError, PowerError, RegistryError, Result, RunParseError};
pub use executor::{
    AttemptOutcome, BenchmarkOutcome, BenchmarkRunner, ContainerLauncher, Invocation,
    OutputSink, ProcessLauncher, RunContext, RunLoop, RunRecord, RunState,
};
pub use fakes::{ScriptedLauncher, ScriptedRun};
pub use obs::{
    emit_attempt_finished, emit_benchmark_finished, emit_benchmark_started,
    emit_suite_finished, emit_suite_started, SuiteSpan,
};
pub use power::{HttpPowerProbe, PowerLog, PowerPoller, PowerProbe, PowerSample};
pub use reducer::{ReducedScore, ResultReducer, DEFAULT_SCORE_KEY, FAILED_SCORE};
pub use registry::{RegistryList, RegistryResolver};
pub use report::{FinalReport, OutputFormat};
pub use scorer::{FinalScore, ScoreAccumulator, Status};
pub use stats::{geometric_mean, median_tuple, weighted_geometric_mean, Median, MedianRuns};
pub use suite::{Hepscore, SuiteOutcome, POWER_FILE};
pub use telemetry::init_tracing;

/// HEPscore version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

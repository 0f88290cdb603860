//! Error taxonomy for HEPscore.
//!
//! Configuration and registry errors are fatal before any benchmark runs.
//! Per-run parse errors never leave the reducer. Output errors get their own
//! variant so callers can map them to a distinct exit path.

use std::path::PathBuf;

/// Errors produced while loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required 'hepscore' key not in configuration")]
    MissingRoot,

    #[error("configuration root must be a mapping")]
    NotAMapping,

    #[error("{0} section must be defined")]
    MissingSection(&'static str),

    #[error("{0} must be specified in settings")]
    MissingSetting(&'static str),

    #[error("only 'geometric_mean' method is currently supported, got '{0}'")]
    UnsupportedMethod(String),

    #[error("'{key}' configuration parameter must be a non-negative integer, got {value}")]
    InvalidCount { key: &'static str, value: String },

    #[error("'{key}' configuration parameter must be a {expected}")]
    InvalidSetting {
        key: &'static str,
        expected: &'static str,
    },

    #[error("container engine '{0}' not understood")]
    UnsupportedEngine(String),

    #[error("illegal character in registry '{0}'")]
    IllegalRegistry(String),

    #[error("no benchmarks specified")]
    NoBenchmarks,

    #[error("benchmark entry for {0} must be a mapping")]
    BenchmarkNotAMapping(String),

    #[error("illegal character in benchmark name {0}")]
    IllegalBenchmarkName(String),

    #[error("missing required benchmark option for {benchmark} - {option}")]
    MissingBenchmarkOption {
        benchmark: String,
        option: &'static str,
    },

    #[error("benchmark option {option} for {benchmark} must be {expected}")]
    InvalidBenchmarkOption {
        benchmark: String,
        option: &'static str,
        expected: &'static str,
    },

    #[error("ref_scores missing for {0}")]
    MissingRefScores(String),

    #[error("ref_score {sub_benchmark} for {benchmark} must be a float greater than zero")]
    InvalidRefScore {
        benchmark: String,
        sub_benchmark: String,
    },

    #[error("invalid 'weight' specified for {benchmark}: {value}. Must be a float")]
    InvalidWeight { benchmark: String, value: String },

    #[error("illegal character in results_file - {0}")]
    IllegalResultsFile(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("cannot read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse configuration YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid options section: {0}")]
    InvalidOptions(#[source] serde_json::Error),

    #[error("configuration is not representable as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors produced while resolving a registry for a container engine.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("illegal format for registry, use string or list of strings: {0}")]
    InvalidFormat(String),

    #[error("requested container_uri '{scheme}' not supported by container engine '{engine}'")]
    UnsupportedScheme { scheme: String, engine: String },

    #[error("URI specification unavailable in registry list {registries:?}; supported/requested registry types: {schemes:?}")]
    NoMatch {
        registries: Vec<String>,
        schemes: Vec<String>,
    },
}

/// Reasons a single run's result summary is discarded.
#[derive(Debug, thiserror::Error)]
pub enum RunParseError {
    #[error("failure reading from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("required key '{0}' not in JSON")]
    MissingKey(String),

    #[error("sub-score not reported for {sub_benchmark} in {run}")]
    MissingSubScore { sub_benchmark: String, run: String },

    #[error("sub-score {sub_benchmark} in {run} is not numeric")]
    NonNumericSubScore { sub_benchmark: String, run: String },

    #[error("score for {0} is not a finite number")]
    NonFiniteScore(String),
}

/// Failures reading one power telemetry sample.
#[derive(Debug, thiserror::Error)]
pub enum PowerError {
    #[error("power endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("power endpoint {endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("power endpoint {endpoint} returned a non-numeric reading: {body}")]
    Parse { endpoint: String, body: String },
}

/// Top-level errors returned by the suite runner and report writer.
#[derive(Debug, thiserror::Error)]
pub enum HepscoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("results directory {0} is not empty")]
    ResultsDirNotEmpty(PathBuf),

    #[error("failed to prepare {what} at {path}: {source}")]
    Prepare {
        what: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write summary output {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid output object: {0}")]
    Serialize(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for HEPscore operations.
pub type Result<T> = std::result::Result<T, HepscoreError>;

//! Strongly typed benchmark configuration.
//!
//! Values of these types only come out of [`crate::config::validate`]; they
//! are immutable once built and serialize back to the same document shape
//! they were validated from, which is what the fingerprint is computed over.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Container engine used to launch workloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerEngine {
    Docker,
    #[default]
    Singularity,
}

impl ContainerEngine {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerEngine::Docker => "docker",
            ContainerEngine::Singularity => "singularity",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "docker" => Some(ContainerEngine::Docker),
            "singularity" => Some(ContainerEngine::Singularity),
            _ => None,
        }
    }

    /// URI schemes the engine can pull from, in resolution priority order.
    pub fn supported_schemes(&self) -> &'static [UriScheme] {
        match self {
            ContainerEngine::Docker => &[UriScheme::Docker],
            ContainerEngine::Singularity => &[
                UriScheme::Oras,
                UriScheme::Docker,
                UriScheme::Shub,
                UriScheme::Dir,
                UriScheme::Https,
            ],
        }
    }

    /// Scheme prefixes the engine's command line does not accept verbatim.
    pub fn stripped_schemes(&self) -> &'static [UriScheme] {
        match self {
            ContainerEngine::Docker => &[UriScheme::Docker],
            ContainerEngine::Singularity => &[UriScheme::Dir],
        }
    }
}

impl fmt::Display for ContainerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registry URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UriScheme {
    Oras,
    Docker,
    Shub,
    Dir,
    Https,
}

impl UriScheme {
    pub const ALL: [UriScheme; 5] = [
        UriScheme::Oras,
        UriScheme::Docker,
        UriScheme::Shub,
        UriScheme::Dir,
        UriScheme::Https,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            UriScheme::Oras => "oras",
            UriScheme::Docker => "docker",
            UriScheme::Shub => "shub",
            UriScheme::Dir => "dir",
            UriScheme::Https => "https",
        }
    }

    /// `oras://`, `docker://`, ...
    pub fn prefix(&self) -> String {
        format!("{}://", self.name())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == value)
    }

    /// Scheme of a registry string, if it starts with a known prefix.
    pub fn of(registry: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| registry.starts_with(&s.prefix()))
    }
}

impl fmt::Display for UriScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Score combination method. Only one is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreMethod {
    #[default]
    #[serde(rename = "geometric_mean")]
    GeometricMean,
}

/// Shared settings of a validated configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub name: String,
    pub method: ScoreMethod,
    pub repetitions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Registry resolved for the active engine, scheme prefix included.
    pub registry: String,
    pub reference_machine: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_exec: Option<ContainerEngine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addarch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scaling: Option<f64>,
    /// Core pinning; 0 means unset, including when it equals the host's cores.
    pub ncores: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_fail: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    pub fn engine(&self) -> ContainerEngine {
        self.container_exec.unwrap_or_default()
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(0)
    }

    pub fn continue_on_failure(&self) -> bool {
        self.continue_fail.unwrap_or(false)
    }

    pub fn add_arch(&self) -> bool {
        self.addarch.unwrap_or(false)
    }
}

/// One workload of the suite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkSpec {
    #[serde(skip)]
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    pub ref_scores: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
    /// Per-benchmark registry override, resolved like the settings registry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BenchmarkSpec {
    pub fn weight_or_default(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }

    /// File name of the per-run JSON summary.
    pub fn summary_file(&self) -> String {
        self.results_file
            .clone()
            .unwrap_or_else(|| format!("{}_summary.json", self.name))
    }

    pub fn uses_gpu(&self) -> bool {
        self.gpu.unwrap_or(false)
    }
}

/// A configuration that passed validation, with benchmarks in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedConfig {
    pub settings: Settings,
    pub benchmarks: Vec<BenchmarkSpec>,
    /// Unrecognised top-level keys, carried into the report untouched.
    pub extra: Map<String, Value>,
}

impl ValidatedConfig {
    pub fn engine(&self) -> ContainerEngine {
        self.settings.engine()
    }

    pub fn benchmark(&self, name: &str) -> Option<&BenchmarkSpec> {
        self.benchmarks.iter().find(|b| b.name == name)
    }

    /// Render back to the `settings` + `benchmarks` document shape.
    pub fn to_document(&self) -> serde_json::Result<Value> {
        let mut doc = Map::new();
        doc.insert("settings".to_string(), serde_json::to_value(&self.settings)?);

        let mut benchmarks = Map::new();
        for bench in &self.benchmarks {
            benchmarks.insert(bench.name.clone(), serde_json::to_value(bench)?);
        }
        doc.insert("benchmarks".to_string(), Value::Object(benchmarks));

        for (key, value) in &self.extra {
            doc.insert(key.clone(), value.clone());
        }
        Ok(Value::Object(doc))
    }
}

/// Ephemeral run options. Never part of the configuration fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub container_uri: Option<UriScheme>,
    pub ncores: Option<u32>,
    pub registry: Option<Value>,
    pub clean: bool,
    pub clean_files: bool,
    pub userns: bool,
    pub replay: bool,
    pub power_endpoints: Vec<String>,
    pub power_interval_secs: Option<u64>,
}

impl RunOptions {
    pub const DEFAULT_POWER_INTERVAL_SECS: u64 = 5;

    pub fn power_interval_secs(&self) -> u64 {
        self.power_interval_secs
            .filter(|s| *s > 0)
            .unwrap_or(Self::DEFAULT_POWER_INTERVAL_SECS)
    }
}

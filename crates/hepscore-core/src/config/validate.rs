//! Configuration validation.
//!
//! [`validate`] walks the `settings` + `benchmarks` document once and either
//! returns a [`ValidatedConfig`] or the first [`ConfigError`] found. The input
//! is never modified. Registries are resolved for the active engine, disabled
//! benchmarks (names starting with `.`) are dropped and `ncores` equal to the
//! host's core count is stored as 0.

use super::types::{BenchmarkSpec, ContainerEngine, ScoreMethod, Settings, UriScheme, ValidatedConfig};
use crate::error::ConfigError;
use crate::registry::{RegistryList, RegistryResolver};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, info};

const REQUIRED_SETTINGS: [&str; 5] = ["method", "repetitions", "name", "registry", "reference_machine"];

const KNOWN_SETTINGS: [&str; 11] = [
    "name",
    "method",
    "repetitions",
    "retries",
    "registry",
    "reference_machine",
    "container_exec",
    "addarch",
    "scaling",
    "ncores",
    "continue_fail",
];

const KNOWN_BENCHMARK_KEYS: [&str; 7] = [
    "version",
    "weight",
    "ref_scores",
    "args",
    "registry",
    "results_file",
    "gpu",
];

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]*$").expect("valid regex literal"))
}

fn registry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9:/_.~-]*$").expect("valid regex literal"))
}

/// Benchmark names and argument tokens: letters, digits, `_` and `-`.
pub fn is_safe_name(value: &str) -> bool {
    name_re().is_match(value)
}

/// Registry URIs and result file names: a letter, then `[A-Za-z0-9:/_.~-]`.
pub fn is_safe_path(value: &str) -> bool {
    registry_re().is_match(value)
}

/// Host facts and run options that influence validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub container_uri: Option<UriScheme>,
    pub host_cores: u32,
}

impl ValidationContext {
    pub fn new(container_uri: Option<UriScheme>, host_cores: u32) -> Self {
        Self {
            container_uri,
            host_cores,
        }
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::new(None, crate::environment::available_cores())
    }
}

/// Validate a configuration document (the content under the root key, with
/// `options` already split off).
pub fn validate(doc: &Value, ctx: &ValidationContext) -> Result<ValidatedConfig, ConfigError> {
    let root = doc.as_object().ok_or(ConfigError::NotAMapping)?;

    let settings = root
        .get("settings")
        .ok_or(ConfigError::MissingSection("settings"))?
        .as_object()
        .ok_or(ConfigError::MissingSection("settings"))?;
    let benchmarks = root
        .get("benchmarks")
        .ok_or(ConfigError::MissingSection("benchmarks"))?
        .as_object()
        .ok_or(ConfigError::MissingSection("benchmarks"))?;

    let settings = validate_settings(settings, ctx)?;
    let resolver = RegistryResolver::new(settings.engine(), ctx.container_uri);

    let mut specs = Vec::with_capacity(benchmarks.len());
    for (name, entry) in benchmarks {
        if name.starts_with('.') {
            info!("{} is commented out: skipping this benchmark", name);
            continue;
        }
        specs.push(validate_benchmark(name, entry, &resolver)?);
    }
    if specs.is_empty() {
        return Err(ConfigError::NoBenchmarks);
    }

    let extra: Map<String, Value> = root
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "settings" | "benchmarks" | "options"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let validated = ValidatedConfig {
        settings,
        benchmarks: specs,
        extra,
    };
    debug!(
        benchmarks = validated.benchmarks.len(),
        engine = %validated.engine(),
        registry = %validated.settings.registry,
        "configuration validated"
    );
    Ok(validated)
}

fn validate_settings(raw: &Map<String, Value>, ctx: &ValidationContext) -> Result<Settings, ConfigError> {
    for key in REQUIRED_SETTINGS {
        if !raw.contains_key(key) {
            return Err(ConfigError::MissingSetting(key));
        }
    }

    let method = match raw.get("method") {
        Some(Value::String(m)) if m == "geometric_mean" => ScoreMethod::GeometricMean,
        Some(other) => return Err(ConfigError::UnsupportedMethod(display_scalar(other))),
        None => return Err(ConfigError::MissingSetting("method")),
    };

    let repetitions = count(raw, "repetitions")?.unwrap_or(0);
    let retries = count(raw, "retries")?;

    let name = match raw.get("name") {
        Some(Value::String(s)) => s.clone(),
        _ => {
            return Err(ConfigError::InvalidSetting {
                key: "name",
                expected: "string",
            })
        }
    };

    let container_exec = match raw.get("container_exec") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            Some(ContainerEngine::parse(s).ok_or_else(|| ConfigError::UnsupportedEngine(s.clone()))?)
        }
        Some(other) => return Err(ConfigError::UnsupportedEngine(other.to_string())),
    };
    let engine = container_exec.unwrap_or_default();

    let registry = resolve_registry(raw.get("registry"), engine, ctx.container_uri)?;

    let addarch = optional_bool(raw, "addarch")?;
    let continue_fail = optional_bool(raw, "continue_fail")?;
    let scaling = match raw.get("scaling") {
        None | Some(Value::Null) => None,
        Some(v) => Some(as_float(v).ok_or(ConfigError::InvalidSetting {
            key: "scaling",
            expected: "float",
        })?),
    };

    let ncores = match count(raw, "ncores")? {
        Some(n) if n != ctx.host_cores => n,
        _ => 0,
    };

    let extra = raw
        .iter()
        .filter(|(k, _)| !KNOWN_SETTINGS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(Settings {
        name,
        method,
        repetitions,
        retries,
        registry,
        reference_machine: raw.get("reference_machine").cloned().unwrap_or(Value::Null),
        container_exec,
        addarch,
        scaling,
        ncores,
        continue_fail,
        extra,
    })
}

fn validate_benchmark(name: &str, entry: &Value, resolver: &RegistryResolver) -> Result<BenchmarkSpec, ConfigError> {
    if !is_safe_name(name) {
        return Err(ConfigError::IllegalBenchmarkName(name.to_string()));
    }
    let conf = entry
        .as_object()
        .ok_or_else(|| ConfigError::BenchmarkNotAMapping(name.to_string()))?;

    let version = match conf.get("version") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => {
            return Err(ConfigError::InvalidBenchmarkOption {
                benchmark: name.to_string(),
                option: "version",
                expected: "a string",
            })
        }
        None => {
            return Err(ConfigError::MissingBenchmarkOption {
                benchmark: name.to_string(),
                option: "version",
            })
        }
    };

    let weight = match conf.get("weight") {
        None | Some(Value::Null) => None,
        Some(v) => Some(as_float(v).ok_or_else(|| ConfigError::InvalidWeight {
            benchmark: name.to_string(),
            value: display_scalar(v),
        })?),
    };

    let ref_scores = match conf.get("ref_scores") {
        Some(Value::Object(scores)) if !scores.is_empty() => {
            let mut parsed = BTreeMap::new();
            for (sub, value) in scores {
                match as_float(value) {
                    Some(f) if f > 0.0 && f.is_finite() => {
                        parsed.insert(sub.clone(), f);
                    }
                    _ => {
                        return Err(ConfigError::InvalidRefScore {
                            benchmark: name.to_string(),
                            sub_benchmark: sub.clone(),
                        })
                    }
                }
            }
            parsed
        }
        _ => return Err(ConfigError::MissingRefScores(name.to_string())),
    };

    let args = match conf.get("args") {
        None | Some(Value::Null) => None,
        Some(Value::Object(m)) => Some(m.clone()),
        Some(_) => {
            return Err(ConfigError::InvalidBenchmarkOption {
                benchmark: name.to_string(),
                option: "args",
                expected: "a mapping",
            })
        }
    };

    let results_file = match conf.get("results_file") {
        None | Some(Value::Null) => None,
        Some(Value::String(f)) if is_safe_path(f) => Some(f.clone()),
        Some(other) => return Err(ConfigError::IllegalResultsFile(display_scalar(other))),
    };

    let registry = match conf.get("registry") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let list = RegistryList::from_value(v)?;
            check_registry_chars(&list)?;
            Some(resolver.resolve(&list)?)
        }
    };

    let gpu = match conf.get("gpu") {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            return Err(ConfigError::InvalidBenchmarkOption {
                benchmark: name.to_string(),
                option: "gpu",
                expected: "a bool",
            })
        }
    };

    let extra = conf
        .iter()
        .filter(|(k, _)| !KNOWN_BENCHMARK_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(BenchmarkSpec {
        name: name.to_string(),
        version,
        weight,
        ref_scores,
        args,
        registry,
        results_file,
        gpu,
        extra,
    })
}

fn resolve_registry(
    value: Option<&Value>,
    engine: ContainerEngine,
    requested: Option<UriScheme>,
) -> Result<String, ConfigError> {
    let value = value.ok_or(ConfigError::MissingSetting("registry"))?;
    let list = RegistryList::from_value(value)?;
    check_registry_chars(&list)?;
    Ok(RegistryResolver::new(engine, requested).resolve(&list)?)
}

fn check_registry_chars(list: &RegistryList) -> Result<(), ConfigError> {
    match list.entries().iter().find(|r| !is_safe_path(r)) {
        Some(bad) => Err(ConfigError::IllegalRegistry(bad.clone())),
        None => Ok(()),
    }
}

/// Non-negative integer setting; floats, strings and negatives are rejected.
fn count(raw: &Map<String, Value>, key: &'static str) -> Result<Option<u32>, ConfigError> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidCount {
                key,
                value: n.to_string(),
            }),
        Some(other) => Err(ConfigError::InvalidCount {
            key,
            value: display_scalar(other),
        }),
    }
}

fn optional_bool(raw: &Map<String, Value>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ConfigError::InvalidSetting { key, expected: "bool" }),
    }
}

/// Numbers and numeric strings, the way YAML users write reference scores.
pub(crate) fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn display_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ValidationContext {
        ValidationContext::new(None, 8)
    }

    fn base() -> Value {
        json!({
            "settings": {
                "name": "HEPscore23",
                "method": "geometric_mean",
                "repetitions": 3,
                "retries": 1,
                "registry": ["oras://registry.cern.ch/hep-workloads", "docker://gitlab-registry.cern.ch/hep-workloads"],
                "reference_machine": "CPU Intel(R) Xeon(R) Gold 6326",
                "scaling": 10
            },
            "benchmarks": {
                "atlas-gen_sherpa-ma-bmk": {
                    "version": "v2.1",
                    "weight": 1.0,
                    "ref_scores": {"gen": 322.4},
                    "args": {"threads": 1, "events": 200}
                },
                ".alice-digi-reco-core-run3-ma-bmk": {
                    "version": "v3.0"
                }
            }
        })
    }

    #[test]
    fn test_valid_config() {
        let cfg = validate(&base(), &ctx()).unwrap();
        assert_eq!(cfg.settings.repetitions, 3);
        assert_eq!(cfg.settings.retries(), 1);
        assert_eq!(cfg.settings.registry, "oras://registry.cern.ch/hep-workloads");
        assert_eq!(cfg.settings.scaling, Some(10.0));
        assert_eq!(cfg.benchmarks.len(), 1);
        assert_eq!(cfg.benchmarks[0].ref_scores["gen"], 322.4);
    }

    #[test]
    fn test_docker_engine_resolves_docker_registry() {
        let mut doc = base();
        doc["settings"]["container_exec"] = json!("docker");
        let cfg = validate(&doc, &ctx()).unwrap();
        assert_eq!(cfg.settings.registry, "docker://gitlab-registry.cern.ch/hep-workloads");
    }

    #[test]
    fn test_input_is_not_mutated() {
        let doc = base();
        let before = doc.clone();
        validate(&doc, &ctx()).unwrap();
        assert_eq!(doc, before);
    }

    #[test]
    fn test_missing_sections_and_settings() {
        assert!(matches!(
            validate(&json!({"settings": {}}), &ctx()),
            Err(ConfigError::MissingSection("benchmarks"))
        ));
        for key in REQUIRED_SETTINGS {
            let mut doc = base();
            doc["settings"].as_object_mut().unwrap().remove(key);
            assert!(
                matches!(validate(&doc, &ctx()), Err(ConfigError::MissingSetting(k)) if k == key),
                "missing {key} not rejected"
            );
        }
    }

    #[test]
    fn test_method_must_be_geometric_mean() {
        let mut doc = base();
        doc["settings"]["method"] = json!("arithmetic_mean");
        assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::UnsupportedMethod(_))));
    }

    #[test]
    fn test_counts_reject_negative_float_and_string() {
        for bad in [json!(-1), json!(2.5), json!("3")] {
            let mut doc = base();
            doc["settings"]["repetitions"] = bad.clone();
            assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::InvalidCount { .. })), "{bad}");
            let mut doc = base();
            doc["settings"]["retries"] = bad;
            assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::InvalidCount { .. })));
        }
    }

    #[test]
    fn test_illegal_registry_characters() {
        for bad in ["oras://reg;rm -rf /", "1oras://reg", "oras://reg$(id)"] {
            let mut doc = base();
            doc["settings"]["registry"] = json!(bad);
            assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::IllegalRegistry(_))), "{bad}");
        }
    }

    #[test]
    fn test_only_commented_benchmarks() {
        let mut doc = base();
        doc["benchmarks"] = json!({".a": {"version": "v1"}});
        assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::NoBenchmarks)));
    }

    #[test]
    fn test_benchmark_required_options() {
        let mut doc = base();
        doc["benchmarks"]["atlas-gen_sherpa-ma-bmk"]
            .as_object_mut()
            .unwrap()
            .remove("version");
        assert!(matches!(
            validate(&doc, &ctx()),
            Err(ConfigError::MissingBenchmarkOption { option: "version", .. })
        ));

        let mut doc = base();
        doc["benchmarks"]["atlas-gen_sherpa-ma-bmk"]
            .as_object_mut()
            .unwrap()
            .remove("ref_scores");
        assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::MissingRefScores(_))));
    }

    #[test]
    fn test_ref_scores_parse_as_positive_float() {
        let mut doc = base();
        doc["benchmarks"]["atlas-gen_sherpa-ma-bmk"]["ref_scores"] = json!({"gen": "322.4"});
        let cfg = validate(&doc, &ctx()).unwrap();
        assert_eq!(cfg.benchmarks[0].ref_scores["gen"], 322.4);

        for bad in [json!("abc"), json!(0), json!(-3.0), json!(null)] {
            let mut doc = base();
            doc["benchmarks"]["atlas-gen_sherpa-ma-bmk"]["ref_scores"] = json!({"gen": bad});
            assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::InvalidRefScore { .. })));
        }
    }

    #[test]
    fn test_invalid_weight_is_rejected() {
        let mut doc = base();
        doc["benchmarks"]["atlas-gen_sherpa-ma-bmk"]["weight"] = json!("heavy");
        assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::InvalidWeight { .. })));
    }

    #[test]
    fn test_results_file_characters() {
        let mut doc = base();
        doc["benchmarks"]["atlas-gen_sherpa-ma-bmk"]["results_file"] = json!("summary.json");
        assert!(validate(&doc, &ctx()).is_ok());

        for bad in ["_summary.json", "summary json", "../x"] {
            let mut doc = base();
            doc["benchmarks"]["atlas-gen_sherpa-ma-bmk"]["results_file"] = json!(bad);
            assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::IllegalResultsFile(_))), "{bad}");
        }
    }

    #[test]
    fn test_ncores_equal_to_host_is_normalised() {
        let mut doc = base();
        doc["settings"]["ncores"] = json!(8);
        assert_eq!(validate(&doc, &ctx()).unwrap().settings.ncores, 0);
        doc["settings"]["ncores"] = json!(4);
        assert_eq!(validate(&doc, &ctx()).unwrap().settings.ncores, 4);
    }

    #[test]
    fn test_unknown_engine() {
        let mut doc = base();
        doc["settings"]["container_exec"] = json!("podman");
        assert!(matches!(validate(&doc, &ctx()), Err(ConfigError::UnsupportedEngine(_))));
    }

    #[test]
    fn test_per_benchmark_registry_resolved() {
        let mut doc = base();
        doc["benchmarks"]["atlas-gen_sherpa-ma-bmk"]["registry"] =
            json!(["docker://gitlab/x", "dir:///cvmfs/x"]);
        let ctx = ValidationContext::new(Some(UriScheme::Dir), 8);
        let mut doc2 = doc.clone();
        doc2["settings"]["registry"] = json!(["dir:///cvmfs/y"]);
        let cfg = validate(&doc2, &ctx).unwrap();
        assert_eq!(cfg.benchmarks[0].registry.as_deref(), Some("dir:///cvmfs/x"));
        assert_eq!(cfg.settings.registry, "dir:///cvmfs/y");
    }
}

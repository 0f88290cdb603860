//! Loading YAML configurations and splitting off run options.

use super::types::RunOptions;
use crate::error::ConfigError;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Root key of a configuration file.
pub const ROOT_KEY: &str = "hepscore";
const DEPRECATED_ROOT_KEY: &str = "hepscore_benchmark";

/// A configuration as read from disk, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedConfig {
    /// Content of the root key without `options`.
    pub document: Value,
    pub options: RunOptions,
}

impl LoadedConfig {
    /// Split the root document into configuration and run options.
    pub fn from_root(root: Value) -> Result<Self, ConfigError> {
        let mut conf = match root {
            Value::Object(map) => map,
            _ => return Err(ConfigError::NotAMapping),
        };
        let options = match conf.remove("options") {
            None | Some(Value::Null) => RunOptions::default(),
            Some(v) => serde_json::from_value(v).map_err(ConfigError::InvalidOptions)?,
        };
        Ok(Self {
            document: Value::Object(conf),
            options,
        })
    }

    /// Write `options.ncores` and `options.registry` into `settings`.
    pub fn apply_option_overrides(&mut self) {
        let Some(settings) = self
            .document
            .get_mut("settings")
            .and_then(Value::as_object_mut)
        else {
            return;
        };
        if let Some(ncores) = self.options.ncores {
            settings.insert("ncores".to_string(), Value::from(ncores));
        }
        if let Some(registry) = &self.options.registry {
            settings.insert("registry".to_string(), registry.clone());
        }
    }

    /// Force `settings.container_exec`, e.g. from the command line.
    pub fn set_container_exec(&mut self, engine: &str) {
        if let Some(settings) = self
            .document
            .get_mut("settings")
            .and_then(Value::as_object_mut)
        {
            settings.insert("container_exec".to_string(), Value::from(engine));
        }
    }

    /// The document wrapped under the root key, options included.
    pub fn to_wrapped(&self) -> Result<Value, ConfigError> {
        let mut inner = match &self.document {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        inner.insert("options".to_string(), serde_json::to_value(&self.options)?);
        let mut root = Map::new();
        root.insert(ROOT_KEY.to_string(), Value::Object(inner));
        Ok(Value::Object(root))
    }
}

/// Parse YAML text into an order-preserving JSON value.
pub fn parse_yaml(text: &str) -> Result<Value, ConfigError> {
    Ok(serde_yaml::from_str::<Value>(text)?)
}

/// Read a YAML file and return the content of its root key.
pub fn read_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "read configuration file");
    load_str(&text)
}

pub fn load_str(text: &str) -> Result<LoadedConfig, ConfigError> {
    let doc = parse_yaml(text)?;
    LoadedConfig::from_root(unwrap_root(doc)?)
}

/// Take the value under `hepscore` (or the deprecated `hepscore_benchmark`).
pub fn unwrap_root(doc: Value) -> Result<Value, ConfigError> {
    let Value::Object(mut map) = doc else {
        return Err(ConfigError::MissingRoot);
    };
    if let Some(v) = map.remove(ROOT_KEY) {
        return Ok(v);
    }
    if let Some(v) = map.remove(DEPRECATED_ROOT_KEY) {
        warn!(
            "deprecated '{}' key found in configuration, please update to '{}'",
            DEPRECATED_ROOT_KEY, ROOT_KEY
        );
        return Ok(v);
    }
    Err(ConfigError::MissingRoot)
}

/// Names of the built-in configurations in `dir` (file stems of `*.yaml`).
pub fn list_named(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        warn!(dir = %dir.display(), "configuration directory not readable");
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(".yaml"))
                .map(str::to_string)
        })
        .collect();
    names.sort();
    names
}

pub fn named_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UriScheme;

    const YAML: &str = r#"
hepscore:
  benchmarks:
    db12:
      version: v1.1
      ref_scores: {db12: 1}
  settings:
    name: CI
    registry: oras://registry.cern.ch/hep-workloads
    method: geometric_mean
    repetitions: 1
    reference_machine: unknown
  options:
    container_uri: oras
    ncores: 2
    clean: true
"#;

    #[test]
    fn test_load_splits_options_and_keeps_order() {
        let loaded = load_str(YAML).unwrap();
        assert_eq!(loaded.options.container_uri, Some(UriScheme::Oras));
        assert!(loaded.options.clean);
        assert!(loaded.document.get("options").is_none());
        let keys: Vec<&String> = loaded.document.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["benchmarks", "settings"]);
    }

    #[test]
    fn test_option_overrides() {
        let mut loaded = load_str(YAML).unwrap();
        loaded.apply_option_overrides();
        assert_eq!(loaded.document["settings"]["ncores"], 2);
        assert_eq!(
            loaded.document["settings"]["registry"],
            "oras://registry.cern.ch/hep-workloads"
        );
    }

    #[test]
    fn test_deprecated_root_key() {
        let loaded = load_str(&YAML.replace("hepscore:", "hepscore_benchmark:")).unwrap();
        assert_eq!(loaded.document["settings"]["name"], "CI");
    }

    #[test]
    fn test_missing_root_key() {
        assert!(matches!(load_str("other: {}"), Err(ConfigError::MissingRoot)));
        assert!(matches!(load_str("- a\n- b"), Err(ConfigError::MissingRoot)));
    }

    #[test]
    fn test_bad_yaml() {
        assert!(matches!(load_str("hepscore: [unclosed"), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_list_named() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), "").unwrap();
        std::fs::write(dir.path().join("a.yaml"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        assert_eq!(list_named(dir.path()), vec!["a", "b"]);
        assert_eq!(named_path(dir.path(), "a"), dir.path().join("a.yaml"));
    }
}

//! The set of workload images a configuration refers to.

use crate::error::{ArchiveError, Result};
use hepscore_core::config::loader::{parse_yaml, unwrap_root};
use hepscore_core::{image_list_digest, RegistryList, UriScheme};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

const NO_ARCH: &str = "None";

/// Images of every active benchmark, pulled from the first `oras://`
/// registry of the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    images: Vec<String>,
    digest: String,
    arch: Option<String>,
}

impl ImageSet {
    pub async fn from_file(path: &Path, arch: Option<&str>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ArchiveError::io(path, e))?;
        Self::from_yaml(&text, arch)
    }

    pub fn from_yaml(text: &str, arch: Option<&str>) -> Result<Self> {
        let root = unwrap_root(parse_yaml(text)?)?;
        Self::from_root(&root, arch)
    }

    /// Build from the content under the root key. Benchmarks whose name
    /// starts with `.` are disabled and skipped.
    pub fn from_root(root: &Value, arch: Option<&str>) -> Result<Self> {
        let registries = root
            .pointer("/settings/registry")
            .map(RegistryList::from_value)
            .transpose()?
            .ok_or(ArchiveError::NoOrasRegistry)?;
        let registry = registries
            .first_with(UriScheme::Oras)
            .ok_or(ArchiveError::NoOrasRegistry)?
            .trim_end_matches('/');

        let suffix = arch.map(|a| format!("_{a}")).unwrap_or_default();
        let mut images = Vec::new();
        if let Some(Value::Object(benchmarks)) = root.get("benchmarks") {
            for (name, spec) in benchmarks {
                if name.starts_with('.') {
                    continue;
                }
                let version = spec.get("version").and_then(Value::as_str).unwrap_or_default();
                images.push(format!("{registry}/{name}:{version}{suffix}"));
            }
        }

        let digest = image_list_digest(&images)?;
        Ok(Self {
            images,
            digest,
            arch: arch.map(str::to_string),
        })
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// `<arch>_<digest>`. Archives built without an architecture were
    /// published as `None_<digest>`, so that name is kept.
    pub fn key(&self) -> String {
        format!("{}_{}", self.arch.as_deref().unwrap_or(NO_ARCH), self.digest)
    }

    /// Same images regardless of order.
    pub fn matches(&self, other: &[String]) -> bool {
        let ours: BTreeSet<&str> = self.images.iter().map(String::as_str).collect();
        let theirs: BTreeSet<&str> = other.iter().map(String::as_str).collect();
        ours == theirs
    }
}

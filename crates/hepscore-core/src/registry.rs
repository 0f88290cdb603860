//! Registry resolution for a container engine.
//!
//! A registry setting is either a single URI or an ordered list of URIs,
//! each carrying a scheme prefix. Resolution picks the one entry the active
//! engine can pull from.

use crate::config::{ContainerEngine, UriScheme};
use crate::error::RegistryError;
use serde_json::Value;

/// Ordered list of registry URIs as declared in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryList(Vec<String>);

impl RegistryList {
    /// Accepts a string or a list of strings, anything else is rejected.
    pub fn from_value(value: &Value) -> Result<Self, RegistryError> {
        match value {
            Value::String(s) => Ok(Self(vec![s.clone()])),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(RegistryError::InvalidFormat(other.to_string())),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self),
            other => Err(RegistryError::InvalidFormat(other.to_string())),
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    /// First entry using `scheme`, in declared order.
    pub fn first_with(&self, scheme: UriScheme) -> Option<&str> {
        let prefix = scheme.prefix();
        self.0
            .iter()
            .find(|r| r.starts_with(&prefix))
            .map(String::as_str)
    }
}

/// Picks a registry for one engine, optionally pinned to one scheme.
#[derive(Debug, Clone, Copy)]
pub struct RegistryResolver {
    engine: ContainerEngine,
    requested: Option<UriScheme>,
}

impl RegistryResolver {
    pub fn new(engine: ContainerEngine, requested: Option<UriScheme>) -> Self {
        Self { engine, requested }
    }

    /// Candidate schemes in priority order.
    pub fn candidate_schemes(&self) -> Result<Vec<UriScheme>, RegistryError> {
        let supported = self.engine.supported_schemes();
        match self.requested {
            Some(scheme) if supported.contains(&scheme) => Ok(vec![scheme]),
            Some(scheme) => Err(RegistryError::UnsupportedScheme {
                scheme: scheme.to_string(),
                engine: self.engine.to_string(),
            }),
            None => Ok(supported.to_vec()),
        }
    }

    /// Return the first registry whose scheme is allowed, scanning schemes
    /// in priority order and registries in declared order within each.
    pub fn resolve(&self, registries: &RegistryList) -> Result<String, RegistryError> {
        let schemes = self.candidate_schemes()?;
        for scheme in &schemes {
            if let Some(found) = registries.first_with(*scheme) {
                return Ok(found.to_string());
            }
        }
        Err(RegistryError::NoMatch {
            registries: registries.entries().to_vec(),
            schemes: schemes.iter().map(|s| s.to_string()).collect(),
        })
    }
}

/// Drop the scheme prefix the engine's command line does not accept.
pub fn strip_for(engine: ContainerEngine, registry: &str) -> &str {
    for scheme in engine.stripped_schemes() {
        if let Some(rest) = registry.strip_prefix(&scheme.prefix()) {
            return rest;
        }
    }
    registry
}

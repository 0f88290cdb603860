//! Host and container engine facts recorded in the report.

use crate::config::ContainerEngine;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, error};

const MAX_USER_NAMESPACES: &str = "/proc/sys/user/max_user_namespaces";
const CONTAINER_MARKERS: [&str; 2] = ["/.dockerenv", "/run/.containerenv"];

/// Cores this process may run on.
///
/// Honours CPU affinity and, unlike a plain affinity-mask count, also a
/// cgroup CPU quota, so a quota-limited container reports fewer cores.
pub fn available_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

pub fn machine_arch() -> &'static str {
    std::env::consts::ARCH
}

/// `uname -snrvm`, or OS and architecture when uname is unavailable.
pub async fn system_description() -> String {
    match Command::new("uname").arg("-snrvm").output().await {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
        _ => format!("{} {}", std::env::consts::OS, machine_arch()),
    }
}

pub fn is_root() -> bool {
    std::fs::metadata("/proc/self")
        .map(|m| m.uid() == 0)
        .unwrap_or(false)
}

/// Whether nested user namespaces can be used by singularity.
pub fn userns_supported() -> bool {
    userns_supported_at(Path::new("/"))
}

fn userns_supported_at(root: &Path) -> bool {
    for marker in CONTAINER_MARKERS {
        if root.join(marker.trim_start_matches('/')).is_file() {
            debug!("running inside a container, not enabling user namespaces");
            return false;
        }
    }
    let path = root.join(MAX_USER_NAMESPACES.trim_start_matches('/'));
    match std::fs::read_to_string(&path) {
        Ok(text) => text.trim().parse::<u64>().map(|n| n > 0).unwrap_or(false),
        Err(_) => {
            debug!(
                "cannot read {}, assuming user namespace support disabled",
                path.display()
            );
            false
        }
    }
}

/// Implementation and version of the container engine on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProfile {
    /// `docker`, `podman`, `singularity`, `apptainer` or `unknown`.
    pub implementation: String,
    pub version: String,
}

impl EngineProfile {
    pub fn unknown() -> Self {
        Self {
            implementation: "unknown".to_string(),
            version: "0.0".to_string(),
        }
    }

    pub fn version_key(&self) -> String {
        format!("{}_version", self.implementation)
    }

    pub fn is_apptainer(&self) -> bool {
        self.implementation == "apptainer"
    }

    /// Run `<engine> --version` and refine the implementation name.
    pub async fn detect(engine: ContainerEngine) -> Self {
        let out = match Command::new(engine.name()).arg("--version").output().await {
            Ok(out) => out,
            Err(e) => {
                error!("could not locate {} on the system, please check your path: {}", engine, e);
                return Self::unknown();
            }
        };
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
        let Some((line, version)) = parse_version_output(&text) else {
            return Self::unknown();
        };

        let is_apptainer = line.contains("apptainer");
        let implementation = match engine {
            ContainerEngine::Singularity if is_apptainer => "apptainer",
            ContainerEngine::Docker => {
                if help_mentions("docker", &["--help"], "podman").await {
                    "podman"
                } else {
                    "docker"
                }
            }
            ContainerEngine::Singularity => "singularity",
        }
        .to_string();
        Self {
            implementation,
            version,
        }
    }

    /// `--unsquash` is passed only for unprivileged apptainer with user
    /// namespaces and a `run` that advertises the flag.
    pub async fn supports_unsquash(&self) -> bool {
        if is_root() || !userns_supported() || !self.is_apptainer() {
            return false;
        }
        help_mentions("singularity", &["run", "--help"], "--unsquash").await
    }
}

/// First line whose text after stripping leading non-digits starts with a
/// digit: returns that line and the stripped version.
pub fn parse_version_output(text: &str) -> Option<(&str, String)> {
    text.lines().find_map(|line| {
        let version = line.trim_start_matches(|c: char| !c.is_ascii_digit()).trim();
        if version.starts_with(|c: char| c.is_ascii_digit()) {
            Some((line, version.to_string()))
        } else {
            None
        }
    })
}

async fn help_mentions(program: &str, args: &[&str], needle: &str) -> bool {
    match Command::new(program).args(args).output().await {
        Ok(out) => {
            String::from_utf8_lossy(&out.stdout).contains(needle)
                || String::from_utf8_lossy(&out.stderr).contains(needle)
        }
        Err(_) => false,
    }
}

/// The `environment` section of the report.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSnapshot {
    pub system: String,
    pub arch: String,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub available_cores: u32,
    pub engine: EngineProfile,
}

impl EnvironmentSnapshot {
    pub async fn capture(engine: &EngineProfile) -> Self {
        Self {
            system: system_description().await,
            arch: machine_arch().to_string(),
            start_at: Utc::now(),
            end_at: None,
            available_cores: available_cores(),
            engine: engine.clone(),
        }
    }

    pub fn finish(&mut self) {
        self.end_at = Some(Utc::now());
    }

    /// Whole seconds between start and end.
    pub fn duration_secs(&self) -> i64 {
        self.end_at
            .map(|end| end.timestamp() - self.start_at.timestamp())
            .unwrap_or(0)
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("system".to_string(), Value::from(self.system.clone()));
        map.insert("arch".to_string(), Value::from(self.arch.clone()));
        map.insert("start_at".to_string(), Value::from(self.start_at.to_rfc3339()));
        map.insert(self.engine.version_key(), Value::from(self.engine.version.clone()));
        map.insert("available_cores".to_string(), Value::from(self.available_cores));
        if let Some(end) = self.end_at {
            map.insert("end_at".to_string(), Value::from(end.to_rfc3339()));
            map.insert("duration".to_string(), Value::from(self.duration_secs()));
        }
        Value::Object(map)
    }
}

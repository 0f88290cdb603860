//! Container command construction.
//!
//! Commands are argument vectors handed straight to the OS, never a shell
//! string. Workload arguments are still filtered by character class so that
//! a configuration cannot smuggle engine flags into the workload.

use crate::config::{is_safe_name, BenchmarkSpec, ContainerEngine};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

const RESERVED_ARGS: [&str; 4] = ["resultsdir", "--resultsdir", "-w", "-W"];
const MOP_ARGS: [&str; 3] = ["mop", "--mop", "-m"];
const NCORES_ARGS: [&str; 3] = ["ncores", "--ncores", "-n"];

/// Bind-mount variables the host may set that would leak into the container.
pub const SINGULARITY_BIND_VARS: [&str; 4] = [
    "SINGULARITY_BIND",
    "SINGULARITY_BINDPATH",
    "APPTAINER_BIND",
    "APPTAINER_BINDPATH",
];

/// One fully specified child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub env_remove: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            env_remove: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, env: &ChildEnv) -> Self {
        self.env = env.set.clone();
        self.env_remove = env.remove.clone();
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// Per-child environment changes. The parent environment is never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildEnv {
    pub set: Vec<(String, String)>,
    pub remove: Vec<String>,
}

impl ChildEnv {
    /// Singularity/Apptainer: drop host bind paths, point the unpack
    /// directory (and with `clean` the cache) inside the results directory.
    pub fn for_engine(engine: ContainerEngine, unpack_dir: &Path, cache_dir: Option<&Path>) -> Self {
        if engine != ContainerEngine::Singularity {
            return Self::default();
        }
        let unpack = unpack_dir.display().to_string();
        let mut set = vec![
            ("SINGULARITY_TMPDIR".to_string(), unpack.clone()),
            ("APPTAINER_TMPDIR".to_string(), unpack),
        ];
        if let Some(cache) = cache_dir {
            let cache = cache.display().to_string();
            set.push(("SINGULARITY_CACHEDIR".to_string(), cache.clone()));
            set.push(("APPTAINER_CACHEDIR".to_string(), cache));
        }
        Self {
            set,
            remove: SINGULARITY_BIND_VARS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Engine flags decided once per suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineFlags {
    pub unsquash: bool,
    pub userns: bool,
}

/// `<registry>/<benchmark>:<version>[_<arch>]`.
///
/// The architecture suffix is only added for singularity and only when the
/// registry is not a `docker://` one.
pub fn image_reference(
    registry: &str,
    spec: &BenchmarkSpec,
    engine: ContainerEngine,
    arch: Option<&str>,
) -> String {
    let mut tag = spec.version.clone();
    if let Some(arch) = arch {
        if engine == ContainerEngine::Singularity && !registry.starts_with("docker://") {
            tag = format!("{tag}_{arch}");
        }
    }
    format!("{}/{}:{}", registry, spec.name, tag)
}

/// Arguments passed to the workload after the image reference.
pub fn workload_args(spec: &BenchmarkSpec, clean_files: bool, ncores: u32) -> Vec<String> {
    let mut out = vec!["-W".to_string()];
    let mut reserved: Vec<&str> = RESERVED_ARGS.to_vec();

    if clean_files {
        out.extend(["--mop".to_string(), "all".to_string()]);
        reserved.extend(MOP_ARGS);
        info!("option clean_files selected, ignoring the mop parameter of the workloads");
    }
    if ncores != 0 {
        info!("enforcing run of each workload on only {} cores", ncores);
        out.extend(["--ncores".to_string(), ncores.to_string()]);
        reserved.extend(NCORES_ARGS);
    }

    let Some(args) = &spec.args else {
        return out;
    };
    for (key, value) in args {
        let rendered = match value {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };
        let safe_value = rendered.as_deref().map_or(true, is_safe_name);
        if !is_safe_name(key) || reserved.contains(&key.as_str()) || !safe_value {
            error!(
                benchmark = %spec.name,
                "ignoring invalid option in YAML configuration: {} {}",
                key,
                rendered.as_deref().unwrap_or("None")
            );
            continue;
        }

        match value {
            Value::Null | Value::Bool(false) => continue,
            _ => {}
        }
        if key.starts_with('-') {
            out.push(key.clone());
        } else {
            out.push(format!("--{key}"));
        }
        if !matches!(value, Value::Bool(true)) {
            if let Some(v) = rendered {
                out.push(v);
            }
        }
    }
    out
}

/// Builds the run command for every attempt of one benchmark.
#[derive(Debug, Clone)]
pub struct RunCommand {
    pub engine: ContainerEngine,
    pub tmp_dir: PathBuf,
    pub flags: EngineFlags,
    pub gpu: bool,
    pub image: String,
    pub workload_args: Vec<String>,
    pub env: ChildEnv,
}

impl RunCommand {
    pub fn for_run(&self, run_dir: &Path) -> Invocation {
        let results = format!("{}:/results", run_dir.display());
        let tmp = format!("{}:/tmp", self.tmp_dir.display());
        let var_tmp = format!("{}:/var/tmp", self.tmp_dir.display());

        let inv = match self.engine {
            ContainerEngine::Docker => {
                let mut inv = Invocation::new("docker").args([
                    "run",
                    "--rm",
                    "--network=host",
                    "-v",
                    results.as_str(),
                    "-v",
                    tmp.as_str(),
                    "-v",
                    var_tmp.as_str(),
                ]);
                if self.gpu {
                    inv = inv.args(["--gpus", "all"]);
                }
                inv
            }
            ContainerEngine::Singularity => {
                let mut inv = Invocation::new("singularity").args([
                    "run",
                    "-i",
                    "-c",
                    "-e",
                    "-B",
                    results.as_str(),
                    "-B",
                    tmp.as_str(),
                    "-B",
                    var_tmp.as_str(),
                ]);
                if self.flags.unsquash {
                    inv = inv.arg("--unsquash");
                }
                if self.flags.userns {
                    inv = inv.arg("-u");
                }
                if self.gpu {
                    inv = inv.arg("--nv");
                }
                inv
            }
        };
        inv.arg(self.image.as_str())
            .args(self.workload_args.iter().cloned())
            .with_env(&self.env)
    }
}

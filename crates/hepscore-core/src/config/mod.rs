//! Benchmark configuration: loading, typed model and validation.

pub mod loader;
pub mod types;
pub mod validate;

pub use loader::{list_named, load_str, named_path, read_config, LoadedConfig, ROOT_KEY};
pub use types::{
    BenchmarkSpec, ContainerEngine, RunOptions, ScoreMethod, Settings, UriScheme, ValidatedConfig,
};
pub use validate::{is_safe_name, is_safe_path, validate, ValidationContext};

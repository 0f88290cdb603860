use std::path::PathBuf;

/// Errors raised while building an image archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("configuration error: {0}")]
    Config(#[from] hepscore_core::ConfigError),

    #[error("no oras:// registry in settings.registry")]
    NoOrasRegistry,

    #[error("registry error: {0}")]
    Registry(#[from] hepscore_core::RegistryError),

    #[error("folder {0} already exists and is not empty")]
    NotEmpty(PathBuf),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with status {status}")]
    Command { command: String, status: i32 },

    #[error("image {0} has no tag")]
    UntaggedImage(String),

    #[error("digest error: {0}")]
    Digest(#[from] hepscore_core::HepscoreError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

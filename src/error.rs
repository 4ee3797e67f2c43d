use std::io;
use std::path::PathBuf;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors: bad configuration, unusable roots, or a worker pool that
/// could not be started. Everything recoverable is reported as a warning or
/// a per-item outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid scan root {}: {reason}", path.display())]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("worker pool could not start: {0}")]
    WorkerPool(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid glob `{pattern}`: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn glob(pattern: &str, source: globset::Error) -> Self {
        Self::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        }
    }
}

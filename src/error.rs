use std::path::{Path, PathBuf};
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("filesystem error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} not found in {}", file_name(.path), parent_dir(.path))]
    ConfigMissing { path: PathBuf },

    #[error("{command} failed: {reason}")]
    ServiceCommand {
        command: String,
        reason: String,
        output: String,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("store: {0}")]
    Store(String),
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn parent_dir(path: &Path) -> String {
    path.parent()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default()
}

impl Error {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Captured process output carried by the error, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Error::ServiceCommand { output, .. } => Some(output),
            _ => None,
        }
    }
}

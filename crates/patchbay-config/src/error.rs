//! Error type for session files.

use std::path::PathBuf;
use thiserror::Error;

/// What went wrong with a session file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read session '{path}': {source}")]
    Read {
        /// Session path.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// The file or its parent directory could not be written.
    #[error("cannot write session '{path}': {source}")]
    Write {
        /// Path that failed, the session itself or a directory above it.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML, or does not match the session layout.
    #[error("malformed session: {0}")]
    Parse(#[from] toml::de::Error),

    /// The session could not be rendered as TOML.
    #[error("cannot encode session: {0}")]
    Encode(#[from] toml::ser::Error),

    /// Parsed, but the contents are out of range or inconsistent.
    #[error("invalid session: {0}")]
    Validation(#[from] crate::validation::ValidationError),
}

impl ConfigError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Write {
            path: path.into(),
            source,
        }
    }

    /// Path involved, for the IO variants.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Write { path, .. } => Some(path),
            _ => None,
        }
    }
}

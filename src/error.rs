use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while constructing or persisting a telescope instrument.
#[derive(Error, Debug)]
pub enum AthenaError {
    /// Configuration value could not be interpreted.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A user-supplied directory could not be created, and neither could the
    /// project-root fallback derived from it.
    #[error("cannot create directory for {path}: {source}")]
    DirectoryCreation {
        /// Path whose parent directory failed to materialize.
        path: PathBuf,
        source: std::io::Error,
    },

    /// Filesystem failure while reading or writing an artifact.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File being read or written.
        path: PathBuf,
        source: std::io::Error,
    },

    /// Snapshot could not be serialized or deserialized.
    #[error("snapshot serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Orbit propagation failed for the given element set.
    #[error("orbit propagation failed: {0}")]
    Orbit(String),

    /// Kuiper analysis requested without a tile structure to consume.
    #[error("no tile structure available: {0}")]
    NoTileStruct(String),
}

pub type Result<T> = std::result::Result<T, AthenaError>;

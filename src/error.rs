//! Error types for bakery.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the bakeform lifecycle and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The partition-mapping tool failed or produced no mappings.
    #[error("partition mapping failed for {}: {message}", .image.display())]
    Mapping { image: PathBuf, message: String },

    /// Mounting a mapped partition failed.
    #[error("mounting {} on {} failed: {message}", .device.display(), .target.display())]
    Mount {
        device: PathBuf,
        target: PathBuf,
        message: String,
    },

    /// Unmounting a mount point failed.
    #[error("unmounting {} failed: {message}", .target.display())]
    Unmount { target: PathBuf, message: String },

    /// `mount` was called on a bakeform that is already mounted.
    #[error("bakeform '{0}' is already mounted")]
    AlreadyMounted(String),

    /// Unknown bakeform name.
    #[error("bakeform '{0}' not found")]
    NotFound(String),

    /// A bakeform name that cannot be used as a file name.
    #[error("invalid bakeform name '{0}'")]
    InvalidName(String),

    /// An image with this name already exists.
    #[error("bakeform '{0}' already exists")]
    Conflict(String),

    /// Copying the boot partition into the boot root failed.
    #[error("copying boot partition of '{name}' failed: {message}")]
    Copy { name: String, message: String },

    /// Removing a bakeform's image or boot copy failed.
    #[error("deleting bakeform '{name}' failed: {}", .errors.join("; "))]
    Delete { name: String, errors: Vec<String> },

    /// A best-effort cleanup sweep finished with failures.
    #[error("cleanup of '{name}' incomplete: {}", .errors.join("; "))]
    Cleanup { name: String, errors: Vec<String> },

    /// An external command did not finish in time and was killed.
    #[error("`{command}` timed out after {}", humantime::format_duration(*.timeout))]
    CommandTimeout { command: String, timeout: Duration },

    /// A named file operation failed.
    #[error("{operation} failed: {message}")]
    Storage { operation: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Create a storage error for a named operation.
    pub fn storage(operation: impl Into<String>, message: impl ToString) -> Self {
        Error::Storage {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Create a mapping error.
    pub fn mapping(image: impl Into<PathBuf>, message: impl ToString) -> Self {
        Error::Mapping {
            image: image.into(),
            message: message.to_string(),
        }
    }

    /// Create a copy error.
    pub fn copy(name: impl Into<String>, message: impl ToString) -> Self {
        Error::Copy {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

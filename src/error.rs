//! Error types for mounttab
//!
//! All modules use `MountResult<T>` as their return type. A lookup that finds
//! nothing is `Ok(None)`, never an error.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mounttab operations
pub type MountResult<T> = Result<T, MountError>;

/// All errors that can occur in mounttab
#[derive(Error, Debug)]
pub enum MountError {
    // Argument errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Parse errors
    #[error("Malformed option string: {0:?}")]
    OptionParse(String),

    #[error("{source_name}:{line}: parse error: {reason}")]
    Parse {
        source_name: String,
        line: usize,
        reason: String,
    },

    #[error("Invalid tag specification: {0:?}")]
    TagSpec(String),

    // Table errors
    #[error("Cursor is stale: the table was modified after the cursor was created")]
    StaleCursor,

    #[error("Entry handle does not belong to this table")]
    UnknownEntry,

    #[error("Duplicate mount ID {0} among siblings")]
    DuplicateMountId(u32),

    // Cache errors
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // Lock errors
    #[error("Timed out waiting for lock {path} (perhaps there is a stale lock file?)")]
    LockTimeout { path: PathBuf },

    #[error("Lock error: {context}")]
    LockIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Lock is held by this handle; unlock it first")]
    LockBusy,

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl MountError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a lock IO error with context
    pub fn lock_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::LockIo {
            context: context.into(),
            source,
        }
    }

    /// Create a parse error for a line of a named source
    pub fn parse(source_name: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Whether the error came from the lock wait running out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => {
                Some("Check for a stale lock file left behind by a crashed process")
            }
            Self::PermissionDenied(_) => Some("Try again as root"),
            Self::StaleCursor => Some("Reset the cursor after adding or removing entries"),
            _ => None,
        }
    }
}

//! Error types for varstore
//!
//! Provides a unified error type for all variable operations.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias using VarError
pub type Result<T> = std::result::Result<T, VarError>;

/// Unified error type for varstore operations
#[derive(Debug, Error)]
pub enum VarError {
    // -------------------------------------------------------------------------
    // Argument Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Record too large: {0} payload bytes overflow the record size")]
    Overflow(usize),

    #[error("Path too long: {len} bytes (max {max})")]
    PathTooLong { len: usize, max: usize },

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Variable not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Corrupt record {}: {reason}", .path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("Race detected on {}: {reason}", .path.display())]
    Race { path: PathBuf, reason: &'static str },

    #[error("Short write on {}: wrote {written} of {expected} bytes", .path.display())]
    WriteFailed {
        path: PathBuf,
        written: usize,
        expected: usize,
    },

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("Permission denied: {op} {}", .path.display())]
    PermissionDenied {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{op} {} failed: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // -------------------------------------------------------------------------
    // Mirror Errors
    // -------------------------------------------------------------------------
    #[error("Persistence mirror unavailable: {0}")]
    MirrorUnavailable(String),

    #[error("Persistence mirror {op} failed on {}: {source}", .path.display())]
    MirrorIo {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl VarError {
    /// Wrap an I/O error with the operation and path it came from.
    ///
    /// `NotFound` and `PermissionDenied` get their own variants so callers
    /// can match on them without digging into the source.
    pub fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => VarError::NotFound {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => VarError::PermissionDenied {
                op,
                path: path.to_path_buf(),
                source,
            },
            _ => VarError::Io {
                op,
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Whether the caller should stop the process.
    ///
    /// Only a mirror failure after the target file was opened for writing
    /// qualifies: the external file is in an unknown, partially written state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VarError::MirrorIo { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VarError::NotFound { .. })
    }

    pub fn is_race(&self) -> bool {
        matches!(self, VarError::Race { .. })
    }
}

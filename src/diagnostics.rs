//! Diagnostic sink
//!
//! Best-effort sub-steps (flag restoration, rollback unlinks, mirror lookup)
//! never change an operation's result. Their failures are reported here
//! instead, so callers and tests can see them without the result changing.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// What kind of sub-step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// statfs on the root failed or reported the wrong filesystem
    ProbeFailed,
    /// Reading the inode flags failed for a reason other than "unsupported"
    ImmutableQueryFailed,
    /// Clearing the immutable flag was rejected
    ImmutableClearFailed,
    /// Putting the original flags back was rejected
    ImmutableRestoreFailed,
    /// A file created by a failed `set` could not be removed
    RollbackFailed,
    /// The persistence mirror was skipped
    MirrorUnavailable,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::ProbeFailed => "probe failed",
            DiagnosticKind::ImmutableQueryFailed => "immutable query failed",
            DiagnosticKind::ImmutableClearFailed => "immutable clear failed",
            DiagnosticKind::ImmutableRestoreFailed => "immutable restore failed",
            DiagnosticKind::RollbackFailed => "rollback failed",
            DiagnosticKind::MirrorUnavailable => "mirror unavailable",
        };
        f.write_str(s)
    }
}

/// A single swallowed failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Operation that was running (`set`, `delete`, `probe`, ...)
    pub operation: &'static str,
    pub kind: DiagnosticKind,
    pub path: Option<PathBuf>,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(operation: &'static str, kind: DiagnosticKind, detail: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            path: None,
            detail: detail.into(),
        }
    }

    pub fn at(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.kind)?;
        if let Some(path) = &self.path {
            write!(f, " ({})", path.display())?;
        }
        write!(f, ": {}", self.detail)
    }
}

/// Receives diagnostics from the store
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to `tracing` at warn level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: Diagnostic) {
        tracing::warn!(
            operation = diagnostic.operation,
            kind = %diagnostic.kind,
            path = ?diagnostic.path,
            "{}",
            diagnostic.detail
        );
    }
}

/// Keeps diagnostics in memory
///
/// Every diagnostic is also forwarded to `tracing`.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// Number of diagnostics of the given kind
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.lock().iter().filter(|d| d.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, diagnostic: Diagnostic) {
        TracingSink.record(diagnostic.clone());
        self.entries.lock().push(diagnostic);
    }
}

//! Immutability guard
//!
//! Queries and toggles the immutable flag on open descriptors.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::error::{Result, VarError};

use super::flags::{is_unsupported, FlagControl, FS_IMMUTABLE_FL};

/// Toggles the immutable flag and tracks what has to be restored
pub struct ImmutabilityGuard {
    control: Arc<dyn FlagControl>,
    sink: Arc<dyn DiagnosticSink>,
}

impl ImmutabilityGuard {
    pub fn new(control: Arc<dyn FlagControl>, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { control, sink }
    }

    /// Current flag word
    ///
    /// A filesystem without inode flags reports 0 (not immutable) rather
    /// than an error.
    pub fn query(&self, file: &File, path: &Path) -> Result<u32> {
        match self.control.get_flags(file) {
            Ok(flags) => Ok(flags),
            Err(e) if is_unsupported(&e) => Ok(0),
            Err(e) => Err(VarError::io("get inode flags", path, e)),
        }
    }

    pub fn is_immutable(&self, file: &File, path: &Path) -> Result<bool> {
        Ok(self.query(file, path)? & FS_IMMUTABLE_FL != 0)
    }

    /// Make the file immutable or mutable; no-op if it already is
    pub fn set(&self, file: &File, path: &Path, immutable: bool) -> Result<()> {
        let flags = match self.control.get_flags(file) {
            Ok(flags) => flags,
            Err(e) if is_unsupported(&e) => return Ok(()),
            Err(e) => return Err(VarError::io("get inode flags", path, e)),
        };

        if (flags & FS_IMMUTABLE_FL != 0) == immutable {
            return Ok(());
        }

        let flags = if immutable {
            flags | FS_IMMUTABLE_FL
        } else {
            flags & !FS_IMMUTABLE_FL
        };
        self.control
            .set_flags(file, flags)
            .map_err(|e| VarError::io("set inode flags", path, e))
    }

    /// Clear the immutable flag if it is set
    ///
    /// Returns a window that puts the original flags back when dropped, or
    /// `None` when there was nothing to clear (not immutable, unsupported,
    /// or the clear itself was rejected). Failures are reported to the sink;
    /// the caller's write will then fail on its own if the file is still
    /// immutable.
    pub fn make_mutable<'f>(
        &'f self,
        file: &'f File,
        path: &'f Path,
        operation: &'static str,
    ) -> Option<MutableWindow<'f>> {
        let original = match self.control.get_flags(file) {
            Ok(flags) => flags,
            Err(e) if is_unsupported(&e) => return None,
            Err(e) => {
                self.report(operation, DiagnosticKind::ImmutableQueryFailed, path, e.to_string());
                return None;
            }
        };

        if original & FS_IMMUTABLE_FL == 0 {
            return None;
        }

        if let Err(e) = self.control.set_flags(file, original & !FS_IMMUTABLE_FL) {
            self.report(operation, DiagnosticKind::ImmutableClearFailed, path, e.to_string());
            return None;
        }

        tracing::debug!(path = %path.display(), "cleared immutable flag");
        Some(MutableWindow {
            guard: self,
            file,
            path,
            operation,
            original,
        })
    }

    fn report(&self, operation: &'static str, kind: DiagnosticKind, path: &Path, detail: String) {
        self.sink
            .record(Diagnostic::new(operation, kind, detail).at(path));
    }
}

/// Span during which a file's immutable flag is cleared
///
/// Borrows the file, so the flags are always restored before the
/// descriptor can be closed. Restoration failure is reported, not raised.
#[must_use = "dropping the window restores the immutable flag immediately"]
pub struct MutableWindow<'f> {
    guard: &'f ImmutabilityGuard,
    file: &'f File,
    path: &'f Path,
    operation: &'static str,
    original: u32,
}

impl MutableWindow<'_> {
    /// Flag word that will be put back
    pub fn original_flags(&self) -> u32 {
        self.original
    }
}

impl Drop for MutableWindow<'_> {
    fn drop(&mut self) {
        match self.guard.control.set_flags(self.file, self.original) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "restored immutable flag"),
            Err(e) => self.guard.report(
                self.operation,
                DiagnosticKind::ImmutableRestoreFailed,
                self.path,
                e.to_string(),
            ),
        }
    }
}

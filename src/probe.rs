//! Mount probe
//!
//! Decides whether the efivarfs backend can be used at the resolved root.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::paths::PathResolver;

/// Checks the filesystem kind at the store root
pub struct MountProbe<'a> {
    paths: &'a PathResolver,
    fs_magic: u64,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> MountProbe<'a> {
    pub fn new(paths: &'a PathResolver, fs_magic: u64, sink: &'a dyn DiagnosticSink) -> Self {
        Self {
            paths,
            fs_magic,
            sink,
        }
    }

    /// True when the root is efivarfs, or when the override names exactly
    /// this root (for non-standard and test mounts).
    ///
    /// Never fails; the reason for a false result goes to the sink.
    pub fn is_available(&self) -> bool {
        let root = self.paths.resolve();

        match fs_magic(root) {
            Ok(magic) if magic == self.fs_magic => true,
            Ok(magic) => {
                if self.paths.is_override_root() {
                    tracing::debug!(root = %root.display(), "accepting override root");
                    return true;
                }
                self.sink.record(
                    Diagnostic::new(
                        "probe",
                        DiagnosticKind::ProbeFailed,
                        format!(
                            "bad fs type 0x{:x} (expected 0x{:x})",
                            magic, self.fs_magic
                        ),
                    )
                    .at(root),
                );
                false
            }
            Err(e) => {
                self.sink.record(
                    Diagnostic::new("probe", DiagnosticKind::ProbeFailed, format!("statfs failed: {}", e))
                        .at(root),
                );
                false
            }
        }
    }
}

/// Filesystem magic (`f_type`) reported by `statfs` for `path`
pub fn fs_magic(path: &Path) -> io::Result<u64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: statfs is plain old data; zeroed is a valid initial value
    let mut buf: libc::statfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and buf is a valid out pointer
    let rc = unsafe { libc::statfs(c_path.as_ptr(), &mut buf) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // f_type is signed on some targets; efivarfs' magic has the top bit set
    Ok(buf.f_type as u64 & 0xffff_ffff)
}

//! Persistence mirror
//!
//! Some platforms keep variables in volatile storage at runtime and load
//! them from a file on the ESP at boot. After each change the store copies
//! the designated payload variable onto that file.
//!
//! ## Steps
//! 1. Lookup: `RTStorageVolatile-{FILE_STORE_GUID}` holds the target filename
//! 2. Locate: first ESP mount point where that file exists
//! 3. Replicate: `VarToFile-{FILE_STORE_GUID}` minus its 4-byte header is
//!    written over the target in fixed-size chunks
//!
//! Steps 1 and 2, and opening either file in step 3, may fail quietly: the
//! mirror is skipped and a diagnostic is recorded. Once the target is open
//! for writing, any I/O error is returned as the fatal `MirrorIo`.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::{Result, VarError};
use crate::key::{Guid, VariableKey};
use crate::store::{VarStore, RECORD_HEADER_LEN};

/// Namespace of the two mirror control variables
pub const FILE_STORE_GUID: Guid = Guid::from_fields(
    0xb2ac5fc9,
    0x92b7,
    0x4acd,
    [0xae, 0xac, 0x11, 0xe8, 0x18, 0xc3, 0x13, 0x0c],
);

/// Variable holding the ESP-relative target filename
pub const FILE_NAME_VAR: &str = "RTStorageVolatile";

/// Variable whose payload is copied to the target
pub const PAYLOAD_VAR: &str = "VarToFile";

/// Conventional ESP mount points, searched in order
pub const ESP_MOUNT_POINTS: [&str; 3] = ["/boot/efi/", "/boot/", "/efi/"];

/// Copy buffer size
pub const MIRROR_CHUNK_SIZE: usize = 1024;

/// Where the mirror reads from and writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceDescriptor {
    /// Namespace of both control variables
    pub namespace: Guid,

    /// Name of the variable holding the target filename
    pub file_name_var: String,

    /// Name of the variable whose payload is mirrored
    pub payload_var: String,

    /// Candidate mount points, first match wins
    pub mount_points: Vec<PathBuf>,

    /// Longest accepted target filename (in bytes)
    pub max_file_name_len: usize,
}

impl Default for PersistenceDescriptor {
    fn default() -> Self {
        Self {
            namespace: FILE_STORE_GUID,
            file_name_var: FILE_NAME_VAR.to_string(),
            payload_var: PAYLOAD_VAR.to_string(),
            mount_points: ESP_MOUNT_POINTS.iter().map(PathBuf::from).collect(),
            max_file_name_len: libc::PATH_MAX as usize / 4,
        }
    }
}

impl PersistenceDescriptor {
    /// Same variables, different mount points
    pub fn with_mount_points<I, P>(mount_points: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            mount_points: mount_points.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn file_name_key(&self) -> VariableKey {
        VariableKey::new(self.namespace, self.file_name_var.clone())
    }

    pub fn payload_key(&self) -> VariableKey {
        VariableKey::new(self.namespace, self.payload_var.clone())
    }
}

/// What a mirror pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// Target overwritten with `bytes` payload bytes
    Replicated { target: PathBuf, bytes: u64 },

    /// Nothing written (no target configured, or the reason went to the sink)
    Skipped,
}

/// Copies the payload variable onto its ESP file
#[derive(Debug, Clone)]
pub struct PersistenceMirror {
    descriptor: PersistenceDescriptor,
}

impl PersistenceMirror {
    pub fn new(descriptor: PersistenceDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &PersistenceDescriptor {
        &self.descriptor
    }

    /// Run one mirror pass
    ///
    /// Only `VarError::MirrorIo` is ever returned; every other problem
    /// becomes `MirrorOutcome::Skipped`.
    pub fn replicate(&self, store: &VarStore, operation: &'static str) -> Result<MirrorOutcome> {
        // Step 1: Which file?
        let file_name = match self.lookup(store) {
            Ok(Some(name)) => name,
            Ok(None) => return Ok(MirrorOutcome::Skipped),
            Err(e) => return Ok(self.skip(store, operation, e)),
        };

        // Step 2: Where is it?
        let target = match self.locate(&file_name, store.config().path_max) {
            Ok(target) => target,
            Err(e) => return Ok(self.skip(store, operation, e)),
        };

        // Step 3: Overwrite it
        match self.copy(store, &target) {
            Ok(bytes) => {
                tracing::debug!(target = %target.display(), bytes, "mirrored variable payload");
                Ok(MirrorOutcome::Replicated { target, bytes })
            }
            Err(e @ VarError::MirrorUnavailable(_)) => Ok(self.skip(store, operation, e)),
            Err(e) => Err(e),
        }
    }

    fn skip(&self, store: &VarStore, operation: &'static str, err: VarError) -> MirrorOutcome {
        store.sink().record(Diagnostic::new(
            operation,
            DiagnosticKind::MirrorUnavailable,
            err.to_string(),
        ));
        MirrorOutcome::Skipped
    }

    /// Target filename from the filename variable (up to the first NUL)
    ///
    /// `None` when the variable does not exist, which is the normal case on
    /// platforms without volatile variable storage.
    fn lookup(&self, store: &VarStore) -> Result<Option<PathBuf>> {
        let key = self.descriptor.file_name_key();
        let variable = match store.get(&key) {
            Ok(variable) => variable,
            Err(e) if e.is_not_found() => {
                tracing::trace!(variable = %key, "no mirror target configured");
                return Ok(None);
            }
            Err(e) => return Err(VarError::MirrorUnavailable(format!("{}: {}", key.name, e))),
        };

        if variable.data.len() > self.descriptor.max_file_name_len {
            return Err(VarError::MirrorUnavailable(format!(
                "filename too big ({} bytes, max {})",
                variable.data.len(),
                self.descriptor.max_file_name_len
            )));
        }

        let raw = variable
            .data
            .split(|b| *b == 0)
            .next()
            .unwrap_or_default();
        if raw.is_empty() {
            return Err(VarError::MirrorUnavailable(format!("{} is empty", key.name)));
        }

        Ok(Some(PathBuf::from(OsStr::from_bytes(raw))))
    }

    /// First mount point that already has the file
    fn locate(&self, file_name: &Path, path_max: usize) -> Result<PathBuf> {
        // The filename is relative to the ESP even when written with a
        // leading slash
        let relative: PathBuf = file_name
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();

        for mount_point in &self.descriptor.mount_points {
            let candidate = mount_point.join(&relative);
            if candidate.as_os_str().len() >= path_max {
                return Err(VarError::MirrorUnavailable(format!(
                    "filepath too big (max {})",
                    path_max
                )));
            }
            if fs::metadata(&candidate).is_ok() {
                return Ok(candidate);
            }
        }

        Err(VarError::MirrorUnavailable(format!(
            "'{}' not found on any ESP mount point, variable changes won't persist reboots",
            file_name.display()
        )))
    }

    /// Copy the payload variable's file, minus its header, onto `target`
    fn copy(&self, store: &VarStore, target: &Path) -> Result<u64> {
        let source_path = store
            .paths()
            .build_path(&self.descriptor.payload_key())
            .map_err(|e| VarError::MirrorUnavailable(e.to_string()))?;

        let mut source = File::open(&source_path).map_err(|e| {
            VarError::MirrorUnavailable(format!("could not open {}: {}", source_path.display(), e))
        })?;
        let mut output = File::create(target).map_err(|e| {
            VarError::MirrorUnavailable(format!("could not open {}: {}", target.display(), e))
        })?;

        // The target is truncated from here on; no way back
        let fatal = |op: &'static str| {
            move |source: io::Error| VarError::MirrorIo {
                op,
                path: target.to_path_buf(),
                source,
            }
        };

        let mut header = [0u8; RECORD_HEADER_LEN];
        source
            .read_exact(&mut header)
            .map_err(fatal("skip attribute header"))?;

        let mut buf = [0u8; MIRROR_CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(fatal("read payload")(e)),
            };
            output.write_all(&buf[..n]).map_err(fatal("write"))?;
            total += n as u64;
        }

        output.flush().map_err(fatal("flush"))?;
        output.sync_all().map_err(fatal("sync"))?;

        Ok(total)
    }
}

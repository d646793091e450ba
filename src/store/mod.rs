//! Store Module
//!
//! The efivarfs engine: reads, writes and enumerates variable files.
//!
//! ## Responsibilities
//! - Address variables through `PathResolver`
//! - Detect races between the two opens of `set`
//! - Clear and restore the immutable flag around every mutation
//! - Remove files created by a failed `set`
//! - Trigger the persistence mirror after every successful mutation
//!
//! ## Concurrency
//! No locks are taken. Other processes may touch the same files at any
//! time; exclusive create and descriptor identity are used to notice when
//! that happens, and the loser gets `VarError::Race`. On roots that are not
//! efivarfs, new records are written to a staging file and linked into
//! place, so a reader never sees a half-written create.

mod identity;
mod names;
mod record;

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::config::Config;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, TracingSink};
use crate::error::{Result, VarError};
use crate::immutable::{FlagControl, ImmutabilityGuard, IoctlFlags};
use crate::key::{Attributes, VariableKey};
use crate::mirror::PersistenceMirror;
use crate::ops::VariableOps;
use crate::paths::PathResolver;
use crate::probe::{self, MountProbe};

pub use identity::{FileId, OpenProtocol, PosixOpen};
pub use names::NameIter;
pub use record::{Variable, RECORD_HEADER_LEN};

/// efivarfs-backed variable store
pub struct VarStore {
    /// Store configuration
    config: Config,

    /// Root resolution and path building
    paths: PathResolver,

    /// Immutable flag handling for mutations
    guard: ImmutabilityGuard,

    /// Opens used by `set` for race detection
    opener: Arc<dyn OpenProtocol>,

    /// Where swallowed sub-step failures go
    sink: Arc<dyn DiagnosticSink>,

    /// Post-commit ESP mirror (None when disabled)
    mirror: Option<PersistenceMirror>,

    /// Whether the root is efivarfs itself, checked on first mutation
    efivarfs_root: OnceLock<bool>,
}

impl VarStore {
    /// Create a store with the default collaborators
    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    /// Create a store configured from the environment
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    /// Start building a store with custom collaborators
    pub fn builder(config: Config) -> VarStoreBuilder {
        VarStoreBuilder {
            config,
            sink: None,
            flags: None,
            opener: None,
        }
    }

    // =========================================================================
    // Availability
    // =========================================================================

    /// Whether the backend is usable at the resolved root
    pub fn probe(&self) -> bool {
        MountProbe::new(&self.paths, self.config.fs_magic, self.sink.as_ref()).is_available()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read a variable's attributes and payload
    ///
    /// Unprivileged callers are paced before each of the two reads, so one
    /// call may sleep twice.
    pub fn get(&self, key: &VariableKey) -> Result<Variable> {
        let path = self.paths.build_path(key)?;
        let mut file = File::open(&path).map_err(|e| VarError::io("open", &path, e))?;

        // Step 1: Attribute header
        self.pace();
        let mut header = [0u8; RECORD_HEADER_LEN];
        file.read_exact(&mut header).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => VarError::CorruptRecord {
                path: path.clone(),
                reason: "short attribute header".to_string(),
            },
            _ => VarError::io("read", &path, e),
        })?;

        // Step 2: Everything else is payload
        self.pace();
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| VarError::io("read", &path, e))?;

        tracing::debug!(variable = %key, size = data.len(), "read variable");

        Ok(Variable {
            attributes: record::decode_header(header),
            data,
        })
    }

    /// Payload size in bytes (file length minus the header)
    pub fn get_size(&self, key: &VariableKey) -> Result<u64> {
        let path = self.paths.build_path(key)?;
        let meta = fs::metadata(&path).map_err(|e| VarError::io("stat", &path, e))?;
        record::payload_len(&path, meta.len())
    }

    /// Attributes only; reads the whole record
    pub fn get_attributes(&self, key: &VariableKey) -> Result<Attributes> {
        self.get(key).map(|variable| variable.attributes)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create or replace a variable (or append, with `APPEND_WRITE`)
    ///
    /// `mode` is only used when the file is created.
    pub fn set(
        &self,
        key: &VariableKey,
        attributes: Attributes,
        data: &[u8],
        mode: u32,
    ) -> Result<()> {
        // Step 1: Validate before touching the filesystem
        key.validate()?;
        let record = record::encode(attributes, data)?;
        let path = self.paths.build_path(key)?;

        // Step 2: Observe the current file, if any
        let existing = match self.opener.observe(&path) {
            Ok(file) => {
                let id = self
                    .opener
                    .identify(&file)
                    .map_err(|e| VarError::io("identify", &path, e))?;
                Some((file, id))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(VarError::io("open", &path, e)),
        };

        // Step 3: Open for writing, verify, write once
        let bytes = if attributes.is_append() && existing.is_some() && !self.is_efivarfs_root() {
            &record[RECORD_HEADER_LEN..]
        } else {
            &record[..]
        };
        self.commit(
            &path,
            existing.as_ref().map(|(file, id)| (file, *id)),
            attributes,
            bytes,
            mode,
        )?;

        tracing::debug!(
            variable = %key,
            attributes = %attributes,
            size = data.len(),
            created = existing.is_none(),
            "wrote variable"
        );

        // Step 4: Mirror only after the write is committed
        self.sync_mirror("set")
    }

    /// Append to a variable; `set` with `APPEND_WRITE` forced on
    pub fn append(&self, key: &VariableKey, attributes: Attributes, data: &[u8]) -> Result<()> {
        self.set(key, attributes.with_append(), data, self.config.append_mode)
    }

    /// Remove a variable
    ///
    /// Clearing the immutable flag is best effort; the unlink decides the
    /// result. The mirror runs only after a successful unlink.
    pub fn delete(&self, key: &VariableKey) -> Result<()> {
        let path = self.paths.build_path(key)?;

        match File::open(&path) {
            Ok(file) => {
                if let Err(e) = self.guard.set(&file, &path, false) {
                    self.report("delete", DiagnosticKind::ImmutableClearFailed, &path, e.to_string());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self.report("delete", DiagnosticKind::ImmutableClearFailed, &path, e.to_string()),
        }

        fs::remove_file(&path).map_err(|e| VarError::io("unlink", &path, e))?;
        tracing::debug!(variable = %key, "deleted variable");

        self.sync_mirror("delete")
    }

    /// Change the permission bits of a variable file
    pub fn chmod(&self, key: &VariableKey, mode: u32) -> Result<()> {
        let path = self.paths.build_path(key)?;
        fs::set_permissions(&path, Permissions::from_mode(mode))
            .map_err(|e| VarError::io("chmod", &path, e))?;
        tracing::debug!(variable = %key, mode = %format!("{:o}", mode), "changed mode");
        Ok(())
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// The key that follows `after` (or the first key), `None` at the end
    pub fn get_next_name(&self, after: Option<&VariableKey>) -> Result<Option<VariableKey>> {
        let keys = names::list_keys(self.paths.resolve())?;
        Ok(names::next_after(keys, after))
    }

    /// Iterate over a snapshot of every key in the store
    pub fn names(&self) -> Result<NameIter> {
        names::list_keys(self.paths.resolve()).map(NameIter::new)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The resolved mount root
    pub fn root(&self) -> &Path {
        self.paths.resolve()
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Route a mutation to replace, in-place create or staged create
    fn commit(
        &self,
        path: &Path,
        existing: Option<(&File, FileId)>,
        attributes: Attributes,
        record: &[u8],
        mode: u32,
    ) -> Result<()> {
        match existing {
            Some((observed, id)) => self.replace(path, observed, id, attributes, record),
            None if self.is_efivarfs_root() => self.create_in_place(path, record, mode),
            None => self.create_staged(path, record, mode),
        }
    }

    /// Overwrite the file observed by `set`
    ///
    /// efivarfs replaces the whole variable on a single write, so nothing
    /// is truncated there. A plain file is written at offset 0 and then
    /// trimmed to the record length; its size never drops below the header,
    /// but a reader racing a shrinking replace can see the new prefix over
    /// the old tail until the trim lands.
    fn replace(
        &self,
        path: &Path,
        observed: &File,
        expected: FileId,
        attributes: Attributes,
        record: &[u8],
    ) -> Result<()> {
        // An existing immutable file can only be unlocked read-only
        let _observed_window = self.guard.make_mutable(observed, path, "set");

        let mut options = OpenOptions::new();
        options.write(true);
        if attributes.is_append() {
            options.append(true);
        }

        let file = match self.opener.reopen(path, &options) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(VarError::Race {
                    path: path.to_path_buf(),
                    reason: "removed between opens",
                })
            }
            Err(e) => return Err(VarError::io("open for writing", path, e)),
        };

        let actual = self
            .opener
            .identify(&file)
            .map_err(|e| VarError::io("identify", path, e))?;
        if actual != expected {
            return Err(VarError::Race {
                path: path.to_path_buf(),
                reason: "replaced between opens",
            });
        }

        self.write_once(&file, path, record)?;

        if !attributes.is_append() && !self.is_efivarfs_root() {
            file.set_len(record.len() as u64)
                .map_err(|e| VarError::io("truncate", path, e))?;
        }

        Ok(())
    }

    /// Exclusive create directly on the target (efivarfs)
    ///
    /// The kernel only makes the variable visible once the write lands. A
    /// file left behind by a failed write is unlinked.
    fn create_in_place(&self, path: &Path, record: &[u8], mode: u32) -> Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true).mode(mode);

        let file = self
            .opener
            .reopen(path, &options)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => VarError::Race {
                    path: path.to_path_buf(),
                    reason: "created by another writer",
                },
                _ => VarError::io("create", path, e),
            })?;

        let result = {
            // A fresh protected file may come back immutable straight away
            let _window = self.guard.make_mutable(&file, path, "set");
            self.write_once(&file, path, record)
        };

        if result.is_err() {
            if let Err(e) = fs::remove_file(path) {
                self.report("set", DiagnosticKind::RollbackFailed, path, e.to_string());
            }
        }

        result
    }

    /// Create on a plain directory: write a hidden staging file, then link
    /// it into place
    ///
    /// The link is atomic and fails if the target exists, so readers see
    /// either no file or the complete record and exactly one concurrent
    /// creator wins. The staging name is always removed afterwards.
    fn create_staged(&self, path: &Path, record: &[u8], mode: u32) -> Result<()> {
        let staged = staging_path(path);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true).mode(mode);

        let result = match self.opener.reopen(&staged, &options) {
            Ok(file) => {
                let written = {
                    let _window = self.guard.make_mutable(&file, &staged, "set");
                    self.write_once(&file, &staged, record)
                };
                drop(file);
                written.and_then(|()| {
                    self.opener.publish(&staged, path).map_err(|e| match e.kind() {
                        io::ErrorKind::AlreadyExists => VarError::Race {
                            path: path.to_path_buf(),
                            reason: "created by another writer",
                        },
                        _ => VarError::io("link", path, e),
                    })
                })
            }
            Err(e) => return Err(VarError::io("create staging file", &staged, e)),
        };

        if let Err(e) = fs::remove_file(&staged) {
            self.report("set", DiagnosticKind::RollbackFailed, &staged, e.to_string());
        }

        result
    }

    /// One `write` of the whole buffer; anything shorter is a failure
    fn write_once(&self, file: &File, path: &Path, record: &[u8]) -> Result<()> {
        let mut writer = file;
        let written = writer
            .write(record)
            .map_err(|e| VarError::io("write", path, e))?;
        if written != record.len() {
            return Err(VarError::WriteFailed {
                path: path.to_path_buf(),
                written,
                expected: record.len(),
            });
        }
        Ok(())
    }

    /// Whether the root is efivarfs itself
    ///
    /// efivarfs strips the header off an appending write and replaces the
    /// whole variable on a plain one. Any other root (override or test
    /// directories) gets payload-only appends, trimmed replaces and staged
    /// creates so the file keeps the same observable layout.
    fn is_efivarfs_root(&self) -> bool {
        *self.efivarfs_root.get_or_init(|| {
            probe::fs_magic(self.paths.resolve())
                .map(|magic| magic == self.config.fs_magic)
                .unwrap_or(false)
        })
    }

    /// Sleep before a read when pacing applies
    fn pace(&self) {
        if let Some(delay) = self.config.pacing.delay() {
            std::thread::sleep(delay);
        }
    }

    /// Run the mirror; only a fatal mirror error reaches the caller
    fn sync_mirror(&self, operation: &'static str) -> Result<()> {
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };

        mirror.replicate(self, operation).map(|_| ()).map_err(|e| {
            tracing::error!(operation, error = %e, "persistence mirror failed mid-copy");
            e
        })
    }

    fn report(&self, operation: &'static str, kind: DiagnosticKind, path: &Path, detail: String) {
        self.sink
            .record(Diagnostic::new(operation, kind, detail).at(path));
    }
}

/// Hidden sibling of `path`, unique per process and call
///
/// Starts with a dot and does not end in a GUID, so enumeration skips it.
fn staging_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = NEXT.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
}

impl VariableOps for VarStore {
    fn name(&self) -> &'static str {
        "efivarfs"
    }

    fn probe(&self) -> bool {
        VarStore::probe(self)
    }

    fn get(&self, key: &VariableKey) -> Result<Variable> {
        VarStore::get(self, key)
    }

    fn get_size(&self, key: &VariableKey) -> Result<u64> {
        VarStore::get_size(self, key)
    }

    fn get_attributes(&self, key: &VariableKey) -> Result<Attributes> {
        VarStore::get_attributes(self, key)
    }

    fn set(&self, key: &VariableKey, attributes: Attributes, data: &[u8], mode: u32) -> Result<()> {
        VarStore::set(self, key, attributes, data, mode)
    }

    fn append(&self, key: &VariableKey, attributes: Attributes, data: &[u8]) -> Result<()> {
        VarStore::append(self, key, attributes, data)
    }

    fn delete(&self, key: &VariableKey) -> Result<()> {
        VarStore::delete(self, key)
    }

    fn get_next_name(&self, after: Option<&VariableKey>) -> Result<Option<VariableKey>> {
        VarStore::get_next_name(self, after)
    }

    fn chmod(&self, key: &VariableKey, mode: u32) -> Result<()> {
        VarStore::chmod(self, key, mode)
    }
}

/// Builder for VarStore
pub struct VarStoreBuilder {
    config: Config,
    sink: Option<Arc<dyn DiagnosticSink>>,
    flags: Option<Arc<dyn FlagControl>>,
    opener: Option<Arc<dyn OpenProtocol>>,
}

impl VarStoreBuilder {
    /// Send diagnostics somewhere other than `tracing`
    pub fn sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use a different inode flag implementation
    pub fn flags(mut self, flags: Arc<dyn FlagControl>) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Use a different open/identify protocol
    pub fn opener(mut self, opener: Arc<dyn OpenProtocol>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn build(self) -> VarStore {
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));
        let flags = self.flags.unwrap_or_else(|| Arc::new(IoctlFlags));
        let opener = self.opener.unwrap_or_else(|| Arc::new(PosixOpen));
        let mirror = self.config.mirror.clone().map(PersistenceMirror::new);

        VarStore {
            paths: PathResolver::new(&self.config),
            guard: ImmutabilityGuard::new(flags, Arc::clone(&sink)),
            opener,
            sink,
            mirror,
            efivarfs_root: OnceLock::new(),
            config: self.config,
        }
    }
}

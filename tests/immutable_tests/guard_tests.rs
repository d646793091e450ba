//! Tests for ImmutabilityGuard and its use in VarStore
//!
//! These tests verify:
//! - Unsupported flag ioctls read as "not immutable"
//! - set() is a no-op when the state already matches
//! - MutableWindow restores the original flags on drop
//! - set/delete clear and restore the flag around mutations
//! - Restoration and clear failures are reported, never raised

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use varstore::diagnostics::{DiagnosticKind, DiagnosticSink, MemorySink};
use varstore::immutable::{FlagControl, ImmutabilityGuard, FS_IMMUTABLE_FL};
use varstore::{Attributes, Config, Guid, Pacing, VarStore, VariableKey};

// =============================================================================
// Test Double
// =============================================================================

/// In-memory inode flags keyed by inode number
#[derive(Default)]
struct FakeFlags {
    flags: Mutex<HashMap<u64, u32>>,
    /// (inode, flags) for every set_flags call
    calls: Mutex<Vec<(u64, u32)>>,
    /// Flags reported for inodes never seen before
    default_flags: u32,
    unsupported: bool,
    reject_restore: bool,
    reject_clear: bool,
}

impl FakeFlags {
    fn mark_immutable(&self, path: &Path) {
        let ino = fs::metadata(path).unwrap().ino();
        self.flags.lock().insert(ino, FS_IMMUTABLE_FL);
    }

    fn flags_of(&self, ino: u64) -> u32 {
        self.flags
            .lock()
            .get(&ino)
            .copied()
            .unwrap_or(self.default_flags)
    }

    fn calls(&self) -> Vec<(u64, u32)> {
        self.calls.lock().clone()
    }
}

impl FlagControl for FakeFlags {
    fn get_flags(&self, file: &File) -> io::Result<u32> {
        if self.unsupported {
            return Err(io::Error::from_raw_os_error(libc::ENOTTY));
        }
        Ok(self.flags_of(file.metadata()?.ino()))
    }

    fn set_flags(&self, file: &File, flags: u32) -> io::Result<()> {
        let ino = file.metadata()?.ino();
        self.calls.lock().push((ino, flags));

        let restoring = flags & FS_IMMUTABLE_FL != 0;
        if (restoring && self.reject_restore) || (!restoring && self.reject_clear) {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        self.flags.lock().insert(ino, flags);
        Ok(())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store(flags: Arc<FakeFlags>) -> (TempDir, VarStore, Arc<MemorySink>) {
    let temp_dir = TempDir::new().unwrap();
    let sink = Arc::new(MemorySink::new());
    let config = Config::builder()
        .root(temp_dir.path())
        .pacing(Pacing::Disabled)
        .without_mirror()
        .build();
    let store = VarStore::builder(config)
        .flags(flags)
        .sink(sink.clone())
        .build();
    (temp_dir, store, sink)
}

fn setup_guard(flags: Arc<FakeFlags>) -> (TempDir, ImmutabilityGuard, Arc<MemorySink>, File) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("file");
    fs::write(&path, b"data").unwrap();
    let file = File::open(&path).unwrap();
    let sink = Arc::new(MemorySink::new());
    let guard = ImmutabilityGuard::new(flags, sink.clone() as Arc<dyn DiagnosticSink>);
    (temp_dir, guard, sink, file)
}

fn key() -> VariableKey {
    VariableKey::new(Guid::ZERO, "Locked")
}

// =============================================================================
// Guard Tests
// =============================================================================

#[test]
fn test_query_unsupported_is_not_immutable() {
    let flags = Arc::new(FakeFlags {
        unsupported: true,
        ..Default::default()
    });
    let (_temp, guard, _sink, file) = setup_guard(flags.clone());

    assert_eq!(guard.query(&file, Path::new("file")).unwrap(), 0);
    assert!(!guard.is_immutable(&file, Path::new("file")).unwrap());
    // set() on an unsupported filesystem quietly does nothing
    guard.set(&file, Path::new("file"), true).unwrap();
    assert!(flags.calls().is_empty());
}

#[test]
fn test_set_is_noop_when_state_matches() {
    let flags = Arc::new(FakeFlags::default());
    let (_temp, guard, _sink, file) = setup_guard(flags.clone());

    guard.set(&file, Path::new("file"), false).unwrap();

    assert!(flags.calls().is_empty());
}

#[test]
fn test_set_toggles_flag() {
    let flags = Arc::new(FakeFlags::default());
    let (_temp, guard, _sink, file) = setup_guard(flags.clone());

    guard.set(&file, Path::new("file"), true).unwrap();
    assert!(guard.is_immutable(&file, Path::new("file")).unwrap());

    guard.set(&file, Path::new("file"), false).unwrap();
    assert!(!guard.is_immutable(&file, Path::new("file")).unwrap());
    assert_eq!(flags.calls().len(), 2);
}

#[test]
fn test_mutable_window_restores_on_drop() {
    let flags = Arc::new(FakeFlags {
        default_flags: FS_IMMUTABLE_FL | 0x1000,
        ..Default::default()
    });
    let (_temp, guard, sink, file) = setup_guard(flags.clone());
    let path = Path::new("file");

    {
        let window = guard.make_mutable(&file, path, "test").unwrap();
        assert_eq!(window.original_flags(), FS_IMMUTABLE_FL | 0x1000);
        assert!(!guard.is_immutable(&file, path).unwrap());
    }

    assert!(guard.is_immutable(&file, path).unwrap());
    let calls: Vec<u32> = flags.calls().into_iter().map(|(_, f)| f).collect();
    assert_eq!(calls, vec![0x1000, FS_IMMUTABLE_FL | 0x1000]);
    assert!(sink.is_empty());
}

#[test]
fn test_make_mutable_without_immutable_flag() {
    let flags = Arc::new(FakeFlags::default());
    let (_temp, guard, _sink, file) = setup_guard(flags.clone());

    assert!(guard.make_mutable(&file, Path::new("file"), "test").is_none());
    assert!(flags.calls().is_empty());
}

#[test]
fn test_restore_failure_is_reported() {
    let flags = Arc::new(FakeFlags {
        default_flags: FS_IMMUTABLE_FL,
        reject_restore: true,
        ..Default::default()
    });
    let (_temp, guard, sink, file) = setup_guard(flags);

    drop(guard.make_mutable(&file, Path::new("file"), "test"));

    assert_eq!(sink.count(DiagnosticKind::ImmutableRestoreFailed), 1);
}

// =============================================================================
// Store Integration Tests
// =============================================================================

#[test]
fn test_set_on_immutable_file_clears_and_restores() {
    let flags = Arc::new(FakeFlags::default());
    let (temp, store, sink) = setup_store(flags.clone());
    let key = key();
    store.set(&key, Attributes(0x7), &[1], 0o644).unwrap();
    let path = temp.path().join(key.file_name());
    flags.mark_immutable(&path);
    let ino = fs::metadata(&path).unwrap().ino();

    store.set(&key, Attributes(0x7), &[2, 3], 0o644).unwrap();

    assert_eq!(store.get(&key).unwrap().data, vec![2, 3]);
    assert_eq!(flags.calls(), vec![(ino, 0), (ino, FS_IMMUTABLE_FL)]);
    assert_eq!(flags.flags_of(ino), FS_IMMUTABLE_FL);
    assert!(sink.is_empty());
}

#[test]
fn test_create_of_protected_file_restores_flag() {
    // New inodes come back immutable, the way efivarfs creates them
    let flags = Arc::new(FakeFlags {
        default_flags: FS_IMMUTABLE_FL,
        ..Default::default()
    });
    let (temp, store, _sink) = setup_store(flags.clone());
    let key = key();

    store.set(&key, Attributes(0x7), &[1, 2, 3], 0o644).unwrap();

    let ino = fs::metadata(temp.path().join(key.file_name())).unwrap().ino();
    assert_eq!(flags.calls(), vec![(ino, 0), (ino, FS_IMMUTABLE_FL)]);
    assert_eq!(store.get(&key).unwrap().data, vec![1, 2, 3]);
}

#[test]
fn test_set_succeeds_when_restore_fails() {
    let flags = Arc::new(FakeFlags {
        default_flags: FS_IMMUTABLE_FL,
        reject_restore: true,
        ..Default::default()
    });
    let (_temp, store, sink) = setup_store(flags);
    let key = key();

    store.set(&key, Attributes(0x7), &[1], 0o644).unwrap();

    assert_eq!(sink.count(DiagnosticKind::ImmutableRestoreFailed), 1);
    assert_eq!(store.get(&key).unwrap().data, vec![1]);
}

#[test]
fn test_clear_failure_is_reported() {
    let flags = Arc::new(FakeFlags {
        default_flags: FS_IMMUTABLE_FL,
        reject_clear: true,
        ..Default::default()
    });
    let (_temp, store, sink) = setup_store(flags.clone());

    store.set(&key(), Attributes(0x7), &[1], 0o644).unwrap();

    assert_eq!(sink.count(DiagnosticKind::ImmutableClearFailed), 1);
    // Nothing was cleared, so nothing is restored
    assert_eq!(flags.calls().len(), 1);
}

#[test]
fn test_delete_clears_flag_first() {
    let flags = Arc::new(FakeFlags::default());
    let (temp, store, sink) = setup_store(flags.clone());
    let key = key();
    store.set(&key, Attributes(0x7), &[1], 0o644).unwrap();
    let path = temp.path().join(key.file_name());
    flags.mark_immutable(&path);
    let ino = fs::metadata(&path).unwrap().ino();

    store.delete(&key).unwrap();

    assert!(!path.exists());
    assert_eq!(flags.calls(), vec![(ino, 0)]);
    assert!(sink.is_empty());
}

#[test]
fn test_delete_swallows_clear_failure() {
    let flags = Arc::new(FakeFlags {
        reject_clear: true,
        ..Default::default()
    });
    let (temp, store, sink) = setup_store(flags.clone());
    let key = key();
    store.set(&key, Attributes(0x7), &[1], 0o644).unwrap();
    flags.mark_immutable(&temp.path().join(key.file_name()));

    store.delete(&key).unwrap();

    assert_eq!(sink.count(DiagnosticKind::ImmutableClearFailed), 1);
    assert!(store.get(&key).unwrap_err().is_not_found());
}

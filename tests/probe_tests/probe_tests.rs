//! Tests for MountProbe and root resolution
//!
//! These tests verify:
//! - A root with the expected filesystem magic is available
//! - An override root is trusted whatever its filesystem
//! - A wrong filesystem or a missing root is unavailable and reported
//! - The root is resolved once and then stays fixed

use std::sync::Arc;

use tempfile::TempDir;
use varstore::config::ROOT_OVERRIDE_ENV;
use varstore::diagnostics::{DiagnosticKind, MemorySink};
use varstore::probe::fs_magic;
use varstore::{Config, VarStore, VariableOps};

// =============================================================================
// Helper Functions
// =============================================================================

fn store_with(config: Config) -> (VarStore, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let store = VarStore::builder(config).sink(sink.clone()).build();
    (store, sink)
}

// =============================================================================
// Probe Tests
// =============================================================================

#[test]
fn test_matching_magic_is_available() {
    let temp = TempDir::new().unwrap();
    let magic = fs_magic(temp.path()).unwrap();
    let config = Config::builder()
        .default_root(temp.path())
        .fs_magic(magic)
        .build();

    let (store, sink) = store_with(config);

    assert!(store.probe());
    assert!(sink.is_empty());
}

#[test]
fn test_override_root_is_trusted() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder().root(temp.path()).build();

    let (store, sink) = store_with(config);

    // A temp directory is never efivarfs
    assert_ne!(fs_magic(temp.path()).unwrap(), varstore::config::EFIVARFS_MAGIC);
    assert!(store.probe());
    assert!(sink.is_empty());
}

#[test]
fn test_wrong_filesystem_is_unavailable() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder().default_root(temp.path()).build();

    let (store, sink) = store_with(config);

    assert!(!store.probe());
    assert_eq!(sink.count(DiagnosticKind::ProbeFailed), 1);
    let entry = &sink.entries()[0];
    assert_eq!(entry.operation, "probe");
    assert_eq!(entry.path.as_deref(), Some(temp.path()));
    assert!(entry.detail.contains("bad fs type"));
}

#[test]
fn test_missing_root_is_unavailable() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .default_root(temp.path().join("not-mounted"))
        .build();

    let (store, sink) = store_with(config);

    assert!(!store.probe());
    assert_eq!(sink.count(DiagnosticKind::ProbeFailed), 1);
    assert!(sink.entries()[0].detail.contains("statfs failed"));
}

#[test]
fn test_missing_override_root_is_unavailable() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder().root(temp.path().join("gone")).build();

    let (store, _sink) = store_with(config);

    assert!(!store.probe());
}

#[test]
fn test_probe_through_trait_object() {
    let temp = TempDir::new().unwrap();
    let (store, _sink) = store_with(Config::builder().root(temp.path()).build());
    let ops: &dyn VariableOps = &store;

    assert_eq!(ops.name(), "efivarfs");
    assert!(ops.probe());
}

// =============================================================================
// Root Resolution Tests
// =============================================================================

#[test]
fn test_env_override_resolved_once() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    std::env::set_var(ROOT_OVERRIDE_ENV, first.path());
    let store = VarStore::from_env();
    assert_eq!(store.root(), first.path());

    // Changing the environment afterwards has no effect on this store
    std::env::set_var(ROOT_OVERRIDE_ENV, second.path());
    assert_eq!(store.root(), first.path());
    assert!(store.paths().is_override_root());

    std::env::remove_var(ROOT_OVERRIDE_ENV);
    let store = VarStore::from_env();
    assert_eq!(store.root(), std::path::Path::new(varstore::config::DEFAULT_ROOT));
}

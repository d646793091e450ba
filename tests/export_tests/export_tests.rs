//! Tests for variable export files
//!
//! These tests verify:
//! - A variable exported from one store imports into another unchanged
//! - Corruption (checksum, magic, version, length) is detected
//! - File errors carry the export path

use std::fs;

use tempfile::TempDir;
use varstore::export::{ExportedVariable, EXPORT_MAGIC};
use varstore::{Attributes, Config, Guid, Pacing, VarError, VarStore, VariableKey};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, VarStore) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .root(temp_dir.path())
        .pacing(Pacing::Disabled)
        .without_mirror()
        .build();
    (temp_dir, VarStore::new(config))
}

fn sample() -> ExportedVariable {
    let guid: Guid = "8be4df61-93ca-11d2-aa0d-00e098032b8c".parse().unwrap();
    ExportedVariable {
        guid: guid.to_efi_bytes(),
        name: "Timeout".to_string(),
        attributes: Attributes(0x7),
        data: vec![5, 0],
    }
}

/// Recompute the trailing checksum after tampering with the body
fn reseal(bytes: &mut Vec<u8>) {
    let len = bytes.len() - 4;
    let crc = crc32fast::hash(&bytes[..len]);
    bytes[len..].copy_from_slice(&crc.to_le_bytes());
}

// =============================================================================
// Format Tests
// =============================================================================

#[test]
fn test_encode_layout() {
    let bytes = sample().encode().unwrap();

    assert_eq!(&bytes[..4], EXPORT_MAGIC);
    assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 1);
    let body_len = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
    assert_eq!(bytes.len(), 10 + body_len + 4);
}

#[test]
fn test_decode_restores_variable() {
    let exported = sample();
    let decoded = ExportedVariable::decode(&exported.encode().unwrap()).unwrap();

    assert_eq!(decoded, exported);
    assert_eq!(
        decoded.key().to_string(),
        "Timeout-8be4df61-93ca-11d2-aa0d-00e098032b8c"
    );
}

#[test]
fn test_flipped_bit_fails_checksum() {
    let mut bytes = sample().encode().unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;

    let err = ExportedVariable::decode(&bytes).unwrap_err();

    match err {
        VarError::CorruptRecord { reason, .. } => assert!(reason.contains("checksum")),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_bad_magic() {
    let mut bytes = sample().encode().unwrap();
    bytes[0] = b'X';
    reseal(&mut bytes);

    let err = ExportedVariable::decode(&bytes).unwrap_err();

    match err {
        VarError::CorruptRecord { reason, .. } => assert!(reason.contains("magic")),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_unsupported_version() {
    let mut bytes = sample().encode().unwrap();
    bytes[4] = 9;
    reseal(&mut bytes);

    let err = ExportedVariable::decode(&bytes).unwrap_err();

    match err {
        VarError::CorruptRecord { reason, .. } => assert!(reason.contains("version")),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_length_mismatch() {
    let mut bytes = sample().encode().unwrap();
    bytes[6] = bytes[6].wrapping_add(1);
    reseal(&mut bytes);

    assert!(matches!(
        ExportedVariable::decode(&bytes),
        Err(VarError::CorruptRecord { .. })
    ));
}

#[test]
fn test_truncated_file() {
    assert!(matches!(
        ExportedVariable::decode(b"VARX"),
        Err(VarError::CorruptRecord { .. })
    ));
}

// =============================================================================
// Store Round Trip Tests
// =============================================================================

#[test]
fn test_export_then_import_into_other_store() {
    let (_src_dir, source) = setup_temp_store();
    let (_dst_dir, dest) = setup_temp_store();
    let scratch = TempDir::new().unwrap();
    let file = scratch.path().join("boot.varx");
    let key = VariableKey::new(Guid::ZERO, "BootOrder");
    source
        .set(&key, Attributes(0x7), &[0x01, 0x00, 0x02, 0x00], 0o644)
        .unwrap();

    ExportedVariable::from_store(&source, &key)
        .unwrap()
        .write_to(&file)
        .unwrap();
    ExportedVariable::read_from(&file)
        .unwrap()
        .import(&dest, 0o600)
        .unwrap();

    let var = dest.get(&key).unwrap();
    assert_eq!(var.attributes, Attributes(0x7));
    assert_eq!(var.data, vec![0x01, 0x00, 0x02, 0x00]);
}

#[test]
fn test_export_missing_variable() {
    let (_temp, store) = setup_temp_store();

    let err = ExportedVariable::from_store(&store, &VariableKey::new(Guid::ZERO, "Nope"))
        .unwrap_err();

    assert!(err.is_not_found());
}

#[test]
fn test_read_from_reports_path() {
    let scratch = TempDir::new().unwrap();
    let file = scratch.path().join("bad.varx");
    fs::write(&file, b"not an export file at all").unwrap();

    let err = ExportedVariable::read_from(&file).unwrap_err();

    match err {
        VarError::CorruptRecord { path, .. } => assert_eq!(path, file),
        other => panic!("unexpected error: {}", other),
    }
}

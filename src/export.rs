//! Variable export files
//!
//! A single variable saved to a standalone, checksummed file so it can be
//! restored later or on another machine.
//!
//! ## File Format
//! ```text
//! ┌──────────┬─────────────┬─────────────┬─────────────────┬──────────┐
//! │Magic (4) │ Version (2) │ Len (4)     │ bincode body    │ CRC (4)  │
//! │ "VARX"   │ u16 LE      │ u32 LE      │ ExportedVariable│ u32 LE   │
//! └──────────┴─────────────┴─────────────┴─────────────────┴──────────┘
//! ```
//! The CRC covers every byte before it.

use std::fs;
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VarError};
use crate::key::{Attributes, Guid, VariableKey};
use crate::store::VarStore;

/// Magic bytes identifying an export file
pub const EXPORT_MAGIC: &[u8; 4] = b"VARX";

/// Current export format version
pub const EXPORT_VERSION: u16 = 1;

/// Magic (4) + Version (2) + Body length (4)
const PREFIX_SIZE: usize = 10;

/// CRC32 trailer
const CRC_SIZE: usize = 4;

/// A variable as stored in an export file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedVariable {
    /// Namespace in EFI byte order
    pub guid: [u8; 16],
    pub name: String,
    pub attributes: Attributes,
    pub data: Vec<u8>,
}

impl ExportedVariable {
    /// Read a variable out of the store
    pub fn from_store(store: &VarStore, key: &VariableKey) -> Result<Self> {
        let variable = store.get(key)?;
        Ok(Self {
            guid: key.guid.to_efi_bytes(),
            name: key.name.clone(),
            attributes: variable.attributes,
            data: variable.data,
        })
    }

    pub fn key(&self) -> VariableKey {
        VariableKey::new(Guid::from_efi_bytes(self.guid), self.name.clone())
    }

    /// Write the variable back through a normal `set`
    pub fn import(&self, store: &VarStore, mode: u32) -> Result<()> {
        store.set(&self.key(), self.attributes, &self.data, mode)
    }

    /// Serialize to the export file format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self).map_err(|e| VarError::Serialization(e.to_string()))?;
        let body_len = u32::try_from(body.len()).map_err(|_| VarError::Overflow(body.len()))?;

        let mut buf = BytesMut::with_capacity(PREFIX_SIZE + body.len() + CRC_SIZE);
        buf.put_slice(EXPORT_MAGIC);
        buf.put_u16_le(EXPORT_VERSION);
        buf.put_u32_le(body_len);
        buf.put_slice(&body);

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);

        Ok(buf.to_vec())
    }

    /// Parse and verify an export file
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| VarError::CorruptRecord {
            path: Default::default(),
            reason,
        };

        if bytes.len() < PREFIX_SIZE + CRC_SIZE {
            return Err(corrupt(format!("export too short: {} bytes", bytes.len())));
        }

        let (covered, mut trailer) = bytes.split_at(bytes.len() - CRC_SIZE);
        let expected_crc = trailer.get_u32_le();
        let actual_crc = crc32fast::hash(covered);
        if expected_crc != actual_crc {
            return Err(corrupt(format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                expected_crc, actual_crc
            )));
        }

        let mut prefix = &covered[..PREFIX_SIZE];
        if &prefix[..4] != EXPORT_MAGIC {
            return Err(corrupt(format!("bad magic {:?}", &prefix[..4])));
        }
        prefix.advance(4);

        let version = prefix.get_u16_le();
        if version != EXPORT_VERSION {
            return Err(corrupt(format!("unsupported export version {}", version)));
        }

        let body_len = prefix.get_u32_le() as usize;
        let body = &covered[PREFIX_SIZE..];
        if body.len() != body_len {
            return Err(corrupt(format!(
                "body length mismatch: header says {}, found {}",
                body_len,
                body.len()
            )));
        }

        bincode::deserialize(body).map_err(|e| VarError::Serialization(e.to_string()))
    }

    /// Save to `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        fs::write(path, bytes).map_err(|e| VarError::io("write export", path, e))
    }

    /// Load from `path`
    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| VarError::io("read export", path, e))?;
        Self::decode(&bytes).map_err(|e| match e {
            VarError::CorruptRecord { reason, .. } => VarError::CorruptRecord {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }
}

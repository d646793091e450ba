//! Record layout
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────┐
//! │ Attributes (4)   │ Payload (N)                  │
//! │ u32, native end. │                              │
//! └──────────────────┴──────────────────────────────┘
//! ```
//! The payload length is never stored; it is the file length minus 4.

use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, VarError};
use crate::key::Attributes;

/// Size of the attribute header
pub const RECORD_HEADER_LEN: usize = 4;

/// A variable as read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub attributes: Attributes,
    pub data: Vec<u8>,
}

/// Header and payload as one contiguous buffer, ready for a single write
pub(crate) fn encode(attributes: Attributes, data: &[u8]) -> Result<Bytes> {
    let len = RECORD_HEADER_LEN
        .checked_add(data.len())
        .filter(|len| *len <= isize::MAX as usize)
        .ok_or(VarError::Overflow(data.len()))?;

    let mut buf = BytesMut::with_capacity(len);
    buf.put_slice(&attributes.bits().to_ne_bytes());
    buf.put_slice(data);
    Ok(buf.freeze())
}

pub(crate) fn decode_header(header: [u8; RECORD_HEADER_LEN]) -> Attributes {
    Attributes(u32::from_ne_bytes(header))
}

/// Payload size for a record file of `file_len` bytes
pub(crate) fn payload_len(path: &Path, file_len: u64) -> Result<u64> {
    file_len
        .checked_sub(RECORD_HEADER_LEN as u64)
        .ok_or_else(|| VarError::CorruptRecord {
            path: path.to_path_buf(),
            reason: format!("{} bytes is shorter than the attribute header", file_len),
        })
}

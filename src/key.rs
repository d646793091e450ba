//! Variable addressing
//!
//! A variable is addressed by a namespace GUID and a name. The backing file
//! for a key is called `{name}-{guid}`, with the GUID in lowercase
//! hyphenated form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VarError};

/// Maximum length of a variable name in bytes
pub const MAX_NAME_LEN: usize = 1024;

/// Length of a GUID in canonical text form
pub const GUID_TEXT_LEN: usize = 36;

// =============================================================================
// Guid
// =============================================================================

/// 128-bit namespace identifier
///
/// Stored the way firmware lays it out: the first three fields are
/// little-endian, the trailing eight bytes are taken as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Guid(Uuid);

impl Guid {
    /// The all-zero namespace
    pub const ZERO: Guid = Guid(Uuid::nil());

    /// Build a GUID from its EFI fields
    pub const fn from_fields(a: u32, b: u16, c: u16, d: [u8; 8]) -> Self {
        Guid(Uuid::from_fields(a, b, c, &d))
    }

    /// Build a GUID from 16 bytes in EFI (mixed-endian) order
    pub fn from_efi_bytes(bytes: [u8; 16]) -> Self {
        Guid(Uuid::from_bytes_le(bytes))
    }

    /// The 16 bytes in EFI (mixed-endian) order
    pub fn to_efi_bytes(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Guid {
    type Err = VarError;

    /// Parse the hyphenated text form only (braced/urn/simple forms are
    /// never used in filenames).
    fn from_str(s: &str) -> Result<Self> {
        if s.len() != GUID_TEXT_LEN {
            return Err(VarError::InvalidArgument(format!(
                "GUID must be {} characters, got {}",
                GUID_TEXT_LEN,
                s.len()
            )));
        }
        Uuid::parse_str(s)
            .map(Guid)
            .map_err(|e| VarError::InvalidArgument(format!("bad GUID {:?}: {}", s, e)))
    }
}

// =============================================================================
// VariableKey
// =============================================================================

/// Unique address of a variable: (namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableKey {
    pub guid: Guid,
    pub name: String,
}

impl VariableKey {
    pub fn new(guid: Guid, name: impl Into<String>) -> Self {
        Self {
            guid,
            name: name.into(),
        }
    }

    /// Check the name length limit
    pub fn validate(&self) -> Result<()> {
        if self.name.len() > MAX_NAME_LEN {
            return Err(VarError::InvalidArgument(format!(
                "name too long ({} of {})",
                self.name.len(),
                MAX_NAME_LEN
            )));
        }
        Ok(())
    }

    /// Backing filename, `{name}-{guid}`
    pub fn file_name(&self) -> String {
        format!("{}-{}", self.name, self.guid)
    }

    /// Parse a backing filename back into a key
    ///
    /// "Boot0001-8be4df61-93ca-11d2-aa0d-00e098032b8c" → Some(key)
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        // name, '-', guid
        let split = file_name.len().checked_sub(GUID_TEXT_LEN + 1)?;
        if split == 0 || !file_name.is_char_boundary(split) {
            return None;
        }
        let (name, rest) = file_name.split_at(split);
        let guid = rest.strip_prefix('-')?.parse().ok()?;
        Some(Self::new(guid, name))
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.guid)
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// 32-bit attribute mask stored in the record header
///
/// Only `APPEND_WRITE` changes how the store behaves; the other bits are
/// carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Attributes(pub u32);

impl Attributes {
    pub const NON_VOLATILE: u32 = 0x0000_0001;
    pub const BOOTSERVICE_ACCESS: u32 = 0x0000_0002;
    pub const RUNTIME_ACCESS: u32 = 0x0000_0004;
    pub const HARDWARE_ERROR_RECORD: u32 = 0x0000_0008;
    pub const AUTHENTICATED_WRITE_ACCESS: u32 = 0x0000_0010;
    pub const TIME_BASED_AUTHENTICATED_WRITE_ACCESS: u32 = 0x0000_0020;
    pub const APPEND_WRITE: u32 = 0x0000_0040;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_append(self) -> bool {
        self.0 & Self::APPEND_WRITE != 0
    }

    pub fn with_append(self) -> Self {
        Attributes(self.0 | Self::APPEND_WRITE)
    }

    /// Short names of the well-known bits that are set
    pub fn names(self) -> Vec<&'static str> {
        const NAMES: [(u32, &str); 7] = [
            (Attributes::NON_VOLATILE, "NV"),
            (Attributes::BOOTSERVICE_ACCESS, "BS"),
            (Attributes::RUNTIME_ACCESS, "RT"),
            (Attributes::HARDWARE_ERROR_RECORD, "HER"),
            (Attributes::AUTHENTICATED_WRITE_ACCESS, "AW"),
            (Attributes::TIME_BASED_AUTHENTICATED_WRITE_ACCESS, "TBAW"),
            (Attributes::APPEND_WRITE, "AP"),
        ];
        NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl From<u32> for Attributes {
    fn from(bits: u32) -> Self {
        Attributes(bits)
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

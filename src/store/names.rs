//! Namespace enumeration
//!
//! Walks the mount root and turns `{name}-{guid}` filenames back into keys.
//! Anything that does not parse as a variable filename is skipped.

use std::fs;
use std::path::Path;

use crate::error::{Result, VarError};
use crate::key::VariableKey;

/// All keys under `root`, ordered by backing filename
pub(crate) fn list_keys(root: &Path) -> Result<Vec<VariableKey>> {
    let entries = fs::read_dir(root).map_err(|e| VarError::io("read_dir", root, e))?;

    let mut keys = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| VarError::io("read_dir", root, e))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(key) = VariableKey::from_file_name(file_name) {
            keys.push(key);
        }
    }

    keys.sort_by_cached_key(|key| key.file_name());
    Ok(keys)
}

/// First key strictly after `after` in listing order
pub(crate) fn next_after(keys: Vec<VariableKey>, after: Option<&VariableKey>) -> Option<VariableKey> {
    match after {
        None => keys.into_iter().next(),
        Some(after) => {
            let after = after.file_name();
            keys.into_iter().find(|key| key.file_name() > after)
        }
    }
}

/// Iterator over a snapshot of the keys in the store
#[derive(Debug)]
pub struct NameIter {
    keys: std::vec::IntoIter<VariableKey>,
}

impl NameIter {
    pub(crate) fn new(keys: Vec<VariableKey>) -> Self {
        Self {
            keys: keys.into_iter(),
        }
    }
}

impl Iterator for NameIter {
    type Item = VariableKey;

    fn next(&mut self) -> Option<Self::Item> {
        self.keys.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.keys.size_hint()
    }
}

//! Path resolution
//!
//! Resolves the mount root once and builds per-variable file paths.

use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::Config;
use crate::error::{Result, VarError};
use crate::key::VariableKey;

/// Resolves the store root and builds variable paths
///
/// The root is picked on the first `resolve()` call (override, else the
/// default) and then stays fixed for the life of the resolver, even if the
/// configuration source changes underneath it.
#[derive(Debug)]
pub struct PathResolver {
    root_override: Option<PathBuf>,
    default_root: PathBuf,
    path_max: usize,
    root: OnceLock<PathBuf>,
}

impl PathResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            root_override: config.root_override.clone(),
            default_root: config.default_root.clone(),
            path_max: config.path_max,
            root: OnceLock::new(),
        }
    }

    /// The mount root, resolved on first use
    pub fn resolve(&self) -> &Path {
        self.root.get_or_init(|| {
            let root = self
                .root_override
                .clone()
                .unwrap_or_else(|| self.default_root.clone());
            tracing::debug!(root = %root.display(), "resolved variable store root");
            root
        })
    }

    /// Whether the override names exactly the resolved root
    pub fn is_override_root(&self) -> bool {
        self.root_override.as_deref() == Some(self.resolve())
    }

    /// `{root}/{name}-{guid}`
    ///
    /// Fails with `PathTooLong` when the result would not fit in the
    /// platform path limit (including the terminating NUL).
    pub fn build_path(&self, key: &VariableKey) -> Result<PathBuf> {
        let path = self.resolve().join(key.file_name());
        let len = path.as_os_str().as_bytes().len();
        if len >= self.path_max {
            return Err(VarError::PathTooLong {
                len,
                max: self.path_max.saturating_sub(1),
            });
        }
        Ok(path)
    }
}

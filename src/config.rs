//! Configuration for varstore
//!
//! Centralized configuration with sensible defaults. Built once per process
//! and passed by reference into every component.

use std::path::PathBuf;
use std::time::Duration;

use crate::mirror::PersistenceDescriptor;

/// Environment variable naming an alternate mount root
pub const ROOT_OVERRIDE_ENV: &str = "EFIVARFS_PATH";

/// Where efivarfs is normally mounted
pub const DEFAULT_ROOT: &str = "/sys/firmware/efi/efivars/";

/// `statfs` magic reported by efivarfs
pub const EFIVARFS_MAGIC: u64 = 0xde5e_81e4;

/// Delay applied before each read for unprivileged callers.
///
/// The kernel throttles unprivileged efivarfs reads to ~100 per second.
pub const UNPRIVILEGED_READ_DELAY: Duration = Duration::from_millis(10);

/// Main configuration for a VarStore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Mount Configuration
    // -------------------------------------------------------------------------
    /// Explicit mount root, normally taken from `EFIVARFS_PATH`.
    /// Also acts as the trusted escape hatch in the mount probe.
    pub root_override: Option<PathBuf>,

    /// Root used when no override is given
    pub default_root: PathBuf,

    /// Filesystem magic the probe expects at the root
    pub fs_magic: u64,

    /// Longest path (in bytes) a variable file may have
    pub path_max: usize,

    // -------------------------------------------------------------------------
    // I/O Configuration
    // -------------------------------------------------------------------------
    /// Read pacing policy for `get`
    pub pacing: Pacing,

    /// Permission bits for files created by `append`
    pub append_mode: u32,

    // -------------------------------------------------------------------------
    // Persistence Configuration
    // -------------------------------------------------------------------------
    /// Mirror target description; `None` disables mirroring
    pub mirror: Option<PersistenceDescriptor>,
}

/// How `get` paces its reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Delay by `UNPRIVILEGED_READ_DELAY` unless the effective uid is 0
    Auto,

    /// Always delay by the given amount
    Fixed(Duration),

    /// Never delay
    Disabled,
}

impl Pacing {
    /// Delay to apply before a single read
    pub fn delay(self) -> Option<Duration> {
        match self {
            // SAFETY: geteuid has no preconditions and cannot fail
            Pacing::Auto if unsafe { libc::geteuid() } != 0 => Some(UNPRIVILEGED_READ_DELAY),
            Pacing::Auto => None,
            Pacing::Fixed(d) if d.is_zero() => None,
            Pacing::Fixed(d) => Some(d),
            Pacing::Disabled => None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_override: None,
            default_root: PathBuf::from(DEFAULT_ROOT),
            fs_magic: EFIVARFS_MAGIC,
            path_max: libc::PATH_MAX as usize,
            pacing: Pacing::Auto,
            append_mode: 0o644,
            mirror: Some(PersistenceDescriptor::default()),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Default config with the root override read from `EFIVARFS_PATH`
    pub fn from_env() -> Self {
        Self {
            root_override: std::env::var_os(ROOT_OVERRIDE_ENV).map(PathBuf::from),
            ..Self::default()
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the mount root override
    pub fn root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_override = Some(path.into());
        self
    }

    /// Set the fallback root used without an override
    pub fn default_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.default_root = path.into();
        self
    }

    /// Set the filesystem magic the probe expects
    pub fn fs_magic(mut self, magic: u64) -> Self {
        self.config.fs_magic = magic;
        self
    }

    /// Set the path length limit (in bytes)
    pub fn path_max(mut self, len: usize) -> Self {
        self.config.path_max = len;
        self
    }

    /// Set the read pacing policy
    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.config.pacing = pacing;
        self
    }

    /// Set the permission bits used when `append` creates a file
    pub fn append_mode(mut self, mode: u32) -> Self {
        self.config.append_mode = mode;
        self
    }

    /// Set the persistence mirror descriptor
    pub fn mirror(mut self, descriptor: PersistenceDescriptor) -> Self {
        self.config.mirror = Some(descriptor);
        self
    }

    /// Disable persistence mirroring
    pub fn without_mirror(mut self) -> Self {
        self.config.mirror = None;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

//! Open/identify protocol
//!
//! `set` detects races by opening the same path twice and checking that
//! both descriptors name the same file. Creates on plain directories are
//! staged and then published with an exclusive link. The opens, the link
//! and the identity check go through `OpenProtocol` so other backends and
//! test doubles can take part in the same race-detection contract.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Identity of an open file (device + inode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub dev: u64,
    pub ino: u64,
}

/// Open, observe identity, reopen, verify identity
pub trait OpenProtocol: Send + Sync {
    /// Open read-only to observe a file that may already exist
    fn observe(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    /// Open for the mutating write
    fn reopen(&self, path: &Path, options: &OpenOptions) -> io::Result<File> {
        options.open(path)
    }

    /// Make a fully written staging file visible as `path`
    ///
    /// Must fail with `AlreadyExists` when `path` is already taken.
    fn publish(&self, staged: &Path, path: &Path) -> io::Result<()> {
        fs::hard_link(staged, path)
    }

    /// Identity of an open descriptor
    fn identify(&self, file: &File) -> io::Result<FileId> {
        let meta = file.metadata()?;
        Ok(FileId {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

/// Plain POSIX opens with device/inode identity
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixOpen;

impl OpenProtocol for PosixOpen {}

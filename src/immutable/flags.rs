//! Inode flag access
//!
//! `FS_IOC_GETFLAGS` / `FS_IOC_SETFLAGS` behind a trait so tests can
//! simulate immutable files without CAP_LINUX_IMMUTABLE.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// The immutable bit in the inode flag word
pub const FS_IMMUTABLE_FL: u32 = 0x0000_0010;

// _IOR('f', 1, long) / _IOW('f', 2, long); the size field follows the
// width of `long`, the kernel reads and writes an int either way.
#[cfg(target_pointer_width = "64")]
const FS_IOC_GETFLAGS: u64 = 0x8008_6601;
#[cfg(target_pointer_width = "64")]
const FS_IOC_SETFLAGS: u64 = 0x4008_6602;
#[cfg(target_pointer_width = "32")]
const FS_IOC_GETFLAGS: u64 = 0x8004_6601;
#[cfg(target_pointer_width = "32")]
const FS_IOC_SETFLAGS: u64 = 0x4004_6602;

/// Reads and writes the inode flag word of an open file
pub trait FlagControl: Send + Sync {
    fn get_flags(&self, file: &File) -> io::Result<u32>;

    fn set_flags(&self, file: &File, flags: u32) -> io::Result<()>;
}

/// `FlagControl` backed by the Linux inode flag ioctls
#[derive(Debug, Default, Clone, Copy)]
pub struct IoctlFlags;

impl FlagControl for IoctlFlags {
    fn get_flags(&self, file: &File) -> io::Result<u32> {
        let mut flags: libc::c_int = 0;
        // SAFETY: the fd is open for the duration of the call and flags is
        // a valid out pointer of the size the kernel writes
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                FS_IOC_GETFLAGS as _,
                &mut flags as *mut libc::c_int,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(flags as u32)
    }

    fn set_flags(&self, file: &File, flags: u32) -> io::Result<()> {
        let flags = flags as libc::c_int;
        // SAFETY: as above; the kernel only reads through the pointer
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                FS_IOC_SETFLAGS as _,
                &flags as *const libc::c_int,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Whether an error means "this filesystem has no inode flags"
pub(crate) fn is_unsupported(err: &io::Error) -> bool {
    match err.raw_os_error() {
        Some(code) => matches!(
            code,
            libc::ENOTTY | libc::EOPNOTSUPP | libc::ENOSYS | libc::EINVAL
        ),
        None => err.kind() == io::ErrorKind::Unsupported,
    }
}

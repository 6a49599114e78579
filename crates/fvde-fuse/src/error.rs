//! Error handling and mapping for the FUSE adapter.
//!
//! Every error is reduced to a POSIX errno through the shared
//! [`ErrorCategory`](fvde_mount::ErrorCategory).

use fvde_core::FvdeError;
use fvde_mount::{io_error_to_errno, ErrorCategory};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FuseError {
    /// Error from the file-system model or the volume engine.
    #[error(transparent)]
    Fvde(#[from] FvdeError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The kernel asked about an inode this file system never handed out.
    #[error("Unknown inode: {0}")]
    UnknownInode(u64),

    #[error("Unknown file handle: {0}")]
    UnknownHandle(u64),

    /// Name is not valid UTF-8.
    #[error("Invalid file name")]
    InvalidName,

    /// Negative offset in a read request.
    #[error("Invalid offset: {0}")]
    InvalidOffset(i64),

    /// Open or access check asked for write access.
    #[error("Volumes are mounted read-only")]
    WriteAccess,
}

impl FuseError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseError::Fvde(e) => e.to_errno(),
            FuseError::Io(e) => e.to_errno(),
            FuseError::UnknownInode(_) => libc::ENOENT,
            FuseError::UnknownHandle(_) => libc::EBADF,
            FuseError::InvalidName | FuseError::InvalidOffset(_) => libc::EINVAL,
            FuseError::WriteAccess => libc::EACCES,
        }
    }
}

pub type FuseResult<T> = Result<T, FuseError>;

/// Extension trait to convert errors to errno.
pub trait ToErrno {
    fn to_errno(&self) -> i32;
}

impl ToErrno for FvdeError {
    fn to_errno(&self) -> i32 {
        ErrorCategory::from(self).to_errno()
    }
}

impl ToErrno for io::Error {
    fn to_errno(&self) -> i32 {
        io_error_to_errno(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fvde_core::EngineError;

    #[test]
    fn test_model_errors() {
        let not_found = FuseError::from(FvdeError::NotFound("/fvde3".into()));
        assert_eq!(not_found.to_errno(), libc::ENOENT);
        assert_eq!(FuseError::from(FvdeError::IsDirectory).to_errno(), libc::EISDIR);
        assert_eq!(FuseError::from(FvdeError::NotDirectory).to_errno(), libc::ENOTDIR);
    }

    #[test]
    fn test_locked_volume_read_is_eio() {
        let err = FuseError::from(FvdeError::Engine(EngineError::Locked));
        assert_eq!(err.to_errno(), libc::EIO);
    }

    #[test]
    fn test_adapter_errors() {
        assert_eq!(FuseError::UnknownInode(99).to_errno(), libc::ENOENT);
        assert_eq!(FuseError::UnknownHandle(7).to_errno(), libc::EBADF);
        assert_eq!(FuseError::InvalidName.to_errno(), libc::EINVAL);
        assert_eq!(FuseError::InvalidOffset(-1).to_errno(), libc::EINVAL);
        assert_eq!(FuseError::WriteAccess.to_errno(), libc::EACCES);
    }

    #[test]
    fn test_io_error_keeps_os_code() {
        let e = io::Error::from_raw_os_error(libc::ENXIO);
        assert_eq!(ToErrno::to_errno(&e), libc::ENXIO);
        assert_eq!(FuseError::from(e).to_errno(), libc::ENXIO);
        assert_eq!(FuseError::from(io::Error::other("x")).to_errno(), libc::EIO);
    }
}

//! Error category mapping for mount adapters.
//!
//! Every adapter reports failures through a host-specific code:
//! - **FUSE**: POSIX errno values (e.g. `ENOENT`)
//! - **Dokan**: NTSTATUS values, or negated Win32 error codes on the legacy
//!   Dokan ABI
//!
//! [`ErrorCategory`] sits in between so that each core error maps to one
//! defined code per host, never to an unmapped value.

use fvde_core::{EngineError, FvdeError};
use std::io;

/// Win32 error codes used by the legacy Dokan ABI.
pub mod win32 {
    pub const ERROR_FILE_NOT_FOUND: u32 = 2;
    pub const ERROR_ACCESS_DENIED: u32 = 5;
    pub const ERROR_WRITE_PROTECT: u32 = 19;
    pub const ERROR_READ_FAULT: u32 = 30;
    pub const ERROR_GEN_FAILURE: u32 = 31;
    pub const ERROR_NOT_SUPPORTED: u32 = 50;
    pub const ERROR_INVALID_PARAMETER: u32 = 87;
    pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
    pub const ERROR_BAD_ARGUMENTS: u32 = 160;
    pub const ERROR_DIRECTORY: u32 = 267;
}

/// NTSTATUS values used by the current Dokan ABI.
#[allow(clippy::cast_possible_wrap)]
pub mod ntstatus {
    pub const STATUS_SUCCESS: i32 = 0;
    pub const STATUS_UNSUCCESSFUL: i32 = 0xC000_0001_u32 as i32;
    pub const STATUS_INVALID_PARAMETER: i32 = 0xC000_000D_u32 as i32;
    pub const STATUS_ACCESS_DENIED: i32 = 0xC000_0022_u32 as i32;
    pub const STATUS_BUFFER_TOO_SMALL: i32 = 0xC000_0023_u32 as i32;
    pub const STATUS_OBJECT_NAME_NOT_FOUND: i32 = 0xC000_0034_u32 as i32;
    pub const STATUS_MEDIA_WRITE_PROTECTED: i32 = 0xC000_00A2_u32 as i32;
    pub const STATUS_FILE_IS_A_DIRECTORY: i32 = 0xC000_00BA_u32 as i32;
    pub const STATUS_NOT_SUPPORTED: i32 = 0xC000_00BB_u32 as i32;
    pub const STATUS_NOT_A_DIRECTORY: i32 = 0xC000_0103_u32 as i32;
    pub const STATUS_IO_DEVICE_ERROR: i32 = 0xC000_0185_u32 as i32;
}

/// Semantic category of a failed host callback.
///
/// # Example
///
/// ```
/// use fvde_mount::ErrorCategory;
/// use fvde_core::FvdeError;
///
/// let category = ErrorCategory::from(&FvdeError::NotFound("/fvde9".into()));
/// assert_eq!(category, ErrorCategory::NotFound);
/// # #[cfg(unix)]
/// assert_eq!(category.to_errno(), libc::ENOENT);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Path names neither the root nor an existing volume
    NotFound,
    /// Malformed argument or contract violation
    InvalidArgument,
    /// Access the mount never grants (e.g. opening for write)
    PermissionDenied,
    /// Write to the read-only volume
    ReadOnly,
    /// Expected a file but got the root directory
    IsDirectory,
    /// Expected a directory but got a volume file
    NotDirectory,
    /// Output buffer cannot hold the result
    BufferTooSmall,
    /// Source, engine or locked-volume read failure
    IoError,
    /// Operation not supported
    NotSupported,
}

impl ErrorCategory {
    /// POSIX errno value, as FUSE expects it (positive).
    #[cfg(unix)]
    #[inline]
    pub fn to_errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::InvalidArgument => libc::EINVAL,
            Self::PermissionDenied => libc::EACCES,
            Self::ReadOnly => libc::EROFS,
            Self::IsDirectory => libc::EISDIR,
            Self::NotDirectory => libc::ENOTDIR,
            Self::BufferTooSmall => libc::ERANGE,
            Self::IoError => libc::EIO,
            Self::NotSupported => libc::ENOTSUP,
        }
    }

    /// NTSTATUS value for the current Dokan ABI.
    pub fn to_ntstatus(self) -> i32 {
        use ntstatus::*;
        match self {
            Self::NotFound => STATUS_OBJECT_NAME_NOT_FOUND,
            Self::InvalidArgument => STATUS_INVALID_PARAMETER,
            Self::PermissionDenied => STATUS_ACCESS_DENIED,
            Self::ReadOnly => STATUS_MEDIA_WRITE_PROTECTED,
            Self::IsDirectory => STATUS_FILE_IS_A_DIRECTORY,
            Self::NotDirectory => STATUS_NOT_A_DIRECTORY,
            Self::BufferTooSmall => STATUS_BUFFER_TOO_SMALL,
            Self::IoError => STATUS_IO_DEVICE_ERROR,
            Self::NotSupported => STATUS_NOT_SUPPORTED,
        }
    }

    /// Win32 error code for the legacy Dokan ABI (positive).
    pub fn to_win32_error(self) -> u32 {
        use win32::*;
        match self {
            Self::NotFound => ERROR_FILE_NOT_FOUND,
            Self::InvalidArgument => ERROR_BAD_ARGUMENTS,
            Self::PermissionDenied | Self::IsDirectory => ERROR_ACCESS_DENIED,
            Self::ReadOnly => ERROR_WRITE_PROTECT,
            Self::NotDirectory => ERROR_DIRECTORY,
            Self::BufferTooSmall => ERROR_INSUFFICIENT_BUFFER,
            Self::IoError => ERROR_READ_FAULT,
            Self::NotSupported => ERROR_NOT_SUPPORTED,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::InvalidArgument => "InvalidArgument",
            Self::PermissionDenied => "PermissionDenied",
            Self::ReadOnly => "ReadOnly",
            Self::IsDirectory => "IsDirectory",
            Self::NotDirectory => "NotDirectory",
            Self::BufferTooSmall => "BufferTooSmall",
            Self::IoError => "IoError",
            Self::NotSupported => "NotSupported",
        }
    }
}

/// Status-code convention of the Dokan library the adapter is linked
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DokanAbi {
    /// Dokan 0.x: callbacks return `0` or a negated Win32 error code.
    Legacy,
    /// Dokany 1.x and later: callbacks return an NTSTATUS.
    #[default]
    NtStatus,
}

impl DokanAbi {
    /// Callback return value for `category` under this convention.
    #[allow(clippy::cast_possible_wrap)]
    pub fn status(self, category: ErrorCategory) -> i32 {
        match self {
            Self::Legacy => -(category.to_win32_error() as i32),
            Self::NtStatus => category.to_ntstatus(),
        }
    }

    /// Callback return value for success.
    pub fn success(self) -> i32 {
        0
    }
}

impl From<&FvdeError> for ErrorCategory {
    fn from(e: &FvdeError) -> Self {
        match e {
            FvdeError::NotFound(_) => Self::NotFound,
            FvdeError::IsDirectory => Self::IsDirectory,
            FvdeError::NotDirectory => Self::NotDirectory,
            FvdeError::BufferTooSmall { .. } => Self::BufferTooSmall,
            FvdeError::PrefixAlreadySet
            | FvdeError::EmptyPrefix
            | FvdeError::PrefixNotSet
            | FvdeError::InvalidVolumeIndex(_)
            | FvdeError::AlreadyOpen
            | FvdeError::NoSources
            | FvdeError::InvalidArgument(_) => Self::InvalidArgument,
            FvdeError::Io { source, .. } => io_error_category(source),
            FvdeError::Engine(engine) => Self::from(engine),
        }
    }
}

impl From<FvdeError> for ErrorCategory {
    fn from(e: FvdeError) -> Self {
        Self::from(&e)
    }
}

impl From<&EngineError> for ErrorCategory {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::NoSuchVolume(_) => Self::NotFound,
            EngineError::Io(source) => io_error_category(source),
            // Locked volumes stay listed; reading them is an I/O failure.
            EngineError::Open(_)
            | EngineError::Locked
            | EngineError::Unlock(_)
            | EngineError::Read { .. }
            | EngineError::Aborted
            | EngineError::Unavailable(_) => Self::IoError,
        }
    }
}

impl From<&io::Error> for ErrorCategory {
    fn from(e: &io::Error) -> Self {
        io_error_category(e)
    }
}

impl From<io::Error> for ErrorCategory {
    fn from(e: io::Error) -> Self {
        io_error_category(&e)
    }
}

fn io_error_category(e: &io::Error) -> ErrorCategory {
    match e.kind() {
        io::ErrorKind::NotFound => ErrorCategory::NotFound,
        io::ErrorKind::PermissionDenied => ErrorCategory::PermissionDenied,
        io::ErrorKind::InvalidInput => ErrorCategory::InvalidArgument,
        io::ErrorKind::ReadOnlyFilesystem => ErrorCategory::ReadOnly,
        io::ErrorKind::Unsupported => ErrorCategory::NotSupported,
        _ => ErrorCategory::IoError,
    }
}

/// Converts an I/O error to a POSIX errno value.
///
/// Uses the raw OS error if there is one, otherwise `EIO`.
#[cfg(unix)]
#[inline]
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

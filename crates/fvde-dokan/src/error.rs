//! Errors of the Dokan adapter and their status codes.

use fvde_core::FvdeError;
use fvde_mount::{DokanAbi, ErrorCategory};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DokanError {
    #[error(transparent)]
    Fvde(#[from] FvdeError),

    /// Negative offset in a read request.
    #[error("Invalid offset: {0}")]
    InvalidOffset(i64),

    /// Open asked for write access or for a disposition that creates or
    /// truncates.
    #[error("Volumes are mounted read-only")]
    WriteAccess,

    #[error("Invalid mount point: {0:?}")]
    InvalidMountPoint(String),
}

impl DokanError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DokanError::Fvde(e) => ErrorCategory::from(e),
            DokanError::InvalidOffset(_) | DokanError::InvalidMountPoint(_) => {
                ErrorCategory::InvalidArgument
            }
            DokanError::WriteAccess => ErrorCategory::PermissionDenied,
        }
    }

    /// Callback return value under `abi`.
    pub fn status(&self, abi: DokanAbi) -> i32 {
        abi.status(self.category())
    }

    /// NTSTATUS, the convention the `dokan` crate binds.
    pub fn to_ntstatus(&self) -> i32 {
        self.status(DokanAbi::NtStatus)
    }
}

pub type DokanResult<T> = Result<T, DokanError>;

/// What a callback hands back to Dokan for a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    NtStatus(i32),
    /// Win32 error code, converted by the Dokan library itself.
    Win32(u32),
}

impl DokanError {
    /// Failure code for a handler that speaks `abi`.
    pub fn host_status(&self, abi: DokanAbi) -> HostStatus {
        match abi {
            DokanAbi::NtStatus => HostStatus::NtStatus(self.to_ntstatus()),
            DokanAbi::Legacy => HostStatus::Win32(self.category().to_win32_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fvde_core::EngineError;
    use fvde_mount::{ntstatus, win32};

    #[test]
    fn test_ntstatus_mapping() {
        let not_found = DokanError::from(FvdeError::NotFound("\\fvde9".into()));
        assert_eq!(not_found.to_ntstatus(), ntstatus::STATUS_OBJECT_NAME_NOT_FOUND);
        assert_eq!(DokanError::WriteAccess.to_ntstatus(), ntstatus::STATUS_ACCESS_DENIED);
        assert_eq!(
            DokanError::InvalidOffset(-5).to_ntstatus(),
            ntstatus::STATUS_INVALID_PARAMETER
        );
        let locked = DokanError::from(FvdeError::Engine(EngineError::Locked));
        assert_eq!(locked.to_ntstatus(), ntstatus::STATUS_IO_DEVICE_ERROR);
    }

    #[test]
    fn test_host_status_follows_abi() {
        let locked = DokanError::from(FvdeError::Engine(EngineError::Locked));
        assert_eq!(
            locked.host_status(DokanAbi::NtStatus),
            HostStatus::NtStatus(ntstatus::STATUS_IO_DEVICE_ERROR)
        );
        assert_eq!(
            DokanError::WriteAccess.host_status(DokanAbi::Legacy),
            HostStatus::Win32(win32::ERROR_ACCESS_DENIED)
        );
        assert_eq!(
            DokanError::from(FvdeError::NotFound("\\fvde4".into())).host_status(DokanAbi::Legacy),
            HostStatus::Win32(win32::ERROR_FILE_NOT_FOUND)
        );
    }

    #[test]
    #[allow(clippy::cast_possible_wrap)]
    fn test_legacy_abi_is_negated_win32() {
        assert_eq!(
            DokanError::WriteAccess.status(DokanAbi::Legacy),
            -(win32::ERROR_ACCESS_DENIED as i32)
        );
        let not_dir = DokanError::from(FvdeError::NotDirectory);
        assert_eq!(not_dir.status(DokanAbi::Legacy), -(win32::ERROR_DIRECTORY as i32));
    }
}

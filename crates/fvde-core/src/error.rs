//! Error types for the FVDE mount core.
//!
//! Two layers of errors exist:
//!
//! - [`EngineError`] is reported by a volume engine (the component that
//!   understands the FileVault on-disk format and does the decryption).
//! - [`FvdeError`] is reported by the synthetic file-system model, file
//!   entries and the mount session. Engine errors are wrapped unchanged.
//!
//! Host adapters never see raw codes from here; they classify errors through
//! `fvde_mount::ErrorCategory`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by a volume engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The container could not be opened or is not an FVDE volume group.
    #[error("Failed to open volume: {0}")]
    Open(String),

    /// The logical volume is still locked; its contents cannot be read.
    #[error("Logical volume is locked")]
    Locked,

    /// The unlock attempt failed for a reason other than wrong credentials
    /// (corrupt metadata, unreadable key bag, ...).
    #[error("Unlock failed: {0}")]
    Unlock(String),

    /// A read from the logical volume failed.
    #[error("Read failed at offset {offset}: {reason}")]
    Read { offset: u64, reason: String },

    /// The engine stopped because an abort was signalled.
    #[error("Operation aborted")]
    Aborted,

    /// The requested logical volume does not exist in the group.
    #[error("No logical volume at index {0}")]
    NoSuchVolume(usize),

    /// No engine was compiled into this build.
    #[error("Volume engine unavailable: {0}")]
    Unavailable(String),

    /// Underlying I/O error from a source file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors reported by the file-system model, file entries and mount session.
#[derive(Debug, Error)]
pub enum FvdeError {
    /// The path prefix may only be set once per model.
    #[error("Path prefix is already set")]
    PrefixAlreadySet,

    /// An empty path prefix was supplied.
    #[error("Path prefix must not be empty")]
    EmptyPrefix,

    /// A lookup was attempted before a path prefix was set.
    #[error("Path prefix is not set")]
    PrefixNotSet,

    /// The path does not name the root or any volume.
    #[error("No such entry: {0}")]
    NotFound(String),

    /// A volume index outside `0..number_of_volumes` was used.
    #[error("Invalid volume index: {0}")]
    InvalidVolumeIndex(usize),

    /// A caller-supplied buffer cannot hold the generated path.
    #[error("Buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall { required: usize, available: usize },

    /// A file operation was attempted on the root directory.
    #[error("Entry is a directory")]
    IsDirectory,

    /// A directory operation was attempted on a volume file.
    #[error("Entry is not a directory")]
    NotDirectory,

    /// The session has already been opened (or is currently opening).
    #[error("Mount session is already open")]
    AlreadyOpen,

    /// `open()` was called without any source files.
    #[error("No source files given")]
    NoSources,

    /// An argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A source file could not be opened or inspected.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Error from the volume engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl FvdeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for model, entry and session operations.
pub type FvdeResult<T> = Result<T, FvdeError>;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_is_transparent() {
        let err = FvdeError::from(EngineError::Locked);
        assert_eq!(err.to_string(), "Logical volume is locked");
        assert!(matches!(err, FvdeError::Engine(EngineError::Locked)));
    }

    #[test]
    fn test_io_error_includes_path() {
        let err = FvdeError::io(
            "/dev/disk2s2",
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/dev/disk2s2"), "message was: {msg}");
        assert!(msg.contains("missing"), "message was: {msg}");
    }

    #[test]
    fn test_buffer_too_small_message() {
        let err = FvdeError::BufferTooSmall {
            required: 9,
            available: 8,
        };
        assert_eq!(
            err.to_string(),
            "Buffer too small: 9 bytes required, 8 available"
        );
    }
}

//! Host framework seam.
//!
//! A FileVault volume group is exposed through whatever host file-system
//! framework the build target has: FUSE on Linux and macOS, Dokan on
//! Windows. Both sit behind the same two traits:
//!
//! - [`MountBackend`]: a mounting mechanism that takes an opened
//!   [`MountSession`] and serves it at a mount point
//! - [`MountHandle`]: the running mount; dropping it unmounts and closes
//!   the session
//!
//! # Example
//!
//! ```ignore
//! let backend = first_available_backend(&compiled_backends)?;
//! let handle = backend.mount(session, Path::new("/mnt/fvde"), &MountOptions::default())?;
//! // /mnt/fvde/fvde1 is the first logical volume until:
//! handle.unmount()?;
//! ```

use crate::stats::MountStats;
use fvde_core::MountSession;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MountError {
    /// The session cannot be served, usually because it is not open.
    #[error("cannot serve session: {0}")]
    FilesystemCreation(String),

    #[error("host mount failed: {0}")]
    Mount(#[from] std::io::Error),

    #[error("Mount point does not exist: {0}")]
    MountPointNotFound(PathBuf),

    /// The host framework did not report the mount in time.
    #[error("mount not ready after {0:?}")]
    Timeout(std::time::Duration),

    #[error("no usable mount backend: {0}")]
    BackendUnavailable(String),

    #[error("unmount failed: {0}")]
    UnmountFailed(String),
}

/// Settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// File-system name reported to the host (`fsname` on FUSE, the
    /// file-system name on Dokan).
    pub fs_name: String,
    /// Volume label (Dokan) or subtype (FUSE).
    pub volume_label: String,
    /// Extended host options, passed through verbatim (`-X`).
    pub extended_options: Vec<String>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            fs_name: "fvde".to_string(),
            volume_label: "FVDE".to_string(),
            extended_options: Vec::new(),
        }
    }
}

impl MountOptions {
    #[must_use]
    pub fn with_fs_name(mut self, fs_name: impl Into<String>) -> Self {
        self.fs_name = fs_name.into();
        self
    }

    #[must_use]
    pub fn with_volume_label(mut self, label: impl Into<String>) -> Self {
        self.volume_label = label.into();
        self
    }

    /// Appends extended options. A single argument may carry several
    /// comma-separated options, as `mount -o` accepts them.
    #[must_use]
    pub fn with_extended_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extended_options.extend(
            options
                .into_iter()
                .flat_map(|option| {
                    option
                        .as_ref()
                        .split(',')
                        .map(str::trim)
                        .filter(|part| !part.is_empty())
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                }),
        );
        self
    }
}

/// A running mount. Dropping it unmounts and closes the session, so
/// calling [`MountHandle::unmount`] is optional.
pub trait MountHandle: Send {
    fn mountpoint(&self) -> &Path;

    /// Unmounts and waits for the host loop to finish. May block while
    /// volume files are still open.
    fn unmount(self: Box<Self>) -> Result<(), MountError>;

    /// Detaches the mount point even while files are open:
    ///
    /// - **macOS**: `diskutil unmount force`
    /// - **Linux**: `fusermount -u -z`
    /// - **Windows**: `DokanRemoveMountPoint`
    fn force_unmount(self: Box<Self>) -> Result<(), MountError>;

    /// Counters shared with the running file system.
    fn stats(&self) -> Option<Arc<MountStats>> {
        None
    }
}

/// Serves a [`MountSession`] through one host framework. The host loop
/// runs on threads the backend owns.
pub trait MountBackend: Send + Sync {
    /// Display name ("FUSE").
    fn name(&self) -> &'static str;

    /// Stable lowercase id ("fuse"), matching [`BackendType::id`].
    fn id(&self) -> &'static str;

    /// Whether the driver or kernel support is present.
    fn is_available(&self) -> bool;

    /// `None` when available.
    fn unavailable_reason(&self) -> Option<String>;

    fn backend_type(&self) -> BackendType;

    fn description(&self) -> &'static str;

    /// Serves `session` at `mountpoint`.
    ///
    /// The session must already be open. The backend owns it from here on
    /// and closes it when the returned handle is unmounted or dropped.
    ///
    /// Fails with [`MountError::FilesystemCreation`] for an unopened
    /// session and [`MountError::BackendUnavailable`] without a driver.
    fn mount(
        &self,
        session: MountSession,
        mountpoint: &Path,
        options: &MountOptions,
    ) -> Result<Box<dyn MountHandle>, MountError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// libfuse on Linux, macFUSE on macOS
    Fuse,
    /// Dokany on Windows
    Dokan,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(windows) { Self::Dokan } else { Self::Fuse }
    }
}

impl BackendType {
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendType::Fuse => "FUSE",
            BackendType::Dokan => "Dokan",
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            BackendType::Fuse => "fuse",
            BackendType::Dokan => "dokan",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BackendType::Fuse => "FUSE kernel interface (Linux, macFUSE on macOS)",
            BackendType::Dokan => "Dokan 2 user-mode file system driver (Windows)",
        }
    }

    pub fn all() -> &'static [BackendType] {
        &[BackendType::Fuse, BackendType::Dokan]
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Checks that `mountpoint` exists and is a directory.
///
/// Dokan accepts a drive letter such as `M:` that does not exist yet, so
/// callers on Windows skip this for drive letters.
pub fn check_mountpoint(mountpoint: &Path) -> Result<(), MountError> {
    if mountpoint.is_dir() {
        Ok(())
    } else {
        Err(MountError::MountPointNotFound(mountpoint.to_path_buf()))
    }
}

/// The backend of `backend_type`, if it is compiled in and available.
pub fn select_backend(
    backends: &[Box<dyn MountBackend>],
    backend_type: BackendType,
) -> Result<&dyn MountBackend, MountError> {
    let Some(backend) = backends.iter().find(|b| b.backend_type() == backend_type) else {
        return Err(MountError::BackendUnavailable(format!(
            "{backend_type} backend not compiled in"
        )));
    };
    match backend.unavailable_reason() {
        None => Ok(backend.as_ref()),
        Some(reason) => Err(MountError::BackendUnavailable(reason)),
    }
}

/// The first available backend, in list order. The error lists why each
/// one was skipped.
pub fn first_available_backend(
    backends: &[Box<dyn MountBackend>],
) -> Result<&dyn MountBackend, MountError> {
    if let Some(backend) = backends.iter().find(|b| b.is_available()) {
        return Ok(backend.as_ref());
    }
    let mut reasons = backends.iter().filter_map(|b| b.unavailable_reason()).peekable();
    let reason = if reasons.peek().is_none() {
        "no backend compiled in".to_string()
    } else {
        reasons.collect::<Vec<_>>().join("; ")
    };
    Err(MountError::BackendUnavailable(reason))
}

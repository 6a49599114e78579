//! Shared plumbing for FileVault volume mount backends.
//!
//! The FUSE and Dokan adapters translate host callbacks into calls on the
//! [`fvde_core`] model. What they have in common lives here.
//!
//! # Components
//!
//! - [`MountBackend`] / [`MountHandle`] - mount a [`fvde_core::MountSession`]
//!   through a host framework and control the running mount
//! - [`ErrorCategory`] - one classification of core errors, converted to
//!   errno, NTSTATUS or Win32 codes per host ([`DokanAbi`])
//! - [`HandleTable`] - owned entry handles keyed by the host's `fh` slot
//! - [`signal`] - graceful shutdown that also aborts engine work
//! - [`stats`] - operation counters and [`format_bytes`]
//!
//! # Example
//!
//! ```
//! use fvde_mount::{ErrorCategory, HandleTable, MountOptions};
//! use fvde_core::FvdeError;
//!
//! let options = MountOptions::default().with_extended_options(["allow_other"]);
//! assert_eq!(options.fs_name, "fvde");
//!
//! let handles: HandleTable<u64> = HandleTable::new();
//! let fh = handles.insert(7);
//! assert!(handles.contains(fh));
//!
//! let category = ErrorCategory::from(&FvdeError::IsDirectory);
//! assert_eq!(category, ErrorCategory::IsDirectory);
//! ```

mod backend;
mod error_category;
mod handle_table;
pub mod signal;
pub mod stats;

pub use backend::{
    check_mountpoint, first_available_backend, select_backend, BackendType, MountBackend,
    MountError, MountHandle, MountOptions,
};
#[cfg(unix)]
pub use error_category::io_error_to_errno;
pub use error_category::{ntstatus, win32, DokanAbi, ErrorCategory};
pub use handle_table::HandleTable;
pub use stats::{format_bytes, MountStats, MountStatsSnapshot};

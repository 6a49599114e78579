//! Dokan adapter for FileVault logical volumes.
//!
//! Serves the volumes of an opened [`fvde_core::MountSession`] as a
//! read-only drive on Windows:
//!
//! ```text
//! M:\
//! ├── FVDE1
//! └── FVDE2
//! ```
//!
//! The [`translate`] module holds every decision a callback makes (open
//! checks, file information, listings, volume information) and builds on
//! all targets. The `dokan` handler and [`DokanBackend`] are Windows-only.

pub mod error;
pub mod translate;

#[cfg(windows)]
mod backend;
#[cfg(windows)]
mod handler;

#[cfg(windows)]
pub use backend::{DokanBackend, DokanMountHandle};
pub use error::{DokanError, DokanResult, HostStatus};
#[cfg(windows)]
pub use handler::FvdeHandler;

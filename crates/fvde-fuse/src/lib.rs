//! FUSE adapter for FileVault logical volumes.
//!
//! Serves the volumes of an opened [`fvde_core::MountSession`] as a
//! read-only directory through [fuser]:
//!
//! ```text
//! /mnt/fvde/
//! ├── fvde1
//! └── fvde2
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use fvde_core::{engine, MountSession, SessionOptions};
//! use fvde_fuse::FuseBackend;
//! use fvde_mount::{MountBackend, MountOptions};
//! use std::path::Path;
//!
//! let mut session = MountSession::new(SessionOptions::default());
//! let engine = engine::default_engine()?;
//! session.open(engine.as_ref(), &["/dev/sdb2"])?;
//!
//! let handle = FuseBackend::new().mount(session, Path::new("/mnt/fvde"), &MountOptions::default())?;
//! handle.unmount()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![cfg(any(target_os = "linux", target_os = "macos"))]

pub mod attr;
pub mod backend;
pub mod config;
pub mod error;
pub mod filesystem;

pub use backend::{FuseBackend, FuseMountHandle};
pub use config::MountConfig;
pub use error::{FuseError, FuseResult};
pub use filesystem::FvdeFs;

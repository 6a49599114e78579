//! Core of the FileVault (FVDE) volume mount adapter.
//!
//! The mounted tree is a single read-only directory with one file per
//! logical volume of a FileVault volume group:
//!
//! ```text
//! /
//! ├── fvde1   (decrypted contents of logical volume 1)
//! └── fvde2
//! ```
//!
//! # Components
//!
//! - [`engine`] - the contract a FileVault engine implements (open the group,
//!   unlock volumes, read decrypted bytes), plus the optional libfvde engine
//! - [`FileSystemModel`] - prefix, mount timestamp and the volume list
//! - [`FileEntry`] - the transient node a host callback works on
//! - [`MountSession`] - opens sources, unlocks volumes (with interactive
//!   fallback) and owns every resource until `close()`
//! - [`IoPool`] - read-only ranged handles over the source files
//! - [`testing`] - in-memory engine and scripted input for tests
//!
//! Host adapters (FUSE, Dokan) live in their own crates and only reach the
//! model through an `Arc<FileSystemModel>`.
//!
//! # Example
//!
//! ```no_run
//! use fvde_core::{Credentials, MountSession, SessionOptions, engine};
//!
//! let options = SessionOptions::default()
//!     .credentials(Credentials::new().with_password("secret"))
//!     .unattended(true);
//! let mut session = MountSession::new(options);
//! let engine = engine::default_engine()?;
//! session.open(engine.as_ref(), &["/dev/disk2s2"])?;
//!
//! let file_system = session.file_system();
//! assert_eq!(file_system.path_from_index(0)?, "/fvde1");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod abort;
pub mod credentials;
pub mod engine;
pub mod entry;
pub mod error;
pub mod model;
pub mod path;
pub mod pool;
pub mod prompt;
pub mod session;
pub mod testing;
pub mod timestamp;

pub use abort::AbortHandle;
pub use credentials::{Credentials, KEY_SIZE};
pub use engine::{EngineOptions, LogicalVolume, UnlockOutcome, VolumeEngine, VolumeGroup};
pub use entry::{EntryHandle, EntryKind, FileEntry};
pub use error::{EngineError, EngineResult, FvdeError, FvdeResult};
pub use model::FileSystemModel;
pub use path::{PathPrefix, VolumeIndex};
pub use pool::IoPool;
pub use prompt::{SecureInputSource, TerminalInput, MAX_PASSWORD_LENGTH};
pub use session::{MountSession, SessionOptions, SessionState, VolumeSummary};
pub use timestamp::MountTimestamp;

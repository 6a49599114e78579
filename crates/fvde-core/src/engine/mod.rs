//! Volume engine contract.
//!
//! The engine understands the FileVault container format: it opens the
//! volume group found in a set of source files, applies credentials, and
//! serves decrypted reads of each logical volume. The mount layer only
//! talks to it through the traits below.
//!
//! Unlocking is tri-state: `Ok(UnlockOutcome::Unlocked)`,
//! `Ok(UnlockOutcome::Locked)` when the credentials did not fit, and `Err`
//! for hard failures that must abort the mount.

#[cfg(feature = "libfvde")]
pub mod libfvde;

use crate::error::{EngineError, EngineResult};
use crate::pool::IoPool;
use std::path::PathBuf;
use std::sync::Arc;

/// Result of an unlock attempt that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    Locked,
}

/// Options passed to [`VolumeEngine::open`].
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Decrypted copy of `EncryptedRoot.plist`, used by volumes that keep
    /// their key bag there instead of in the metadata blocks.
    pub encrypted_root_plist: Option<PathBuf>,
}

/// Factory for volume groups.
pub trait VolumeEngine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Opens the volume group contained in `pool`.
    fn open(&self, pool: Arc<IoPool>, options: &EngineOptions)
    -> EngineResult<Arc<dyn VolumeGroup>>;
}

/// An opened volume group (the umbrella volume plus its logical volumes).
pub trait VolumeGroup: Send + Sync {
    fn logical_volume_count(&self) -> EngineResult<usize>;

    /// Opens logical volume `index` (0-based). Each call returns a new handle.
    fn logical_volume(&self, index: usize) -> EngineResult<Box<dyn LogicalVolume>>;

    /// Asks in-flight and future engine operations to stop.
    ///
    /// Called from the signal path; must not block.
    fn signal_abort(&self);
}

/// One logical volume inside a group.
///
/// Credentials and `unlock` take `&mut self` and are only used while the
/// mount session is opening. Once the volume is handed to the file-system
/// model it is shared read-only across host callback threads.
pub trait LogicalVolume: Send + Sync {
    /// Volume UUID.
    fn identifier(&self) -> EngineResult<[u8; 16]>;

    /// Volume name as stored in the metadata, if any.
    fn name(&self) -> EngineResult<Option<String>>;

    /// Size of the decrypted volume in bytes.
    fn size(&self) -> EngineResult<u64>;

    fn is_locked(&self) -> EngineResult<bool>;

    /// Sets the raw volume master key.
    fn set_key(&mut self, key: &[u8]) -> EngineResult<()>;

    fn set_password(&mut self, password: &str) -> EngineResult<()>;

    fn set_recovery_password(&mut self, recovery_password: &str) -> EngineResult<()>;

    /// Tries the credentials set so far.
    fn unlock(&mut self) -> EngineResult<UnlockOutcome>;

    /// Reads decrypted bytes at `offset`. Returns the number of bytes read,
    /// 0 at or past the end of the volume. Fails with
    /// [`EngineError::Locked`] while the volume is locked.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> EngineResult<usize>;
}

/// Returns the engine compiled into this build.
pub fn default_engine() -> EngineResult<Box<dyn VolumeEngine>> {
    #[cfg(feature = "libfvde")]
    {
        Ok(Box::new(libfvde::LibfvdeEngine::new()))
    }
    #[cfg(not(feature = "libfvde"))]
    {
        Err(EngineError::Unavailable(
            "no FileVault engine compiled in. Rebuild with --features libfvde".to_string(),
        ))
    }
}

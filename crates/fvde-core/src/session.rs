//! Mount session: opens the sources, unlocks every logical volume and hands
//! the populated file-system model to a host adapter.
//!
//! # States
//!
//! ```text
//! Unopened ──open()──▶ Opening ──▶ Unlocked | PartiallyLocked ──close()──▶ Closed
//!     ▲                   │
//!     └──── hard error ───┘
//! ```
//!
//! # Unlock order
//!
//! For each logical volume the key, the password and the recovery password
//! are applied (whichever are present), then one unlock attempt is made.
//! A volume that stays locked is prompted for interactively unless the
//! session is unattended. Volumes that stay locked are still listed; reads
//! from them fail with an I/O error.

use crate::abort::AbortHandle;
use crate::credentials::Credentials;
use crate::engine::{EngineOptions, LogicalVolume, UnlockOutcome, VolumeEngine, VolumeGroup};
use crate::entry::FileEntry;
use crate::error::{EngineError, FvdeError, FvdeResult};
use crate::model::FileSystemModel;
use crate::path::PathPrefix;
use crate::pool::IoPool;
use crate::prompt::{SecureInputSource, TerminalInput};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Opening,
    /// Every logical volume is readable.
    Unlocked,
    /// At least one logical volume stayed locked.
    PartiallyLocked,
    Closed,
}

/// Settings of a mount session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub credentials: Credentials,
    /// Never prompt; locked volumes stay locked.
    pub unattended: bool,
    /// Byte offset of the volume within every source file.
    pub volume_offset: u64,
    pub path_prefix: PathPrefix,
    /// Decrypted `EncryptedRoot.plist`, if the volumes need it.
    pub encrypted_root_plist: Option<PathBuf>,
}

impl SessionOptions {
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn unattended(mut self, unattended: bool) -> Self {
        self.unattended = unattended;
        self
    }

    #[must_use]
    pub fn volume_offset(mut self, offset: u64) -> Self {
        self.volume_offset = offset;
        self
    }

    #[must_use]
    pub fn path_prefix(mut self, prefix: PathPrefix) -> Self {
        self.path_prefix = prefix;
        self
    }

    #[must_use]
    pub fn encrypted_root_plist(mut self, path: impl Into<PathBuf>) -> Self {
        self.encrypted_root_plist = Some(path.into());
        self
    }
}

/// What the session learned about one logical volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSummary {
    /// 0-based position.
    pub index: usize,
    /// Entry name in the mounted directory, e.g. `fvde1`.
    pub entry_name: String,
    /// `None` if the engine could not report it.
    pub size: Option<u64>,
    pub locked: bool,
}

pub struct MountSession {
    options: SessionOptions,
    state: SessionState,
    file_system: Arc<FileSystemModel>,
    volume_group: Option<Arc<dyn VolumeGroup>>,
    io_pool: Option<Arc<IoPool>>,
    abort: AbortHandle,
    input: Box<dyn SecureInputSource>,
}

impl MountSession {
    /// Creates a session that prompts on the terminal.
    pub fn new(options: SessionOptions) -> Self {
        Self::with_input(options, Box::new(TerminalInput))
    }

    pub fn with_input(options: SessionOptions, input: Box<dyn SecureInputSource>) -> Self {
        let file_system = Arc::new(FileSystemModel::with_prefix(options.path_prefix.clone()));
        Self {
            options,
            state: SessionState::Unopened,
            file_system,
            volume_group: None,
            io_pool: None,
            abort: AbortHandle::new(),
            input,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// The model the host adapter serves. Populated by [`open`](Self::open).
    pub fn file_system(&self) -> Arc<FileSystemModel> {
        Arc::clone(&self.file_system)
    }

    /// Handle for the signal path.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn signal_abort(&self) {
        self.abort.signal();
    }

    /// Opens `sources` through `engine` and unlocks every logical volume.
    ///
    /// On a hard error everything acquired so far is released and the
    /// session returns to [`SessionState::Unopened`].
    pub fn open<P: AsRef<Path>>(
        &mut self,
        engine: &dyn VolumeEngine,
        sources: &[P],
    ) -> FvdeResult<SessionState> {
        if self.state != SessionState::Unopened {
            return Err(FvdeError::AlreadyOpen);
        }
        if sources.is_empty() {
            return Err(FvdeError::NoSources);
        }

        tracing::info!(
            engine = engine.name(),
            sources = sources.len(),
            offset = self.options.volume_offset,
            unattended = self.options.unattended,
            "Opening volume group"
        );
        self.state = SessionState::Opening;

        match self.open_volumes(engine, sources) {
            Ok(state) => {
                self.state = state;
                tracing::info!(
                    volumes = self.file_system.number_of_volumes(),
                    ?state,
                    "Volume group opened"
                );
                Ok(state)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open volume group");
                self.release();
                self.state = SessionState::Unopened;
                Err(e)
            }
        }
    }

    fn open_volumes<P: AsRef<Path>>(
        &mut self,
        engine: &dyn VolumeEngine,
        sources: &[P],
    ) -> FvdeResult<SessionState> {
        let pool = Arc::new(IoPool::open(sources, self.options.volume_offset)?);
        self.io_pool = Some(Arc::clone(&pool));

        let engine_options = EngineOptions {
            encrypted_root_plist: self.options.encrypted_root_plist.clone(),
        };
        let group = engine.open(pool, &engine_options)?;
        self.abort.attach(&group);
        self.volume_group = Some(Arc::clone(&group));

        let count = group.logical_volume_count()?;
        tracing::debug!(count, "Enumerated logical volumes");

        let mut locked = 0usize;
        for index in 0..count {
            if self.abort.is_aborted() {
                return Err(EngineError::Aborted.into());
            }
            let mut volume = group.logical_volume(index)?;
            if self.unlock_volume(index, volume.as_mut())? == UnlockOutcome::Locked {
                locked += 1;
            }
            self.file_system.append_volume(volume);
        }

        Ok(if locked == 0 {
            SessionState::Unlocked
        } else {
            SessionState::PartiallyLocked
        })
    }

    fn unlock_volume(
        &mut self,
        index: usize,
        volume: &mut dyn LogicalVolume,
    ) -> FvdeResult<UnlockOutcome> {
        let number = index + 1;
        let credentials = &self.options.credentials;
        if let Some(key) = credentials.key() {
            volume.set_key(key)?;
        }
        if let Some(password) = credentials.password() {
            volume.set_password(password)?;
        }
        if let Some(recovery_password) = credentials.recovery_password() {
            volume.set_recovery_password(recovery_password)?;
        }

        if volume.unlock()? == UnlockOutcome::Unlocked {
            tracing::debug!(volume = number, "Logical volume unlocked");
            return Ok(UnlockOutcome::Unlocked);
        }

        if self.options.unattended {
            tracing::warn!(volume = number, "Logical volume is locked, leaving it locked");
            return Ok(UnlockOutcome::Locked);
        }

        self.input.notify(&format!(
            "Logical volume {number} is locked and a password is needed to unlock it."
        ));
        let password = match self.input.read_secret("Password: ") {
            Ok(password) if !password.is_empty() => password,
            Ok(_) => {
                self.input.notify("No password entered.");
                return Ok(UnlockOutcome::Locked);
            }
            Err(e) => {
                tracing::warn!(volume = number, error = %e, "Unable to read password");
                self.input.notify("Unable to retrieve password.");
                return Ok(UnlockOutcome::Locked);
            }
        };

        volume.set_password(&password)?;
        let outcome = volume.unlock()?;
        match outcome {
            UnlockOutcome::Unlocked => {
                tracing::debug!(volume = number, "Logical volume unlocked after prompt");
            }
            UnlockOutcome::Locked => {
                tracing::warn!(volume = number, "Logical volume is still locked");
                self.input
                    .notify(&format!("Unable to unlock logical volume {number}."));
            }
        }
        Ok(outcome)
    }

    /// Per-volume size and lock state, in index order.
    pub fn volumes(&self) -> Vec<VolumeSummary> {
        let root = FileEntry::root(&self.file_system);
        (0..self.file_system.number_of_volumes())
            .filter_map(|index| root.sub_entry(index).ok())
            .map(|entry| VolumeSummary {
                index: entry.volume_index().volume().unwrap_or_default(),
                entry_name: entry.name().unwrap_or_default().to_owned(),
                size: entry.size().ok(),
                locked: entry.is_locked().unwrap_or(true),
            })
            .collect()
    }

    /// Releases every volume (highest index first, index 0 included), then
    /// the volume group, then the source pool. Calling it again does
    /// nothing.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.release();
        self.state = SessionState::Closed;
        tracing::info!("Mount session closed");
    }

    fn release(&mut self) {
        let released = self.file_system.release_volumes();
        self.abort.detach();
        drop(self.volume_group.take());
        drop(self.io_pool.take());
        tracing::debug!(volumes = released, "Released mount resources");
    }
}

impl Drop for MountSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for MountSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountSession")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("file_system", &self.file_system)
            .field("abort", &self.abort)
            .finish_non_exhaustive()
    }
}

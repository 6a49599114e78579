//! Dokan implementation of [`MountBackend`].

use crate::handler::FvdeHandler;
use crate::translate::{is_drive_letter, normalize_mount_point};
use dokan::{FileSystemMounter, MountFlags};
use fvde_core::{MountSession, SessionState};
use fvde_mount::{
    check_mountpoint, BackendType, DokanAbi, MountBackend, MountError, MountHandle, MountOptions,
    MountStats,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Once};
use std::thread::JoinHandle;
use std::time::Duration;
use widestring::U16CString;

static DOKAN_INIT: Once = Once::new();

/// How long to wait for Dokan to report the mount.
const MOUNT_TIMEOUT: Duration = Duration::from_secs(20);

/// Timeout for the mount thread to finish after an unmount request.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

fn init_once() {
    DOKAN_INIT.call_once(dokan::init);
}

/// Handle to a running Dokan mount.
///
/// The mount thread owns the handler and blocks until the file system is
/// unmounted; dropping the handle unmounts and waits for it.
pub struct DokanMountHandle {
    mount_point: U16CString,
    mountpoint: PathBuf,
    thread: Option<JoinHandle<()>>,
    stats: Arc<MountStats>,
}

impl DokanMountHandle {
    fn request_unmount(&self) -> Result<(), MountError> {
        if dokan::unmount(self.mount_point.as_ucstr()) {
            Ok(())
        } else {
            Err(MountError::UnmountFailed(format!(
                "Dokan refused to unmount {}",
                self.mountpoint.display()
            )))
        }
    }

    fn join_with_timeout(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = thread.join();
            let _ = tx.send(());
        });
        rx.recv_timeout(JOIN_TIMEOUT).is_ok()
    }
}

impl MountHandle for DokanMountHandle {
    fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    fn stats(&self) -> Option<Arc<MountStats>> {
        Some(Arc::clone(&self.stats))
    }

    fn unmount(mut self: Box<Self>) -> Result<(), MountError> {
        tracing::info!(mountpoint = %self.mountpoint.display(), "Unmounting Dokan filesystem");
        self.request_unmount()?;
        if !self.join_with_timeout() {
            return Err(MountError::UnmountFailed(format!(
                "mount thread for {} did not finish within {JOIN_TIMEOUT:?}",
                self.mountpoint.display()
            )));
        }
        tracing::info!(mountpoint = %self.mountpoint.display(), "Dokan unmount successful");
        Ok(())
    }

    fn force_unmount(mut self: Box<Self>) -> Result<(), MountError> {
        tracing::info!(mountpoint = %self.mountpoint.display(), "Force unmounting Dokan filesystem");
        // DokanRemoveMountPoint does not wait for open handles.
        let _ = self.request_unmount();
        if !self.join_with_timeout() {
            tracing::warn!(mountpoint = %self.mountpoint.display(), "Mount thread still running after forced unmount");
        }
        Ok(())
    }
}

impl Drop for DokanMountHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            tracing::debug!(mountpoint = %self.mountpoint.display(), "Unmounting Dokan filesystem on drop");
            let _ = self.request_unmount();
            if !self.join_with_timeout() {
                tracing::warn!(
                    mountpoint = %self.mountpoint.display(),
                    "Mount thread did not finish after {:?}",
                    JOIN_TIMEOUT
                );
            }
        }
    }
}

/// Dokan mounting backend (Dokany 2.x driver).
#[derive(Debug, Clone, Copy, Default)]
pub struct DokanBackend {
    /// Status-code convention of the handler. The dokan 0.3 binding speaks
    /// NTSTATUS; `Legacy` reports Win32 codes through Dokan's conversion.
    pub abi: DokanAbi,
}

impl DokanBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_abi(mut self, abi: DokanAbi) -> Self {
        self.abi = abi;
        self
    }

    fn driver_path() -> PathBuf {
        let root = std::env::var_os("SystemRoot").unwrap_or_else(|| "C:\\Windows".into());
        PathBuf::from(root).join("System32\\drivers\\dokan2.sys")
    }
}

impl MountBackend for DokanBackend {
    fn name(&self) -> &'static str {
        "Dokan"
    }

    fn id(&self) -> &'static str {
        "dokan"
    }

    fn is_available(&self) -> bool {
        Self::driver_path().exists()
    }

    fn unavailable_reason(&self) -> Option<String> {
        if self.is_available() {
            return None;
        }
        Some(
            "Dokan driver is not installed. Download it from https://github.com/dokan-dev/dokany/releases"
                .to_string(),
        )
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Dokan
    }

    fn description(&self) -> &'static str {
        "Uses the Dokany user-mode file system driver (Windows)"
    }

    fn mount(
        &self,
        session: MountSession,
        mountpoint: &Path,
        options: &MountOptions,
    ) -> Result<Box<dyn MountHandle>, MountError> {
        tracing::info!(
            mountpoint = %mountpoint.display(),
            volumes = session.file_system().number_of_volumes(),
            "Starting Dokan mount"
        );

        match session.state() {
            SessionState::Unlocked | SessionState::PartiallyLocked => {}
            state => {
                return Err(MountError::FilesystemCreation(format!(
                    "mount session is not open ({state:?})"
                )));
            }
        }
        if !self.is_available() {
            return Err(MountError::BackendUnavailable(
                self.unavailable_reason().unwrap_or_default(),
            ));
        }

        let normalized = normalize_mount_point(&mountpoint.to_string_lossy())
            .map_err(|e| MountError::FilesystemCreation(e.to_string()))?;
        if !is_drive_letter(&normalized) {
            check_mountpoint(Path::new(&normalized))?;
        }
        let mount_point = U16CString::from_str(&normalized)
            .map_err(|_| MountError::MountPointNotFound(mountpoint.to_path_buf()))?;

        let stats = Arc::new(MountStats::new());
        let handler = FvdeHandler::new(session, options.clone(), Arc::clone(&stats), self.abi);
        let (tx, rx) = mpsc::sync_channel::<Result<(), String>>(1);
        let thread_mount_point = mount_point.clone();

        let thread = std::thread::Builder::new()
            .name("fvde-dokan".to_string())
            .spawn(move || {
                init_once();
                let mount_options = dokan::MountOptions {
                    single_thread: false,
                    flags: MountFlags::WRITE_PROTECT,
                    unc_name: None,
                    timeout: Duration::from_secs(30),
                    allocation_unit_size: 4096,
                    sector_size: 512,
                    volume_security_descriptor: None,
                };
                let mut mounter =
                    FileSystemMounter::new(&handler, thread_mount_point.as_ucstr(), &mount_options);
                match mounter.mount() {
                    Ok(file_system) => {
                        let _ = tx.send(Ok(()));
                        // Blocks until the volume is unmounted.
                        drop(file_system);
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.to_string()));
                    }
                }
            })?;

        match rx.recv_timeout(MOUNT_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(MountError::Mount(std::io::Error::other(e)));
            }
            Err(_) => {
                let _ = dokan::unmount(mount_point.as_ucstr());
                return Err(MountError::Timeout(MOUNT_TIMEOUT));
            }
        }

        tracing::info!(mountpoint = %normalized, "Dokan mount successful");

        Ok(Box::new(DokanMountHandle {
            mount_point,
            mountpoint: PathBuf::from(normalized),
            thread: Some(thread),
            stats,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dokan_backend_id() {
        let backend = DokanBackend::new();
        assert_eq!(backend.id(), "dokan");
        assert_eq!(backend.name(), "Dokan");
        assert_eq!(backend.backend_type(), BackendType::Dokan);
        assert_eq!(backend.is_available(), backend.unavailable_reason().is_none());
    }

    #[test]
    fn status_convention_defaults_to_ntstatus() {
        assert_eq!(DokanBackend::new().abi, DokanAbi::NtStatus);
        assert_eq!(DokanBackend::new().with_abi(DokanAbi::Legacy).abi, DokanAbi::Legacy);
    }
}

//! FUSE implementation of [`MountBackend`].

use crate::{FvdeFs, MountConfig};
use fuser::{BackgroundSession, MountOption};
use fvde_core::{MountSession, SessionState};
use fvde_mount::{
    check_mountpoint, BackendType, MountBackend, MountError, MountHandle, MountOptions, MountStats,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long dropping a handle waits for the session to wind down before
/// detaching the mount point.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands tried in order to detach a mount point whose session is stuck.
#[cfg(target_os = "linux")]
const DETACH_COMMANDS: &[(&str, &[&str])] = &[("fusermount", &["-u", "-z"]), ("umount", &["-l"])];
#[cfg(target_os = "macos")]
const DETACH_COMMANDS: &[(&str, &[&str])] = &[("diskutil", &["unmount", "force"]), ("umount", &["-f"])];

/// Lazily detaches `mountpoint`. Returns whether one of the commands succeeded.
fn detach(mountpoint: &Path) -> bool {
    DETACH_COMMANDS.iter().any(|(program, args)| {
        let status = std::process::Command::new(program)
            .args(*args)
            .arg(mountpoint)
            .output()
            .map(|output| output.status.success());
        tracing::debug!(program, ?status, mountpoint = %mountpoint.display(), "detach attempt");
        matches!(status, Ok(true))
    })
}

/// Joins `session` on a helper thread. `false` means it did not finish in
/// `timeout`; the helper thread is then left behind.
fn join_within(session: BackgroundSession, timeout: Duration) -> bool {
    let (done_tx, done_rx) = mpsc::channel();
    std::thread::spawn(move || {
        session.join();
        let _ = done_tx.send(());
    });
    done_rx.recv_timeout(timeout).is_ok()
}

/// Handle to a running FUSE mount.
///
/// Wraps the fuser `BackgroundSession`. Dropping it unmounts, which in turn
/// drops the file system and closes the mount session.
pub struct FuseMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
    stats: Arc<MountStats>,
}

impl MountHandle for FuseMountHandle {
    fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    fn stats(&self) -> Option<Arc<MountStats>> {
        Some(Arc::clone(&self.stats))
    }

    fn unmount(mut self: Box<Self>) -> Result<(), MountError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        // Blocks while files are open.
        session.join();
        tracing::info!(mountpoint = %self.mountpoint.display(), "volumes unmounted");
        Ok(())
    }

    fn force_unmount(mut self: Box<Self>) -> Result<(), MountError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        if !detach(&self.mountpoint) {
            tracing::warn!(mountpoint = %self.mountpoint.display(), "could not detach mount point");
        }
        if !join_within(session, JOIN_TIMEOUT) {
            return Err(MountError::Timeout(JOIN_TIMEOUT));
        }
        tracing::info!(mountpoint = %self.mountpoint.display(), "volumes force unmounted");
        Ok(())
    }
}

impl Drop for FuseMountHandle {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if join_within(session, JOIN_TIMEOUT) {
            tracing::debug!(mountpoint = %self.mountpoint.display(), "unmounted on drop");
        } else {
            tracing::warn!(
                mountpoint = %self.mountpoint.display(),
                timeout = ?JOIN_TIMEOUT,
                "session still busy, detaching mount point"
            );
            detach(&self.mountpoint);
        }
    }
}

#[cfg(target_os = "linux")]
const FUSE_DEVICE: &str = "/dev/fuse";
#[cfg(target_os = "linux")]
const FUSE_HINT: &str = "Load the fuse kernel module.";
#[cfg(target_os = "macos")]
const FUSE_DEVICE: &str = "/Library/Filesystems/macfuse.fs";
#[cfg(target_os = "macos")]
const FUSE_HINT: &str = "Install macFUSE.";

/// FUSE mounting backend: libfuse on Linux, macFUSE on macOS.
#[derive(Debug, Clone)]
pub struct FuseBackend {
    pub config: MountConfig,
    /// Polling interval while waiting for the mount
    pub poll_interval: Duration,
}

impl Default for FuseBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FuseBackend {
    pub fn new() -> Self {
        Self::with_config(MountConfig::default())
    }

    pub fn with_config(config: MountConfig) -> Self {
        Self {
            config,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Host mount options for `options`.
    ///
    /// `allow_other` and `allow_root` map to their typed options; anything
    /// else in the extended options is passed through verbatim.
    pub fn mount_options(&self, options: &MountOptions) -> Vec<MountOption> {
        let mut mount_options = vec![
            MountOption::FSName(options.fs_name.clone()),
            MountOption::Subtype(options.fs_name.clone()),
            MountOption::RO,
            MountOption::DefaultPermissions,
        ];
        let mut allow_other = self.config.allow_other;
        for option in &options.extended_options {
            match option.as_str() {
                "allow_other" => allow_other = true,
                "allow_root" => mount_options.push(MountOption::AllowRoot),
                "ro" => {}
                other => mount_options.push(MountOption::CUSTOM(other.to_string())),
            }
        }
        if allow_other {
            mount_options.push(MountOption::AllowOther);
            // fusermount refuses auto_unmount without allow_other or allow_root.
            mount_options.push(MountOption::AutoUnmount);
        }

        #[cfg(target_os = "macos")]
        mount_options.push(MountOption::CUSTOM(format!("volname={}", options.volume_label)));

        mount_options
    }

    /// Polls until the mount point's device differs from its parent's.
    fn wait_for_mount(&self, mountpoint: &Path) -> Result<(), MountError> {
        use std::os::unix::fs::MetadataExt;

        let deadline = Instant::now() + self.config.mount_timeout;
        let parent = mountpoint.parent().unwrap_or(Path::new("/"));

        while Instant::now() < deadline {
            if let (Ok(path_meta), Ok(parent_meta)) =
                (std::fs::metadata(mountpoint), std::fs::metadata(parent))
                && path_meta.dev() != parent_meta.dev()
            {
                tracing::debug!(dev = path_meta.dev(), "mount point is live");
                return Ok(());
            }
            std::thread::sleep(self.poll_interval);
        }

        Err(MountError::Timeout(self.config.mount_timeout))
    }

    /// Runs `spawn_mount2` on its own thread so a mount syscall that blocks
    /// (e.g. a stale mount at the mount point) cannot hang the caller.
    fn spawn_mount_with_timeout(
        &self,
        fs: FvdeFs,
        mountpoint: &Path,
        options: &[MountOption],
    ) -> Result<BackgroundSession, MountError> {
        let mountpoint = mountpoint.to_path_buf();
        let options = options.to_vec();
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            let result = fuser::spawn_mount2(fs, &mountpoint, &options);
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.config.mount_timeout) {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(MountError::Mount(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                Err(MountError::Timeout(self.config.mount_timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(MountError::Mount(std::io::Error::other("fuse mount thread panicked")))
            }
        }
    }
}

impl MountBackend for FuseBackend {
    fn name(&self) -> &'static str {
        "FUSE"
    }

    fn id(&self) -> &'static str {
        "fuse"
    }

    fn is_available(&self) -> bool {
        Path::new(FUSE_DEVICE).exists()
    }

    fn unavailable_reason(&self) -> Option<String> {
        (!self.is_available()).then(|| format!("{FUSE_DEVICE} not found. {FUSE_HINT}"))
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Fuse
    }

    fn description(&self) -> &'static str {
        "Read-only volume files through the FUSE kernel interface"
    }

    fn mount(
        &self,
        session: MountSession,
        mountpoint: &Path,
        options: &MountOptions,
    ) -> Result<Box<dyn MountHandle>, MountError> {
        let volumes = session.file_system().number_of_volumes();

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
        check_mountpoint(mountpoint)?;

        let mount_options = self.mount_options(options);
        let fs = FvdeFs::new(session, self.config.clone());
        let stats = fs.stats();

        let session = self.spawn_mount_with_timeout(fs, mountpoint, &mount_options)?;
        self.wait_for_mount(mountpoint)?;

        tracing::info!(mountpoint = %mountpoint.display(), volumes, "volumes mounted");

        Ok(Box::new(FuseMountHandle {
            session: Some(session),
            mountpoint: mountpoint.to_path_buf(),
            stats,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_backend_id() {
        let backend = FuseBackend::new();
        assert_eq!(backend.id(), "fuse");
        assert_eq!(backend.name(), "FUSE");
        assert_eq!(backend.backend_type(), BackendType::Fuse);
    }

    #[test]
    fn fuse_backend_availability_check() {
        let backend = FuseBackend::new();
        assert_eq!(backend.is_available(), backend.unavailable_reason().is_none());
    }

    #[test]
    fn mount_options_are_read_only() {
        let backend = FuseBackend::new();
        let options = backend.mount_options(&MountOptions::default());
        assert!(options.contains(&MountOption::RO));
        assert!(options.contains(&MountOption::FSName("fvde".to_string())));
        assert!(!options.contains(&MountOption::AllowOther));
    }

    #[test]
    fn extended_options_map_to_mount_options() {
        let backend = FuseBackend::new();
        let options = MountOptions::default().with_extended_options(["allow_other,ro", "max_read=4096"]);
        let mount_options = backend.mount_options(&options);
        assert!(mount_options.contains(&MountOption::AllowOther));
        assert!(mount_options.contains(&MountOption::AutoUnmount));
        assert!(mount_options.contains(&MountOption::CUSTOM("max_read=4096".to_string())));
        assert_eq!(mount_options.iter().filter(|o| **o == MountOption::RO).count(), 1);
    }

    #[test]
    fn allow_other_from_config() {
        let backend = FuseBackend::with_config(MountConfig::default().allow_other(true));
        let mount_options = backend.mount_options(&MountOptions::default());
        assert!(mount_options.contains(&MountOption::AllowOther));
    }

    #[test]
    fn unopened_session_is_rejected() {
        let backend = FuseBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let session = MountSession::new(fvde_core::SessionOptions::default());
        let err = backend
            .mount(session, dir.path(), &MountOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, MountError::FilesystemCreation(_)));
    }
}

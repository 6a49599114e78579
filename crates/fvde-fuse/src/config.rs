//! Mount configuration for the FUSE adapter.

use std::time::Duration;

/// Attribute TTL. Volume sizes and timestamps never change while mounted.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(60);

/// How long to wait for the kernel to report the mount.
pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live the kernel may cache attributes and entries for.
    pub attr_ttl: Duration,

    /// Owner reported for every entry. Default: the mounting user.
    pub uid: u32,

    /// Group reported for every entry. Default: the mounting user's group.
    pub gid: u32,

    /// Let other users access the mount (`allow_other`).
    pub allow_other: bool,

    /// Deadline for the mount to become visible.
    pub mount_timeout: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            uid,
            gid,
            allow_other: false,
            mount_timeout: DEFAULT_MOUNT_TIMEOUT,
        }
    }
}

impl MountConfig {
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the owner reported for every entry.
    #[must_use]
    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    #[must_use]
    pub fn allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }

    #[must_use]
    pub fn mount_timeout(mut self, timeout: Duration) -> Self {
        self.mount_timeout = timeout;
        self
    }
}

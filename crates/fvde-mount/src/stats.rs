//! Statistics for a mounted volume group.
//!
//! Both adapters record into a shared [`MountStats`]; the CLI prints a
//! summary when the mount ends.
//!
//! ```
//! use fvde_mount::stats::{format_bytes, MountStats};
//!
//! let stats = MountStats::new();
//! stats.record_open();
//! stats.record_read(4096);
//! stats.record_release();
//!
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.reads, 1);
//! assert_eq!(format_bytes(snapshot.bytes_read), "4.00 KB");
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free operation counters.
#[derive(Debug)]
pub struct MountStats {
    /// Files and directories opened.
    pub opens: AtomicU64,
    /// Handles currently open.
    pub open_handles: AtomicU64,
    /// Successful read callbacks.
    pub reads: AtomicU64,
    /// Bytes returned by read callbacks.
    pub bytes_read: AtomicU64,
    /// Directory listings served.
    pub listings: AtomicU64,
    /// Callbacks answered with an error code.
    pub errors: AtomicU64,
    started: Instant,
}

impl Default for MountStats {
    fn default() -> Self {
        Self {
            opens: AtomicU64::new(0),
            open_handles: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            listings: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl MountStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
        self.open_handles.fetch_add(1, Ordering::Relaxed);
    }

    /// Never underflows, even if the host releases a handle it never
    /// opened through us.
    #[inline]
    pub fn record_release(&self) {
        let _ = self
            .open_handles
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    #[inline]
    pub fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_listing(&self) {
        self.listings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> MountStatsSnapshot {
        MountStatsSnapshot {
            opens: self.opens.load(Ordering::Relaxed),
            open_handles: self.open_handles.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            listings: self.listings.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime: self.uptime(),
        }
    }
}

/// Point-in-time copy of [`MountStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountStatsSnapshot {
    pub opens: u64,
    pub open_handles: u64,
    pub reads: u64,
    pub bytes_read: u64,
    pub listings: u64,
    pub errors: u64,
    pub uptime: Duration,
}

impl fmt::Display for MountStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} opens, {} reads ({}), {} listings, {} errors in {}s",
            self.opens,
            self.reads,
            format_bytes(self.bytes_read),
            self.listings,
            self.errors,
            self.uptime.as_secs()
        )
    }
}

/// Format bytes in human-readable form.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(250 * 1024 * 1024 * 1024), "250.00 GB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024 * 1024), "2.00 TB");
    }

    #[test]
    fn test_open_release_balance() {
        let stats = MountStats::new();
        stats.record_open();
        stats.record_open();
        stats.record_release();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.opens, 2);
        assert_eq!(snapshot.open_handles, 1);
    }

    #[test]
    fn test_release_never_underflows() {
        let stats = MountStats::new();
        stats.record_release();
        assert_eq!(stats.snapshot().open_handles, 0);
    }

    #[test]
    fn test_snapshot_display() {
        let stats = MountStats::new();
        stats.record_read(2048);
        stats.record_read(2048);
        stats.record_error();
        let line = stats.snapshot().to_string();
        assert!(line.starts_with("0 opens, 2 reads (4.00 KB), 0 listings, 1 errors"), "{line}");
    }
}

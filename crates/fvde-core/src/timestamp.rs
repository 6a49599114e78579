//! The single timestamp reported for every synthetic entry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// FILETIME value of the Unix epoch (100ns ticks since 1601-01-01).
pub const UNIX_EPOCH_FILETIME: u64 = 116_444_736_000_000_000;

const FILETIME_TICKS_PER_SECOND: u64 = 10_000_000;

/// Snapshot of the moment the file system was created.
///
/// Reported as the creation, access, modification and change time of the
/// root and of every volume file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MountTimestamp(SystemTime);

impl MountTimestamp {
    pub fn now() -> Self {
        Self(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        Self(time)
    }

    pub fn as_system_time(self) -> SystemTime {
        self.0
    }

    /// Signed nanoseconds since the Unix epoch (POSIX view).
    pub fn as_posix_nanos(self) -> i64 {
        match self.0.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
            Err(before) => i64::try_from(before.duration().as_nanos())
                .map_or(i64::MIN, |nanos| -nanos),
        }
    }

    /// 100ns ticks since 1601-01-01 (Windows FILETIME view).
    ///
    /// Times before 1601 clamp to zero.
    pub fn as_filetime(self) -> u64 {
        match self.0.duration_since(UNIX_EPOCH) {
            Ok(after) => UNIX_EPOCH_FILETIME.saturating_add(duration_to_ticks(after)),
            Err(before) => UNIX_EPOCH_FILETIME.saturating_sub(duration_to_ticks(before.duration())),
        }
    }

    /// Inverse of [`as_filetime`](Self::as_filetime).
    pub fn from_filetime(filetime: u64) -> Self {
        let time = if filetime >= UNIX_EPOCH_FILETIME {
            UNIX_EPOCH + ticks_to_duration(filetime - UNIX_EPOCH_FILETIME)
        } else {
            UNIX_EPOCH - ticks_to_duration(UNIX_EPOCH_FILETIME - filetime)
        };
        Self(time)
    }
}

impl From<MountTimestamp> for SystemTime {
    fn from(timestamp: MountTimestamp) -> Self {
        timestamp.0
    }
}

fn duration_to_ticks(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_mul(FILETIME_TICKS_PER_SECOND)
        .saturating_add(u64::from(duration.subsec_nanos() / 100))
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::new(
        ticks / FILETIME_TICKS_PER_SECOND,
        u32::try_from((ticks % FILETIME_TICKS_PER_SECOND) * 100).unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch_views() {
        let ts = MountTimestamp::from_system_time(UNIX_EPOCH);
        assert_eq!(ts.as_posix_nanos(), 0);
        assert_eq!(ts.as_filetime(), UNIX_EPOCH_FILETIME);
    }

    #[test]
    fn test_filetime_resolution_is_100ns() {
        let ts = MountTimestamp::from_system_time(UNIX_EPOCH + Duration::new(1, 250));
        assert_eq!(ts.as_posix_nanos(), 1_000_000_250);
        assert_eq!(ts.as_filetime(), UNIX_EPOCH_FILETIME + 10_000_002);
    }

    #[test]
    fn test_before_epoch_is_negative() {
        let ts = MountTimestamp::from_system_time(UNIX_EPOCH - Duration::from_secs(2));
        assert_eq!(ts.as_posix_nanos(), -2_000_000_000);
        assert_eq!(ts.as_filetime(), UNIX_EPOCH_FILETIME - 20_000_000);
    }

    #[test]
    fn test_filetime_back_conversion() {
        // 2009-02-13 23:31:30 UTC
        let ts = MountTimestamp::from_system_time(UNIX_EPOCH + Duration::from_secs(1_234_567_890));
        assert_eq!(MountTimestamp::from_filetime(ts.as_filetime()), ts);
    }
}

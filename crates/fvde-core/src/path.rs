//! Synthetic namespace: path prefix and volume index resolution.
//!
//! The mounted tree is a single directory holding one file per logical
//! volume. Volume `n` (0-based) lives at `prefix + (n + 1)`, so with the
//! POSIX prefix `/fvde` the volumes are `/fvde1`, `/fvde2`, ... and the root
//! is `/`. The 1-based number is at most [`MAX_VOLUME_DIGITS`] decimal
//! digits long.

use crate::error::{FvdeError, FvdeResult};
use std::fmt;

/// Maximum number of decimal digits after the prefix (up to 999 volumes).
pub const MAX_VOLUME_DIGITS: usize = 3;

/// Prefix used by POSIX hosts (FUSE).
pub const POSIX_PREFIX: &str = "/fvde";

/// Prefix used by Windows hosts (Dokan).
pub const WINDOWS_PREFIX: &str = "\\FVDE";

/// Position of an entry in the synthetic tree.
///
/// The raw form used by host APIs is a signed integer where `-1` is the
/// root directory; [`VolumeIndex::from_raw`] and [`VolumeIndex::as_raw`]
/// convert between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeIndex {
    /// The root directory.
    Root,
    /// A logical volume, 0-based.
    Volume(usize),
}

impl VolumeIndex {
    /// Raw value of the root entry.
    pub const ROOT_RAW: i64 = -1;

    /// Converts a raw signed index. Values below `-1` are rejected.
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            Self::ROOT_RAW => Some(Self::Root),
            n => usize::try_from(n).ok().map(Self::Volume),
        }
    }

    /// Returns the raw signed index (`-1` for the root).
    pub fn as_raw(self) -> i64 {
        match self {
            Self::Root => Self::ROOT_RAW,
            Self::Volume(n) => i64::try_from(n).unwrap_or(i64::MAX),
        }
    }

    pub fn is_root(self) -> bool {
        matches!(self, Self::Root)
    }

    /// Returns the volume position, or `None` for the root.
    pub fn volume(self) -> Option<usize> {
        match self {
            Self::Root => None,
            Self::Volume(n) => Some(n),
        }
    }
}

impl fmt::Display for VolumeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => f.write_str("root"),
            Self::Volume(n) => write!(f, "volume {}", n + 1),
        }
    }
}

/// Fixed prefix of the synthetic namespace.
///
/// The first character of the prefix doubles as the path separator. The
/// Windows-style prefix compares case-insensitively (ASCII), everything else
/// compares exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefix {
    value: String,
    separator: char,
    case_sensitive: bool,
}

impl PathPrefix {
    /// Creates a prefix. Fails when `value` is empty.
    pub fn new(value: &str, case_sensitive: bool) -> FvdeResult<Self> {
        let separator = value.chars().next().ok_or(FvdeError::EmptyPrefix)?;
        Ok(Self {
            value: value.to_owned(),
            separator,
            case_sensitive,
        })
    }

    /// `/fvde`, case-sensitive.
    pub fn posix() -> Self {
        Self {
            value: POSIX_PREFIX.to_owned(),
            separator: '/',
            case_sensitive: true,
        }
    }

    /// `\FVDE`, case-insensitive.
    pub fn windows() -> Self {
        Self {
            value: WINDOWS_PREFIX.to_owned(),
            separator: '\\',
            case_sensitive: false,
        }
    }

    /// The prefix used by the host adapter of the current target.
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::windows()
        } else {
            Self::posix()
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Length of the prefix in bytes including a terminating NUL.
    pub fn size(&self) -> usize {
        self.value.len() + 1
    }

    /// Canonical path of the volume at `index`, e.g. `/fvde1` for index 0.
    pub fn path_for(&self, index: usize) -> String {
        format!("{}{}", self.value, index + 1)
    }

    /// Directory entry name of the volume at `index`: the canonical path
    /// without its leading separator, e.g. `fvde1`.
    pub fn entry_name(&self, index: usize) -> String {
        let stem = self
            .value
            .strip_prefix(self.separator)
            .unwrap_or(&self.value);
        format!("{stem}{}", index + 1)
    }

    /// Bytes needed to hold the path of `index` plus a terminating NUL.
    pub fn required_size(&self, index: usize) -> usize {
        self.size() + decimal_digits(index + 1)
    }

    /// Resolves `path` without regard to how many volumes exist.
    ///
    /// Returns `None` when the path names neither the root nor a
    /// syntactically valid volume path.
    pub fn resolve(&self, path: &str) -> Option<VolumeIndex> {
        let mut chars = path.chars();
        if chars.next() == Some(self.separator) && chars.next().is_none() {
            return Some(VolumeIndex::Root);
        }

        let prefix_len = self.value.len();
        if path.len() <= prefix_len || path.len() > prefix_len + MAX_VOLUME_DIGITS {
            return None;
        }

        let (head, digits) = path.split_at_checked(prefix_len)?;
        let head_matches = if self.case_sensitive {
            head == self.value
        } else {
            head.eq_ignore_ascii_case(&self.value)
        };
        if !head_matches || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let number: usize = digits.parse().ok()?;
        number.checked_sub(1).map(VolumeIndex::Volume)
    }
}

impl Default for PathPrefix {
    fn default() -> Self {
        Self::native()
    }
}

impl fmt::Display for PathPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

//! Testing utilities for the mount session and host adapters.
//!
//! - **Engine**: an in-memory volume engine whose volumes can be locked
//!   behind a key, password or recovery password, fail to unlock, and log
//!   every call in order
//! - **Input**: a scripted [`SecureInputSource`](crate::SecureInputSource)
//!   that replays canned passwords and records notices
//! - **Generators**: deterministic volume contents
//!
//! # Usage
//!
//! ```
//! use fvde_core::testing::{MemoryEngine, MemoryVolume, patterned_volume};
//!
//! let engine = MemoryEngine::new()
//!     .with_volume(MemoryVolume::unlocked(patterned_volume(4096)))
//!     .with_volume(MemoryVolume::with_password(patterned_volume(8192), "secret"));
//! assert_eq!(engine.volume_count(), 2);
//! ```

mod engine;
mod input;

pub use engine::{EventLog, MemoryEngine, MemoryVolume};
pub use input::ScriptedInput;

/// Volume contents where byte `i` is `i % 251`, so misplaced reads show up
/// as wrong values rather than repeated zeros.
pub fn patterned_volume(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterned_volume() {
        let data = patterned_volume(600);
        assert_eq!(data.len(), 600);
        assert_eq!(data[0], 0);
        assert_eq!(data[250], 250);
        assert_eq!(data[251], 0);
        assert_eq!(data[599], (599 % 251) as u8);
    }
}

//! Thread-safe table of open file handles.
//!
//! FUSE hands the adapter a 64-bit `fh` slot per open file or directory.
//! The adapter stores an owned [`EntryHandle`](fvde_core::EntryHandle) here
//! and puts the generated id into `fh`; `release` removes it again.

use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrent map from auto-generated `u64` ids to handle values.
///
/// Ids start at 1; 0 is never handed out so it can mean "no handle".
///
/// ```
/// use fvde_mount::HandleTable;
///
/// let table: HandleTable<&str> = HandleTable::new();
/// let fh = table.insert("fvde1");
/// assert_eq!(*table.get(fh).unwrap(), "fvde1");
/// assert_eq!(table.remove(fh), Some("fvde1"));
/// assert!(table.is_empty());
/// ```
#[derive(Debug)]
pub struct HandleTable<V> {
    handles: DashMap<u64, V>,
    next_id: AtomicU64,
}

impl<V> HandleTable<V> {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores `value` under a fresh id and returns the id.
    ///
    /// After the counter wraps, ids still in use are skipped.
    pub fn insert(&self, value: V) -> u64 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id) {
                entry.insert(value);
                return id;
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<Ref<'_, u64, V>> {
        self.handles.get(&id)
    }

    /// Removes the handle and returns it.
    pub fn remove(&self, id: u64) -> Option<V> {
        self.handles.remove(&id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.handles.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Drops every handle, e.g. when the file system is destroyed.
    pub fn clear(&self) {
        self.handles.clear();
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

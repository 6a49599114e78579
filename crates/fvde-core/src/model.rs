//! The synthetic file-system model shared by all host adapters.
//!
//! The model owns the path prefix, the mount timestamp and the ordered list
//! of logical volume handles. Volumes are appended only while the mount
//! session is opening; after that the list is read by any number of host
//! callback threads at once. The list sits behind a read-write lock so that
//! releasing the volumes at unmount cannot race with a late callback.

use crate::engine::LogicalVolume;
use crate::error::{FvdeError, FvdeResult};
use crate::path::{PathPrefix, VolumeIndex};
use crate::timestamp::MountTimestamp;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::fmt;

/// Borrowed access to one volume. Holds a read lock on the volume list.
pub type VolumeRef<'a> = MappedRwLockReadGuard<'a, dyn LogicalVolume>;

pub struct FileSystemModel {
    path_prefix: Option<PathPrefix>,
    mounted_timestamp: MountTimestamp,
    volumes: RwLock<Vec<Box<dyn LogicalVolume>>>,
}

impl FileSystemModel {
    /// Creates an empty model without a prefix. The mount timestamp is
    /// captured here and never changes.
    pub fn new() -> Self {
        Self {
            path_prefix: None,
            mounted_timestamp: MountTimestamp::now(),
            volumes: RwLock::new(Vec::new()),
        }
    }

    pub fn with_prefix(prefix: PathPrefix) -> Self {
        let mut model = Self::new();
        model.path_prefix = Some(prefix);
        model
    }

    /// Sets the path prefix. Only the first call succeeds.
    pub fn set_path_prefix(&mut self, prefix: PathPrefix) -> FvdeResult<()> {
        if self.path_prefix.is_some() {
            return Err(FvdeError::PrefixAlreadySet);
        }
        tracing::debug!(prefix = %prefix, "Path prefix set");
        self.path_prefix = Some(prefix);
        Ok(())
    }

    pub fn path_prefix(&self) -> FvdeResult<&PathPrefix> {
        self.path_prefix.as_ref().ok_or(FvdeError::PrefixNotSet)
    }

    pub fn mounted_timestamp(&self) -> MountTimestamp {
        self.mounted_timestamp
    }

    pub fn number_of_volumes(&self) -> usize {
        self.volumes.read().len()
    }

    /// Appends a volume and returns its index.
    pub fn append_volume(&self, volume: Box<dyn LogicalVolume>) -> usize {
        let mut volumes = self.volumes.write();
        volumes.push(volume);
        volumes.len() - 1
    }

    /// Borrows the volume at `index`.
    ///
    /// Host adapters only pass indices that came out of
    /// [`resolve_path`](Self::resolve_path), so a miss here means the
    /// volumes were released underneath a callback.
    pub fn get_volume(&self, index: usize) -> FvdeResult<VolumeRef<'_>> {
        RwLockReadGuard::try_map(self.volumes.read(), |volumes| {
            volumes.get(index).map(AsRef::as_ref)
        })
        .map_err(|_| FvdeError::InvalidVolumeIndex(index))
    }

    /// Maps a host path to the root or to a volume that exists.
    pub fn resolve_path(&self, path: &str) -> FvdeResult<VolumeIndex> {
        let prefix = self.path_prefix()?;
        let resolved = match prefix.resolve(path) {
            Some(VolumeIndex::Volume(index)) if index >= self.number_of_volumes() => None,
            other => other,
        };
        tracing::trace!(path, ?resolved, "Resolved path");
        resolved.ok_or_else(|| FvdeError::NotFound(path.to_owned()))
    }

    /// Canonical path of volume `index`.
    pub fn path_from_index(&self, index: usize) -> FvdeResult<String> {
        Ok(self.path_prefix()?.path_for(index))
    }

    /// Writes the NUL-terminated path of volume `index` into `buf`.
    ///
    /// Returns the path length without the terminator. Fails with
    /// [`FvdeError::BufferTooSmall`] when `buf` cannot hold path and NUL.
    pub fn write_path_from_index(&self, index: usize, buf: &mut [u8]) -> FvdeResult<usize> {
        let prefix = self.path_prefix()?;
        let required = prefix.required_size(index);
        if buf.len() < required {
            return Err(FvdeError::BufferTooSmall {
                required,
                available: buf.len(),
            });
        }
        let path = prefix.path_for(index);
        buf[..path.len()].copy_from_slice(path.as_bytes());
        buf[path.len()] = 0;
        Ok(path.len())
    }

    /// Sum of the sizes of all volumes whose size is known.
    pub fn total_size(&self) -> u64 {
        self.volumes
            .read()
            .iter()
            .filter_map(|volume| volume.size().ok())
            .sum()
    }

    /// Drops every volume handle, highest index first. Returns how many
    /// were released; a second call releases nothing.
    pub fn release_volumes(&self) -> usize {
        let mut volumes = self.volumes.write();
        let count = volumes.len();
        while let Some(volume) = volumes.pop() {
            drop(volume);
            tracing::trace!(index = volumes.len(), "Released logical volume");
        }
        count
    }
}

impl Default for FileSystemModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FileSystemModel {
    fn drop(&mut self) {
        self.release_volumes();
    }
}

impl fmt::Debug for FileSystemModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemModel")
            .field("path_prefix", &self.path_prefix)
            .field("mounted_timestamp", &self.mounted_timestamp)
            .field("volumes", &self.number_of_volumes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryVolume;

    fn model_with(count: usize) -> FileSystemModel {
        let model = FileSystemModel::with_prefix(PathPrefix::posix());
        for i in 0..count {
            model.append_volume(MemoryVolume::unlocked(vec![0u8; 512 * (i + 1)]).into_boxed());
        }
        model
    }

    #[test]
    fn test_prefix_set_once() {
        let mut model = FileSystemModel::new();
        assert!(matches!(model.path_prefix(), Err(FvdeError::PrefixNotSet)));
        model.set_path_prefix(PathPrefix::posix()).unwrap();
        assert!(matches!(
            model.set_path_prefix(PathPrefix::windows()),
            Err(FvdeError::PrefixAlreadySet)
        ));
        assert_eq!(model.path_prefix().unwrap().as_str(), "/fvde");
    }

    #[test]
    fn test_with_prefix_is_ready_to_resolve() {
        let model = FileSystemModel::with_prefix(PathPrefix::windows());
        assert_eq!(model.path_prefix().unwrap().as_str(), "\\FVDE");
        assert_eq!(model.resolve_path("\\").unwrap(), VolumeIndex::Root);
        assert_eq!(model.number_of_volumes(), 0);
        assert!(model.mounted_timestamp().as_posix_nanos() > 0);
    }

    #[test]
    fn test_resolve_requires_prefix() {
        let model = FileSystemModel::new();
        assert!(matches!(model.resolve_path("/"), Err(FvdeError::PrefixNotSet)));
    }

    #[test]
    fn test_resolve_checks_volume_count() {
        let model = model_with(2);
        assert_eq!(model.resolve_path("/").unwrap(), VolumeIndex::Root);
        assert_eq!(model.resolve_path("/fvde2").unwrap(), VolumeIndex::Volume(1));
        assert!(matches!(
            model.resolve_path("/fvde3"),
            Err(FvdeError::NotFound(path)) if path == "/fvde3"
        ));
    }

    #[test]
    fn test_write_path_boundary() {
        let model = model_with(0);
        let mut exact = [0xffu8; 9];
        assert_eq!(model.write_path_from_index(99, &mut exact).unwrap(), 8);
        assert_eq!(&exact, b"/fvde100\0");

        let mut short = [0u8; 8];
        assert!(matches!(
            model.write_path_from_index(99, &mut short),
            Err(FvdeError::BufferTooSmall {
                required: 9,
                available: 8
            })
        ));

        let mut roomy = [0u8; 16];
        assert_eq!(model.write_path_from_index(99, &mut roomy).unwrap(), 8);
    }

    #[test]
    fn test_get_volume_out_of_range() {
        let model = model_with(1);
        assert_eq!(model.get_volume(0).unwrap().size().unwrap(), 512);
        assert!(matches!(
            model.get_volume(1),
            Err(FvdeError::InvalidVolumeIndex(1))
        ));
    }

    #[test]
    fn test_total_size() {
        let model = model_with(3);
        assert_eq!(model.total_size(), 512 + 1024 + 1536);
    }

    #[test]
    fn test_release_volumes_is_idempotent() {
        let model = model_with(3);
        assert_eq!(model.release_volumes(), 3);
        assert_eq!(model.number_of_volumes(), 0);
        assert_eq!(model.release_volumes(), 0);
    }

    // Readers see either the whole volume or InvalidVolumeIndex while the
    // list is released under them.
    #[test]
    fn test_release_races_concurrent_reads() {
        use crate::entry::FileEntry;
        use crate::testing::patterned_volume;
        use std::sync::mpsc;
        use std::sync::{Arc, Barrier};
        use std::time::Duration;

        const READERS: usize = 4;
        let expected = patterned_volume(4096);
        let model = Arc::new(FileSystemModel::with_prefix(PathPrefix::posix()));
        model.append_volume(MemoryVolume::unlocked(expected.clone()).into_boxed());
        model.append_volume(MemoryVolume::unlocked(expected.clone()).into_boxed());

        let (done_tx, done_rx) = mpsc::channel();
        let start = Arc::new(Barrier::new(READERS + 1));
        let mut readers = Vec::new();
        for reader in 0..READERS {
            let model = Arc::clone(&model);
            let start = Arc::clone(&start);
            let expected = expected.clone();
            let done_tx = done_tx.clone();
            readers.push(std::thread::spawn(move || {
                let entry = FileEntry::new(&model, VolumeIndex::Volume(reader % 2), None);
                let mut buf = vec![0u8; 4096];
                let mut full_reads = 0usize;
                start.wait();
                loop {
                    match entry.read_at(&mut buf, 0) {
                        Ok(n) => {
                            assert_eq!(n, 4096);
                            assert_eq!(buf, expected);
                            full_reads += 1;
                        }
                        Err(FvdeError::InvalidVolumeIndex(_)) => break,
                        Err(e) => panic!("unexpected read error: {e}"),
                    }
                }
                let _ = done_tx.send(full_reads);
            }));
        }
        drop(done_tx);

        start.wait();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(model.release_volumes(), 2);

        for _ in 0..READERS {
            done_rx
                .recv_timeout(Duration::from_secs(10))
                .expect("reader did not finish after release");
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(model.number_of_volumes(), 0);
    }
}

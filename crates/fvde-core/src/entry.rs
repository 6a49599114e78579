//! Transient file entries.
//!
//! A [`FileEntry`] is built for the duration of one host callback and
//! borrows the model. Between an open and the matching release the host
//! keeps an owned [`EntryHandle`] instead and rebuilds the entry from it on
//! every call.

use crate::error::{FvdeError, FvdeResult};
use crate::model::FileSystemModel;
use crate::path::VolumeIndex;
use crate::timestamp::MountTimestamp;

/// File type bits of a directory.
pub const S_IFDIR: u32 = 0o040_000;
/// File type bits of a regular file.
pub const S_IFREG: u32 = 0o100_000;

/// `r-xr-xr-x`
pub const DIRECTORY_PERMISSIONS: u16 = 0o555;
/// `r--r--r--`
pub const FILE_PERMISSIONS: u16 = 0o444;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// A node of the synthetic tree: the root directory or one volume file.
#[derive(Debug, Clone)]
pub struct FileEntry<'a> {
    name: Option<String>,
    file_system: &'a FileSystemModel,
    volume_index: VolumeIndex,
}

impl<'a> FileEntry<'a> {
    pub fn new(file_system: &'a FileSystemModel, volume_index: VolumeIndex, name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_owned),
            file_system,
            volume_index,
        }
    }

    pub fn root(file_system: &'a FileSystemModel) -> Self {
        Self::new(file_system, VolumeIndex::Root, None)
    }

    /// Resolves `path` and builds the entry it names.
    pub fn from_path(file_system: &'a FileSystemModel, path: &str) -> FvdeResult<Self> {
        let volume_index = file_system.resolve_path(path)?;
        let name = match volume_index {
            VolumeIndex::Root => None,
            VolumeIndex::Volume(index) => Some(file_system.path_prefix()?.entry_name(index)),
        };
        Ok(Self {
            name,
            file_system,
            volume_index,
        })
    }

    pub fn volume_index(&self) -> VolumeIndex {
        self.volume_index
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn file_system(&self) -> &'a FileSystemModel {
        self.file_system
    }

    /// The root for a volume entry, `None` for the root itself.
    pub fn parent(&self) -> Option<FileEntry<'a>> {
        match self.volume_index {
            VolumeIndex::Root => None,
            VolumeIndex::Volume(_) => Some(Self::root(self.file_system)),
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self.volume_index {
            VolumeIndex::Root => EntryKind::Directory,
            VolumeIndex::Volume(_) => EntryKind::File,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    pub fn permissions(&self) -> u16 {
        match self.kind() {
            EntryKind::Directory => DIRECTORY_PERMISSIONS,
            EntryKind::File => FILE_PERMISSIONS,
        }
    }

    /// POSIX mode: file type bits plus permissions.
    pub fn file_mode(&self) -> u32 {
        let type_bits = match self.kind() {
            EntryKind::Directory => S_IFDIR,
            EntryKind::File => S_IFREG,
        };
        type_bits | u32::from(self.permissions())
    }

    /// 0 for the root, the decrypted volume size otherwise.
    pub fn size(&self) -> FvdeResult<u64> {
        match self.volume_index {
            VolumeIndex::Root => Ok(0),
            VolumeIndex::Volume(index) => Ok(self.file_system.get_volume(index)?.size()?),
        }
    }

    /// Whether the underlying volume is still locked. The root never is.
    pub fn is_locked(&self) -> FvdeResult<bool> {
        match self.volume_index {
            VolumeIndex::Root => Ok(false),
            VolumeIndex::Volume(index) => Ok(self.file_system.get_volume(index)?.is_locked()?),
        }
    }

    pub fn creation_time(&self) -> MountTimestamp {
        self.file_system.mounted_timestamp()
    }

    pub fn access_time(&self) -> MountTimestamp {
        self.file_system.mounted_timestamp()
    }

    pub fn modification_time(&self) -> MountTimestamp {
        self.file_system.mounted_timestamp()
    }

    pub fn inode_change_time(&self) -> MountTimestamp {
        self.file_system.mounted_timestamp()
    }

    pub fn number_of_sub_entries(&self) -> FvdeResult<usize> {
        match self.volume_index {
            VolumeIndex::Root => Ok(self.file_system.number_of_volumes()),
            VolumeIndex::Volume(_) => Err(FvdeError::NotDirectory),
        }
    }

    /// The `index`-th volume file under the root.
    pub fn sub_entry(&self, index: usize) -> FvdeResult<FileEntry<'a>> {
        if !self.volume_index.is_root() {
            return Err(FvdeError::NotDirectory);
        }
        if index >= self.file_system.number_of_volumes() {
            return Err(FvdeError::InvalidVolumeIndex(index));
        }
        let name = self.file_system.path_prefix()?.entry_name(index);
        Ok(Self {
            name: Some(name),
            file_system: self.file_system,
            volume_index: VolumeIndex::Volume(index),
        })
    }

    /// Reads decrypted volume bytes at `offset`.
    ///
    /// Reads are clamped to the volume size; at or past the end 0 is
    /// returned. A locked volume fails with an engine error.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> FvdeResult<usize> {
        let VolumeIndex::Volume(index) = self.volume_index else {
            return Err(FvdeError::IsDirectory);
        };
        let volume = self.file_system.get_volume(index)?;
        let size = volume.size()?;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = buf
            .len()
            .min(usize::try_from(size - offset).unwrap_or(usize::MAX));
        Ok(volume.read_at(&mut buf[..len], offset)?)
    }

    /// Owned token the host keeps between open and release.
    pub fn handle(&self) -> EntryHandle {
        EntryHandle {
            volume_index: self.volume_index,
            name: self.name.clone(),
        }
    }
}

/// Owned form of a [`FileEntry`], held by the host per open handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHandle {
    volume_index: VolumeIndex,
    name: Option<String>,
}

impl EntryHandle {
    pub fn volume_index(&self) -> VolumeIndex {
        self.volume_index
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn entry<'a>(&self, file_system: &'a FileSystemModel) -> FileEntry<'a> {
        FileEntry::new(file_system, self.volume_index, self.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::path::PathPrefix;
    use crate::testing::MemoryVolume;

    fn two_volume_model() -> FileSystemModel {
        let model = FileSystemModel::with_prefix(PathPrefix::posix());
        model.append_volume(MemoryVolume::unlocked(b"first volume".to_vec()).into_boxed());
        model.append_volume(MemoryVolume::unlocked(b"second".to_vec()).into_boxed());
        model
    }

    #[test]
    fn test_root_attributes() {
        let model = two_volume_model();
        let root = FileEntry::root(&model);
        assert_eq!(root.kind(), EntryKind::Directory);
        assert_eq!(root.file_mode(), S_IFDIR | 0o555);
        assert_eq!(root.size().unwrap(), 0);
        assert!(root.parent().is_none());
        assert!(root.name().is_none());
    }

    #[test]
    fn test_volume_attributes() {
        let model = two_volume_model();
        let entry = FileEntry::from_path(&model, "/fvde1").unwrap();
        assert_eq!(entry.kind(), EntryKind::File);
        assert_eq!(entry.file_mode(), S_IFREG | 0o444);
        assert_eq!(entry.size().unwrap(), 12);
        assert_eq!(entry.name(), Some("fvde1"));

        let parent = entry.parent().expect("volume has a parent");
        assert_eq!(parent.volume_index(), VolumeIndex::Root);
    }

    #[test]
    fn test_all_times_are_mount_time() {
        let model = two_volume_model();
        let entry = FileEntry::from_path(&model, "/fvde2").unwrap();
        let mounted = model.mounted_timestamp();
        assert_eq!(entry.creation_time(), mounted);
        assert_eq!(entry.access_time(), mounted);
        assert_eq!(entry.modification_time(), mounted);
        assert_eq!(entry.inode_change_time(), mounted);
        assert_eq!(FileEntry::root(&model).modification_time(), mounted);
    }

    #[test]
    fn test_sub_entries() {
        let model = two_volume_model();
        let root = FileEntry::root(&model);
        assert_eq!(root.number_of_sub_entries().unwrap(), 2);

        let names: Vec<String> = (0..2)
            .map(|i| root.sub_entry(i).unwrap().name().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["fvde1", "fvde2"]);

        assert!(matches!(root.sub_entry(2), Err(FvdeError::InvalidVolumeIndex(2))));
    }

    #[test]
    fn test_volume_is_not_a_directory() {
        let model = two_volume_model();
        let entry = root_child(&model, 0);
        assert!(matches!(entry.number_of_sub_entries(), Err(FvdeError::NotDirectory)));
        assert!(matches!(entry.sub_entry(0), Err(FvdeError::NotDirectory)));
    }

    fn root_child(model: &FileSystemModel, index: usize) -> FileEntry<'_> {
        FileEntry::root(model).sub_entry(index).unwrap()
    }

    #[test]
    fn test_read_clamps_to_volume_size() {
        let model = two_volume_model();
        let entry = root_child(&model, 1);

        let mut buf = [0u8; 32];
        assert_eq!(entry.read_at(&mut buf, 2).unwrap(), 4);
        assert_eq!(&buf[..4], b"cond");
        assert_eq!(entry.read_at(&mut buf, 6).unwrap(), 0);
        assert_eq!(entry.read_at(&mut buf, 600).unwrap(), 0);
    }

    #[test]
    fn test_read_root_is_directory_error() {
        let model = two_volume_model();
        let mut buf = [0u8; 4];
        assert!(matches!(
            FileEntry::root(&model).read_at(&mut buf, 0),
            Err(FvdeError::IsDirectory)
        ));
    }

    #[test]
    fn test_read_locked_volume_fails() {
        let model = FileSystemModel::with_prefix(PathPrefix::posix());
        model.append_volume(MemoryVolume::with_password(vec![7u8; 64], "secret").into_boxed());

        let entry = root_child(&model, 0);
        assert!(entry.is_locked().unwrap());
        let mut buf = [0u8; 8];
        assert!(matches!(
            entry.read_at(&mut buf, 0),
            Err(FvdeError::Engine(EngineError::Locked))
        ));
    }

    #[test]
    fn test_handle_rebuilds_entry() {
        let model = two_volume_model();
        let handle = root_child(&model, 1).handle();
        assert_eq!(handle.name(), Some("fvde2"));

        let rebuilt = handle.entry(&model);
        assert_eq!(rebuilt.volume_index(), VolumeIndex::Volume(1));
        assert_eq!(rebuilt.size().unwrap(), 6);
    }
}

//! Inode numbering and attribute construction.
//!
//! Inodes are derived from the volume index, so no inode table is needed:
//!
//! | Entry | Inode |
//! |-------|-------|
//! | root  | 1     |
//! | volume `i` (0-based) | `i + 2` |

use crate::config::MountConfig;
use fuser::{FileAttr, FileType};
use fvde_core::{EntryKind, FileEntry, FvdeResult, VolumeIndex};

pub const ROOT_INODE: u64 = 1;

/// Block size reported in attributes and `statfs`.
pub const BLOCK_SIZE: u32 = 4096;

/// Maximum entry name length reported by `statfs`.
pub const NAME_MAX: u32 = 255;

pub fn inode_for(index: VolumeIndex) -> u64 {
    match index {
        VolumeIndex::Root => ROOT_INODE,
        VolumeIndex::Volume(i) => i as u64 + 2,
    }
}

/// Maps an inode back to its index. Does not check that the volume exists.
pub fn index_for(inode: u64) -> Option<VolumeIndex> {
    match inode {
        0 => None,
        ROOT_INODE => Some(VolumeIndex::Root),
        n => usize::try_from(n - 2).ok().map(VolumeIndex::Volume),
    }
}

pub fn file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::Directory => FileType::Directory,
        EntryKind::File => FileType::RegularFile,
    }
}

/// Attributes of `entry`. Every timestamp is the mount time.
pub fn entry_attr(entry: &FileEntry<'_>, config: &MountConfig) -> FvdeResult<FileAttr> {
    let size = entry.size()?;
    let kind = entry.kind();
    Ok(FileAttr {
        ino: inode_for(entry.volume_index()),
        size,
        blocks: size.div_ceil(512),
        atime: entry.access_time().into(),
        mtime: entry.modification_time().into(),
        ctime: entry.inode_change_time().into(),
        crtime: entry.creation_time().into(),
        kind: file_type(kind),
        perm: entry.permissions(),
        nlink: match kind {
            EntryKind::Directory => 2,
            EntryKind::File => 1,
        },
        uid: config.uid,
        gid: config.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fvde_core::testing::{patterned_volume, MemoryVolume};
    use fvde_core::{FileSystemModel, PathPrefix};

    #[test]
    fn test_inode_scheme() {
        assert_eq!(inode_for(VolumeIndex::Root), 1);
        assert_eq!(inode_for(VolumeIndex::Volume(0)), 2);
        assert_eq!(index_for(1), Some(VolumeIndex::Root));
        assert_eq!(index_for(2), Some(VolumeIndex::Volume(0)));
        assert_eq!(index_for(11), Some(VolumeIndex::Volume(9)));
        assert_eq!(index_for(0), None);
    }

    #[test]
    fn test_root_and_volume_attrs() {
        let model = FileSystemModel::with_prefix(PathPrefix::posix());
        model.append_volume(MemoryVolume::unlocked(patterned_volume(5000)).into_boxed());
        let config = MountConfig::default().owner(1000, 100);

        let root = FileEntry::root(&model);
        let attr = entry_attr(&root, &config).unwrap();
        assert_eq!(attr.ino, ROOT_INODE);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.size, 0);
        assert_eq!(attr.perm, 0o555);
        assert_eq!(attr.nlink, 2);

        let volume = root.sub_entry(0).unwrap();
        let attr = entry_attr(&volume, &config).unwrap();
        assert_eq!(attr.ino, 2);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.size, 5000);
        assert_eq!(attr.blocks, 10);
        assert_eq!(attr.perm, 0o444);
        assert_eq!((attr.uid, attr.gid), (1000, 100));
        assert_eq!(attr.mtime, model.mounted_timestamp().as_system_time());
        assert_eq!(attr.atime, attr.crtime);
    }
}

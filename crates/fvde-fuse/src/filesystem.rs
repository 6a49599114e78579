//! fuser `Filesystem` implementation.
//!
//! The tree is one read-only directory holding one file per logical
//! volume. Every callback resolves its entry afresh from the model; the
//! only per-request state is the [`EntryHandle`] kept in the handle table
//! between `open` and `release`.
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | lookup | only below the root; name resolved as `/<name>` |
//! | getattr | stateless, from the inode number |
//! | open | read-only; `EACCES` for write access, `EISDIR` for the root |
//! | read | decrypted bytes, clamped to the volume size |
//! | opendir/readdir | root only; `.`, `..`, then `fvde1`.. |
//! | access | `EACCES` for `W_OK` |
//! | statfs | volume bytes in 4 KiB blocks, no free space |
//! | destroy | closes the mount session |

use crate::attr::{entry_attr, file_type, index_for, inode_for, BLOCK_SIZE, NAME_MAX, ROOT_INODE};
use crate::config::MountConfig;
use crate::error::{FuseError, FuseResult};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, Request,
};
use fvde_core::{EntryHandle, FileEntry, FileSystemModel, FvdeError, MountSession, VolumeIndex};
use fvde_mount::{HandleTable, MountStats};
use libc::c_int;
use std::ffi::OsStr;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListingEntry {
    pub inode: u64,
    /// Offset the kernel passes back to continue after this entry.
    pub offset: i64,
    pub file_type: FileType,
    pub name: String,
}

/// Values for a `statfs` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatfsInfo {
    pub blocks: u64,
    pub files: u64,
    pub block_size: u32,
    pub name_max: u32,
}

/// FUSE file system serving the volumes of one mount session.
pub struct FvdeFs {
    session: MountSession,
    file_system: Arc<FileSystemModel>,
    handles: HandleTable<EntryHandle>,
    stats: Arc<MountStats>,
    config: MountConfig,
}

impl FvdeFs {
    /// Takes ownership of an opened session.
    pub fn new(session: MountSession, config: MountConfig) -> Self {
        Self::with_stats(session, config, Arc::new(MountStats::new()))
    }

    pub fn with_stats(session: MountSession, config: MountConfig, stats: Arc<MountStats>) -> Self {
        let file_system = session.file_system();
        Self {
            session,
            file_system,
            handles: HandleTable::new(),
            stats,
            config,
        }
    }

    pub fn stats(&self) -> Arc<MountStats> {
        Arc::clone(&self.stats)
    }

    pub fn session(&self) -> &MountSession {
        &self.session
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn entry(&self, inode: u64) -> FuseResult<FileEntry<'_>> {
        let root = FileEntry::root(&self.file_system);
        match index_for(inode) {
            Some(VolumeIndex::Root) => Ok(root),
            Some(VolumeIndex::Volume(index)) => root.sub_entry(index).map_err(|e| match e {
                FvdeError::InvalidVolumeIndex(_) => FuseError::UnknownInode(inode),
                other => other.into(),
            }),
            None => Err(FuseError::UnknownInode(inode)),
        }
    }

    pub fn lookup_attr(&self, parent: u64, name: &OsStr) -> FuseResult<FileAttr> {
        let parent_entry = self.entry(parent)?;
        if !parent_entry.is_directory() {
            return Err(FvdeError::NotDirectory.into());
        }
        let name = name.to_str().ok_or(FuseError::InvalidName)?;
        let prefix = self.file_system.path_prefix()?;
        let path = format!("{}{name}", prefix.separator());
        let entry = FileEntry::from_path(&self.file_system, &path)?;
        if entry.volume_index().is_root() {
            // "" or "/" below the root.
            return Err(FvdeError::NotFound(path).into());
        }
        Ok(entry_attr(&entry, &self.config)?)
    }

    pub fn attr(&self, inode: u64) -> FuseResult<FileAttr> {
        let entry = self.entry(inode)?;
        Ok(entry_attr(&entry, &self.config)?)
    }

    /// Opens a volume file for reading and returns the new `fh`.
    pub fn open_file(&self, inode: u64, flags: i32) -> FuseResult<u64> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(FuseError::WriteAccess);
        }
        let entry = self.entry(inode)?;
        if entry.is_directory() {
            return Err(FvdeError::IsDirectory.into());
        }
        let fh = self.handles.insert(entry.handle());
        self.stats.record_open();
        Ok(fh)
    }

    pub fn open_dir(&self, inode: u64) -> FuseResult<u64> {
        let entry = self.entry(inode)?;
        if !entry.is_directory() {
            return Err(FvdeError::NotDirectory.into());
        }
        let fh = self.handles.insert(entry.handle());
        self.stats.record_open();
        Ok(fh)
    }

    pub fn read_handle(&self, fh: u64, offset: i64, size: u32) -> FuseResult<Vec<u8>> {
        let offset = u64::try_from(offset).map_err(|_| FuseError::InvalidOffset(offset))?;
        let handle = self.handles.get(fh).ok_or(FuseError::UnknownHandle(fh))?;
        let entry = handle.entry(&self.file_system);
        let mut buf = vec![0u8; size as usize];
        let read = entry.read_at(&mut buf, offset)?;
        buf.truncate(read);
        self.stats.record_read(read as u64);
        Ok(buf)
    }

    /// Listing of the directory behind `fh`, starting after `offset`.
    pub fn list_directory(&self, fh: u64, offset: i64) -> FuseResult<Vec<DirListingEntry>> {
        let handle = self.handles.get(fh).ok_or(FuseError::UnknownHandle(fh))?;
        let dir = handle.entry(&self.file_system);
        let count = dir.number_of_sub_entries()?;

        let mut entries = Vec::with_capacity(count + 2);
        for name in [".", ".."] {
            entries.push(DirListingEntry {
                inode: ROOT_INODE,
                offset: entries.len() as i64 + 1,
                file_type: FileType::Directory,
                name: name.to_string(),
            });
        }
        for index in 0..count {
            let entry = dir.sub_entry(index)?;
            entries.push(DirListingEntry {
                inode: inode_for(entry.volume_index()),
                offset: entries.len() as i64 + 1,
                file_type: file_type(entry.kind()),
                name: entry.name().unwrap_or_default().to_string(),
            });
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        Ok(entries.into_iter().skip(skip).collect())
    }

    pub fn release_handle(&self, fh: u64) -> FuseResult<()> {
        self.handles
            .remove(fh)
            .ok_or(FuseError::UnknownHandle(fh))?;
        self.stats.record_release();
        Ok(())
    }

    pub fn check_access(&self, inode: u64, mask: i32) -> FuseResult<()> {
        self.entry(inode)?;
        if mask & libc::W_OK != 0 {
            return Err(FuseError::WriteAccess);
        }
        Ok(())
    }

    pub fn statfs_info(&self) -> StatfsInfo {
        StatfsInfo {
            blocks: self.file_system.total_size().div_ceil(u64::from(BLOCK_SIZE)),
            files: self.file_system.number_of_volumes() as u64 + 1,
            block_size: BLOCK_SIZE,
            name_max: NAME_MAX,
        }
    }

    fn fail(&self, op: &str, error: &FuseError) -> c_int {
        self.stats.record_error();
        debug!(op, error = %error, "FUSE request failed");
        error.to_errno()
    }

    fn shut_down(&mut self) {
        self.handles.clear();
        self.session.close();
    }
}

impl Filesystem for FvdeFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(
            volumes = self.file_system.number_of_volumes(),
            "FUSE filesystem initialized"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        self.shut_down();
        info!(stats = %self.stats.snapshot(), "FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!(parent, name = ?name, "lookup");
        match self.lookup_attr(parent, name) {
            Ok(attr) => reply.entry(&self.config.attr_ttl, &attr, 0),
            // Misses are routine; not counted as errors.
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.attr(ino) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => reply.error(self.fail("getattr", &e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        match self.open_file(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(self.fail("open", &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, fh, offset, size, "read");
        match self.read_handle(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(self.fail("read", &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(inode = ino, fh, "release");
        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(self.fail("release", &e)),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, "opendir");
        match self.open_dir(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(self.fail("opendir", &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, fh, offset, "readdir");
        match self.list_directory(fh, offset) {
            Ok(entries) => {
                self.stats.record_listing();
                for entry in entries {
                    if reply.add(entry.inode, entry.offset, entry.file_type, &entry.name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(self.fail("readdir", &e)),
        }
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace!(inode = ino, fh, "releasedir");
        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(self.fail("releasedir", &e)),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        trace!(inode = ino, mask, "access");
        match self.check_access(ino, mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let info = self.statfs_info();
        reply.statfs(
            info.blocks,
            0,
            0,
            info.files,
            0,
            info.block_size,
            info.name_max,
            info.block_size,
        );
    }
}

impl Drop for FvdeFs {
    fn drop(&mut self) {
        // destroy() is not called if the session never started.
        self.shut_down();
    }
}

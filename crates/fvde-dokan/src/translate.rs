//! Platform-neutral half of the Dokan adapter.
//!
//! Everything a Dokan callback needs to decide is computed here from the
//! [`FileSystemModel`]: open checks, file information, directory listings,
//! volume information. The Windows handler only converts these values into
//! the `dokan` crate's structures, so the logic is tested on every target.

use crate::error::{DokanError, DokanResult};
use fvde_core::{EntryHandle, EntryKind, FileEntry, FileSystemModel};
use fvde_mount::MountOptions;
use std::time::SystemTime;

pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;

pub const FILE_CASE_SENSITIVE_SEARCH: u32 = 0x0000_0001;
pub const FILE_CASE_PRESERVED_NAMES: u32 = 0x0000_0002;
pub const FILE_UNICODE_ON_DISK: u32 = 0x0000_0004;
pub const FILE_READ_ONLY_VOLUME: u32 = 0x0008_0000;

/// Flags reported by `GetVolumeInformation`.
pub const VOLUME_FLAGS: u32 = FILE_CASE_SENSITIVE_SEARCH
    | FILE_CASE_PRESERVED_NAMES
    | FILE_UNICODE_ON_DISK
    | FILE_READ_ONLY_VOLUME;

/// Explorer misbehaves on a zero serial number.
pub const VOLUME_SERIAL_NUMBER: u32 = 0x1983_1116;

pub const MAX_COMPONENT_LENGTH: u32 = 256;

// Kernel create dispositions.
pub const FILE_SUPERSEDE: u32 = 0;
pub const FILE_OPEN: u32 = 1;
pub const FILE_CREATE: u32 = 2;
pub const FILE_OPEN_IF: u32 = 3;
pub const FILE_OVERWRITE: u32 = 4;
pub const FILE_OVERWRITE_IF: u32 = 5;

// Kernel create options.
pub const FILE_DIRECTORY_FILE: u32 = 0x0000_0001;
pub const FILE_NON_DIRECTORY_FILE: u32 = 0x0000_0040;

const FILE_WRITE_DATA: u32 = 0x0000_0002;
const FILE_APPEND_DATA: u32 = 0x0000_0004;
const FILE_WRITE_EA: u32 = 0x0000_0010;
const FILE_WRITE_ATTRIBUTES: u32 = 0x0000_0100;
const DELETE: u32 = 0x0001_0000;
const GENERIC_ALL: u32 = 0x1000_0000;
const GENERIC_WRITE: u32 = 0x4000_0000;

/// Access rights the mount never grants.
pub const WRITE_ACCESS_MASK: u32 = FILE_WRITE_DATA
    | FILE_APPEND_DATA
    | FILE_WRITE_EA
    | FILE_WRITE_ATTRIBUTES
    | DELETE
    | GENERIC_ALL
    | GENERIC_WRITE;

/// The kernel-side arguments of a `CreateFile` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    pub desired_access: u32,
    pub create_disposition: u32,
    pub create_options: u32,
}

impl OpenRequest {
    /// A plain read-only open of an existing entry.
    pub fn read() -> Self {
        Self {
            desired_access: 0x8000_0000, // GENERIC_READ
            create_disposition: FILE_OPEN,
            create_options: 0,
        }
    }

    /// Rejects write access and dispositions other than open and open-if.
    pub fn check(&self) -> DokanResult<()> {
        if self.desired_access & WRITE_ACCESS_MASK != 0 {
            return Err(DokanError::WriteAccess);
        }
        match self.create_disposition {
            FILE_OPEN | FILE_OPEN_IF => Ok(()),
            _ => Err(DokanError::WriteAccess),
        }
    }
}

/// File information in the shape of `BY_HANDLE_FILE_INFORMATION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub attributes: u32,
    pub creation_time: SystemTime,
    pub last_access_time: SystemTime,
    pub last_write_time: SystemTime,
    pub file_size: u64,
    pub number_of_links: u32,
    /// Root is 1, volume `i` is `i + 2`.
    pub file_index: u64,
}

impl EntryInfo {
    pub fn is_directory(&self) -> bool {
        self.attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

pub fn entry_attributes(kind: EntryKind) -> u32 {
    match kind {
        EntryKind::Directory => FILE_ATTRIBUTE_DIRECTORY,
        EntryKind::File => FILE_ATTRIBUTE_READONLY,
    }
}

pub fn entry_info(entry: &FileEntry<'_>) -> DokanResult<EntryInfo> {
    #[allow(clippy::cast_sign_loss)]
    let file_index = (entry.volume_index().as_raw() + 2) as u64;
    Ok(EntryInfo {
        attributes: entry_attributes(entry.kind()),
        creation_time: entry.creation_time().into(),
        last_access_time: entry.access_time().into(),
        last_write_time: entry.modification_time().into(),
        file_size: entry.size()?,
        number_of_links: 1,
        file_index,
    })
}

/// One `WIN32_FIND_DATAW` record.
///
/// There is no separate 8.3 name: volume names are at most `FVDE999`, which
/// is already a valid short name, and dokan's `FindData` has no slot for one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindEntry {
    pub info: EntryInfo,
    pub file_name: String,
}

impl FindEntry {
    fn new(info: EntryInfo, file_name: &str) -> Self {
        Self {
            info,
            file_name: file_name.to_string(),
        }
    }
}

/// `.`, `..`, then one record per volume.
pub fn list_directory(dir: &FileEntry<'_>) -> DokanResult<Vec<FindEntry>> {
    let count = dir.number_of_sub_entries()?;
    let dot = entry_info(dir)?;
    // The root is its own parent.
    let dot_dot = match dir.parent() {
        Some(parent) => entry_info(&parent)?,
        None => dot,
    };

    let mut entries = Vec::with_capacity(count + 2);
    entries.push(FindEntry::new(dot, "."));
    entries.push(FindEntry::new(dot_dot, ".."));
    for index in 0..count {
        let entry = dir.sub_entry(index)?;
        let info = entry_info(&entry)?;
        entries.push(FindEntry::new(info, entry.name().unwrap_or_default()));
    }
    Ok(entries)
}

/// Resolves `path` for a `CreateFile` call and returns the context to keep
/// until the handle is closed.
pub fn open_entry(
    file_system: &FileSystemModel,
    path: &str,
    request: &OpenRequest,
) -> DokanResult<EntryHandle> {
    request.check()?;
    let entry = FileEntry::from_path(file_system, path)?;
    if entry.is_directory() {
        if request.create_options & FILE_NON_DIRECTORY_FILE != 0 {
            return Err(fvde_core::FvdeError::IsDirectory.into());
        }
    } else if request.create_options & FILE_DIRECTORY_FILE != 0 {
        return Err(fvde_core::FvdeError::NotDirectory.into());
    }
    Ok(entry.handle())
}

/// Reads into `buf` and returns the count as Dokan reports it.
pub fn read_entry(
    file_system: &FileSystemModel,
    handle: &EntryHandle,
    offset: i64,
    buf: &mut [u8],
) -> DokanResult<u32> {
    let start = u64::try_from(offset).map_err(|_| DokanError::InvalidOffset(offset))?;
    let entry = handle.entry(file_system);
    let read = entry.read_at(buf, start)?;
    // Dokan read buffers are sized by a u32 length.
    Ok(u32::try_from(read).unwrap_or(u32::MAX))
}

/// Values for `GetVolumeInformation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInformation {
    pub name: String,
    pub serial_number: u32,
    pub max_component_length: u32,
    pub fs_flags: u32,
    pub fs_name: String,
}

pub fn volume_information(options: &MountOptions) -> VolumeInformation {
    VolumeInformation {
        name: options.volume_label.clone(),
        serial_number: VOLUME_SERIAL_NUMBER,
        max_component_length: MAX_COMPONENT_LENGTH,
        fs_flags: VOLUME_FLAGS,
        fs_name: options.fs_name.to_uppercase(),
    }
}

/// Values for `GetDiskFreeSpace`. The volume is full by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub byte_count: u64,
    pub free_byte_count: u64,
    pub available_byte_count: u64,
}

pub fn disk_space(file_system: &FileSystemModel) -> DiskSpace {
    DiskSpace {
        byte_count: file_system.total_size(),
        free_byte_count: 0,
        available_byte_count: 0,
    }
}

/// Normalizes a drive-letter mount point (`m`, `M:`, `m:\`) to `M:\`.
/// Directory mount points are returned trimmed.
pub fn normalize_mount_point(input: &str) -> DokanResult<String> {
    let s = input.trim();
    let mut chars = s.chars();
    match (chars.next(), chars.next(), chars.next(), chars.next()) {
        (None, ..) => Err(DokanError::InvalidMountPoint(input.to_string())),
        (Some(letter), None, ..)
        | (Some(letter), Some(':'), None, _)
        | (Some(letter), Some(':'), Some('\\'), None)
            if letter.is_ascii_alphabetic() =>
        {
            Ok(format!("{}:\\", letter.to_ascii_uppercase()))
        }
        _ => Ok(s.to_string()),
    }
}

/// Whether `mount_point` (normalized) names a drive letter rather than a
/// directory.
pub fn is_drive_letter(mount_point: &str) -> bool {
    let bytes = mount_point.as_bytes();
    bytes.len() == 3 && bytes[0].is_ascii_alphabetic() && &bytes[1..] == b":\\"
}

//! `dokan::FileSystemHandler` over the translation layer.

use crate::error::{DokanError, HostStatus};
use crate::translate::{self, EntryInfo, OpenRequest};
use dokan::{
    CreateFileInfo, DiskSpaceInfo, FileInfo, FileSystemHandler, FillDataResult, FindData,
    OperationInfo, OperationResult, VolumeInfo, IO_SECURITY_CONTEXT,
};
use fvde_core::{EntryHandle, FileEntry, FileSystemModel, MountSession};
use fvde_mount::{DokanAbi, MountOptions, MountStats};
use parking_lot::Mutex;
use std::sync::Arc;
use widestring::{U16CStr, U16CString};
use winapi::shared::ntstatus::STATUS_INVALID_PARAMETER;
use winapi::um::winnt::ACCESS_MASK;

/// Dokan handler serving the volumes of one mount session.
///
/// The per-open context is the [`EntryHandle`]; Dokan drops it when the
/// handle is closed.
pub struct FvdeHandler {
    session: Mutex<Option<MountSession>>,
    file_system: Arc<FileSystemModel>,
    options: MountOptions,
    stats: Arc<MountStats>,
    abi: DokanAbi,
}

impl FvdeHandler {
    pub fn new(
        session: MountSession,
        options: MountOptions,
        stats: Arc<MountStats>,
        abi: DokanAbi,
    ) -> Self {
        let file_system = session.file_system();
        Self {
            session: Mutex::new(Some(session)),
            file_system,
            options,
            stats,
            abi,
        }
    }

    /// NTSTATUS for `error`. Under the legacy convention the Win32 code
    /// goes through Dokan's own conversion.
    fn status(&self, error: &DokanError) -> i32 {
        match error.host_status(self.abi) {
            HostStatus::NtStatus(status) => status,
            HostStatus::Win32(code) => dokan::map_win32_error_to_ntstatus(code),
        }
    }

    fn fail(&self, op: &str, error: &DokanError) -> i32 {
        self.stats.record_error();
        tracing::debug!(op, error = %error, "Dokan request failed");
        self.status(error)
    }

    fn close_session(&self) {
        if let Some(mut session) = self.session.lock().take() {
            session.close();
        }
    }
}

fn file_info(info: &EntryInfo) -> FileInfo {
    FileInfo {
        attributes: info.attributes,
        creation_time: info.creation_time,
        last_access_time: info.last_access_time,
        last_write_time: info.last_write_time,
        file_size: info.file_size,
        number_of_links: info.number_of_links,
        file_index: info.file_index,
    }
}

fn wide(value: &str) -> OperationResult<U16CString> {
    U16CString::from_str(value).map_err(|_| STATUS_INVALID_PARAMETER)
}

impl<'c, 'h: 'c> FileSystemHandler<'c, 'h> for FvdeHandler {
    type Context = EntryHandle;

    fn create_file(
        &'h self,
        file_name: &U16CStr,
        _security_context: &IO_SECURITY_CONTEXT,
        desired_access: ACCESS_MASK,
        _file_attributes: u32,
        _share_access: u32,
        create_disposition: u32,
        create_options: u32,
        _info: &mut OperationInfo<'c, 'h, Self>,
    ) -> OperationResult<CreateFileInfo<Self::Context>> {
        let path = file_name.to_string_lossy();
        tracing::trace!(path = %path, desired_access, create_disposition, "create_file");
        let request = OpenRequest {
            desired_access,
            create_disposition,
            create_options,
        };
        match translate::open_entry(&self.file_system, &path, &request) {
            Ok(handle) => {
                self.stats.record_open();
                Ok(CreateFileInfo {
                    is_dir: handle.volume_index().is_root(),
                    context: handle,
                    new_file_created: false,
                })
            }
            // Explorer looks up desktop.ini and friends; misses are not errors.
            Err(e @ DokanError::Fvde(fvde_core::FvdeError::NotFound(_))) => Err(self.status(&e)),
            Err(e) => Err(self.fail("create_file", &e)),
        }
    }

    fn close_file(
        &'h self,
        _file_name: &U16CStr,
        _info: &OperationInfo<'c, 'h, Self>,
        _context: &'c Self::Context,
    ) {
        self.stats.record_release();
    }

    fn read_file(
        &'h self,
        _file_name: &U16CStr,
        offset: i64,
        buffer: &mut [u8],
        _info: &OperationInfo<'c, 'h, Self>,
        context: &'c Self::Context,
    ) -> OperationResult<u32> {
        tracing::trace!(index = ?context.volume_index(), offset, len = buffer.len(), "read_file");
        match translate::read_entry(&self.file_system, context, offset, buffer) {
            Ok(read) => {
                self.stats.record_read(u64::from(read));
                Ok(read)
            }
            Err(e) => Err(self.fail("read_file", &e)),
        }
    }

    fn get_file_information(
        &'h self,
        _file_name: &U16CStr,
        _info: &OperationInfo<'c, 'h, Self>,
        context: &'c Self::Context,
    ) -> OperationResult<FileInfo> {
        tracing::trace!(index = ?context.volume_index(), "get_file_information");
        let entry = context.entry(&self.file_system);
        translate::entry_info(&entry)
            .map(|info| file_info(&info))
            .map_err(|e| self.fail("get_file_information", &e))
    }

    fn find_files(
        &'h self,
        _file_name: &U16CStr,
        mut fill_find_data: impl FnMut(&FindData) -> FillDataResult,
        _info: &OperationInfo<'c, 'h, Self>,
        context: &'c Self::Context,
    ) -> OperationResult<()> {
        tracing::trace!(index = ?context.volume_index(), "find_files");
        let dir = context.entry(&self.file_system);
        let entries =
            translate::list_directory(&dir).map_err(|e| self.fail("find_files", &e))?;
        self.stats.record_listing();
        for entry in entries {
            // FindData has no 8.3 slot; Dokan derives the short name itself.
            let data = FindData {
                attributes: entry.info.attributes,
                creation_time: entry.info.creation_time,
                last_access_time: entry.info.last_access_time,
                last_write_time: entry.info.last_write_time,
                file_size: entry.info.file_size,
                file_name: wide(&entry.file_name)?,
            };
            if fill_find_data(&data).is_err() {
                break;
            }
        }
        Ok(())
    }

    fn get_disk_free_space(
        &'h self,
        _info: &OperationInfo<'c, 'h, Self>,
    ) -> OperationResult<DiskSpaceInfo> {
        let space = translate::disk_space(&self.file_system);
        Ok(DiskSpaceInfo {
            byte_count: space.byte_count,
            free_byte_count: space.free_byte_count,
            available_byte_count: space.available_byte_count,
        })
    }

    fn get_volume_information(
        &'h self,
        _info: &OperationInfo<'c, 'h, Self>,
    ) -> OperationResult<VolumeInfo> {
        let volume = translate::volume_information(&self.options);
        Ok(VolumeInfo {
            name: wide(&volume.name)?,
            serial_number: volume.serial_number,
            max_component_length: volume.max_component_length,
            fs_flags: volume.fs_flags,
            fs_name: wide(&volume.fs_name)?,
        })
    }

    fn unmounted(&'h self, _info: &OperationInfo<'c, 'h, Self>) -> OperationResult<()> {
        tracing::info!(stats = %self.stats.snapshot(), "Dokan filesystem unmounted");
        self.close_session();
        Ok(())
    }
}

impl Drop for FvdeHandler {
    fn drop(&mut self) {
        self.close_session();
    }
}

//! Volume engine backed by the system libfvde and libbfio libraries.
//!
//! Source files are handed to libfvde as libbfio file-range handles that
//! start at the session's volume offset: one handle for the primary volume
//! and a pool with one handle per source for the physical volume files.
//! libfvde must be built with multi-threading support; it then serialises
//! access to each volume internally.

#![allow(unsafe_code)]

use super::{EngineOptions, LogicalVolume, UnlockOutcome, VolumeEngine, VolumeGroup};
use crate::error::{EngineError, EngineResult};
use crate::pool::{IoPool, RangedSource};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::Arc;

#[repr(C)]
struct RawVolume {
    _private: [u8; 0],
}

#[repr(C)]
struct RawVolumeGroup {
    _private: [u8; 0],
}

#[repr(C)]
struct RawLogicalVolume {
    _private: [u8; 0],
}

#[repr(C)]
struct RawFvdeError {
    _private: [u8; 0],
}

#[repr(C)]
struct RawBfioHandle {
    _private: [u8; 0],
}

#[repr(C)]
struct RawBfioPool {
    _private: [u8; 0],
}

#[repr(C)]
struct RawBfioError {
    _private: [u8; 0],
}

const LIBFVDE_OPEN_READ: c_int = 0x01;
const LIBBFIO_OPEN_READ: c_int = 0x01;
const LIBBFIO_POOL_UNLIMITED_NUMBER_OF_OPEN_HANDLES: c_int = 0;

#[link(name = "fvde")]
unsafe extern "C" {
    fn libfvde_error_sprint(error: *mut RawFvdeError, string: *mut c_char, size: usize) -> c_int;
    fn libfvde_error_free(error: *mut *mut RawFvdeError);

    fn libfvde_volume_initialize(volume: *mut *mut RawVolume, error: *mut *mut RawFvdeError)
    -> c_int;
    fn libfvde_volume_free(volume: *mut *mut RawVolume, error: *mut *mut RawFvdeError) -> c_int;
    fn libfvde_volume_signal_abort(volume: *mut RawVolume, error: *mut *mut RawFvdeError) -> c_int;
    fn libfvde_volume_read_encrypted_root_plist(
        volume: *mut RawVolume,
        filename: *const c_char,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_volume_open_file_io_handle(
        volume: *mut RawVolume,
        file_io_handle: *mut RawBfioHandle,
        access_flags: c_int,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_volume_open_physical_volume_files_file_io_pool(
        volume: *mut RawVolume,
        file_io_pool: *mut RawBfioPool,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_volume_close(volume: *mut RawVolume, error: *mut *mut RawFvdeError) -> c_int;
    fn libfvde_volume_get_volume_group(
        volume: *mut RawVolume,
        volume_group: *mut *mut RawVolumeGroup,
        error: *mut *mut RawFvdeError,
    ) -> c_int;

    fn libfvde_volume_group_free(
        volume_group: *mut *mut RawVolumeGroup,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_volume_group_get_number_of_logical_volumes(
        volume_group: *mut RawVolumeGroup,
        number_of_logical_volumes: *mut c_int,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_volume_group_get_logical_volume_by_index(
        volume_group: *mut RawVolumeGroup,
        volume_index: c_int,
        logical_volume: *mut *mut RawLogicalVolume,
        error: *mut *mut RawFvdeError,
    ) -> c_int;

    fn libfvde_logical_volume_free(
        logical_volume: *mut *mut RawLogicalVolume,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_get_identifier(
        logical_volume: *mut RawLogicalVolume,
        uuid_data: *mut u8,
        uuid_data_size: usize,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_get_utf8_name_size(
        logical_volume: *mut RawLogicalVolume,
        utf8_string_size: *mut usize,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_get_utf8_name(
        logical_volume: *mut RawLogicalVolume,
        utf8_string: *mut u8,
        utf8_string_size: usize,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_get_size(
        logical_volume: *mut RawLogicalVolume,
        size: *mut u64,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_is_locked(
        logical_volume: *mut RawLogicalVolume,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_set_key(
        logical_volume: *mut RawLogicalVolume,
        key: *const u8,
        key_size: usize,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_set_utf8_password(
        logical_volume: *mut RawLogicalVolume,
        utf8_string: *const u8,
        utf8_string_length: usize,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_set_utf8_recovery_password(
        logical_volume: *mut RawLogicalVolume,
        utf8_string: *const u8,
        utf8_string_length: usize,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_unlock(
        logical_volume: *mut RawLogicalVolume,
        error: *mut *mut RawFvdeError,
    ) -> c_int;
    fn libfvde_logical_volume_read_buffer_at_offset(
        logical_volume: *mut RawLogicalVolume,
        buffer: *mut c_void,
        buffer_size: usize,
        offset: i64,
        error: *mut *mut RawFvdeError,
    ) -> isize;
}

#[link(name = "bfio")]
unsafe extern "C" {
    fn libbfio_error_sprint(error: *mut RawBfioError, string: *mut c_char, size: usize) -> c_int;
    fn libbfio_error_free(error: *mut *mut RawBfioError);

    fn libbfio_file_range_initialize(
        handle: *mut *mut RawBfioHandle,
        error: *mut *mut RawBfioError,
    ) -> c_int;
    fn libbfio_file_range_set_name(
        handle: *mut RawBfioHandle,
        name: *const c_char,
        name_length: usize,
        error: *mut *mut RawBfioError,
    ) -> c_int;
    fn libbfio_file_range_set(
        handle: *mut RawBfioHandle,
        range_offset: i64,
        range_size: u64,
        error: *mut *mut RawBfioError,
    ) -> c_int;
    fn libbfio_handle_free(handle: *mut *mut RawBfioHandle, error: *mut *mut RawBfioError)
    -> c_int;

    fn libbfio_pool_initialize(
        pool: *mut *mut RawBfioPool,
        number_of_handles: c_int,
        maximum_number_of_open_handles: c_int,
        error: *mut *mut RawBfioError,
    ) -> c_int;
    fn libbfio_pool_append_handle(
        pool: *mut RawBfioPool,
        entry: *mut c_int,
        handle: *mut RawBfioHandle,
        access_flags: c_int,
        error: *mut *mut RawBfioError,
    ) -> c_int;
    fn libbfio_pool_free(pool: *mut *mut RawBfioPool, error: *mut *mut RawBfioError) -> c_int;
}

const ERROR_STRING_SIZE: usize = 512;

/// Formats and frees a libfvde error object.
fn fvde_error_message(mut error: *mut RawFvdeError) -> String {
    if error.is_null() {
        return "unknown libfvde error".to_string();
    }
    let mut buf = [0 as c_char; ERROR_STRING_SIZE];
    // SAFETY: `error` was allocated by libfvde and is freed exactly once;
    // sprint NUL-terminates what it writes into `buf`.
    unsafe {
        let written = libfvde_error_sprint(error, buf.as_mut_ptr(), buf.len());
        let message = if written > 0 {
            CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
        } else {
            "unknown libfvde error".to_string()
        };
        libfvde_error_free(&raw mut error);
        message
    }
}

/// Formats and frees a libbfio error object.
fn bfio_error_message(mut error: *mut RawBfioError) -> String {
    if error.is_null() {
        return "unknown libbfio error".to_string();
    }
    let mut buf = [0 as c_char; ERROR_STRING_SIZE];
    // SAFETY: as in `fvde_error_message`.
    unsafe {
        let written = libbfio_error_sprint(error, buf.as_mut_ptr(), buf.len());
        let message = if written > 0 {
            CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
        } else {
            "unknown libbfio error".to_string()
        };
        libbfio_error_free(&raw mut error);
        message
    }
}

/// Runs a libfvde call and turns a `-1` result into the library's message.
fn fvde_call(f: impl FnOnce(*mut *mut RawFvdeError) -> c_int) -> Result<c_int, String> {
    let mut error: *mut RawFvdeError = ptr::null_mut();
    match f(&raw mut error) {
        -1 => Err(fvde_error_message(error)),
        result => Ok(result),
    }
}

fn bfio_call(f: impl FnOnce(*mut *mut RawBfioError) -> c_int) -> Result<c_int, String> {
    let mut error: *mut RawBfioError = ptr::null_mut();
    match f(&raw mut error) {
        -1 => Err(bfio_error_message(error)),
        result => Ok(result),
    }
}

fn path_to_cstring(path: &Path) -> Result<CString, String> {
    #[cfg(unix)]
    let bytes = std::os::unix::ffi::OsStrExt::as_bytes(path.as_os_str()).to_vec();
    #[cfg(not(unix))]
    let bytes = path
        .to_str()
        .ok_or_else(|| format!("{} is not valid UTF-8", path.display()))?
        .as_bytes()
        .to_vec();
    CString::new(bytes).map_err(|_| format!("{} contains a NUL byte", path.display()))
}

/// Creates a libbfio file-range handle for `source`. The caller owns it.
fn range_handle(source: &RangedSource) -> Result<*mut RawBfioHandle, String> {
    let name = path_to_cstring(source.path())?;
    let offset = i64::try_from(source.offset()).map_err(|_| "volume offset too large".to_string())?;
    let mut handle: *mut RawBfioHandle = ptr::null_mut();

    // SAFETY: `handle` is a valid out-pointer; on failure after
    // initialisation it is freed below before returning.
    bfio_call(|error| unsafe { libbfio_file_range_initialize(&raw mut handle, error) })?;
    let configured = bfio_call(|error| unsafe {
        libbfio_file_range_set_name(handle, name.as_ptr(), name.as_bytes().len(), error)
    })
    .and_then(|_| bfio_call(|error| unsafe { libbfio_file_range_set(handle, offset, 0, error) }));

    if let Err(message) = configured {
        // SAFETY: `handle` was initialised above and is not shared.
        let _ = bfio_call(|error| unsafe { libbfio_handle_free(&raw mut handle, error) });
        return Err(message);
    }
    Ok(handle)
}

/// The primary volume plus the libbfio objects it reads through.
struct Umbrella {
    volume: *mut RawVolume,
    group: *mut RawVolumeGroup,
    file_io_handle: *mut RawBfioHandle,
    file_io_pool: *mut RawBfioPool,
    opened: bool,
}

// SAFETY: libfvde built with multi-threading support guards every volume
// object with its own read-write lock; the pointers are only freed in Drop.
unsafe impl Send for Umbrella {}
// SAFETY: see above.
unsafe impl Sync for Umbrella {}

impl Umbrella {
    fn open(pool: &IoPool, options: &EngineOptions) -> Result<Self, String> {
        let mut umbrella = Self {
            volume: ptr::null_mut(),
            group: ptr::null_mut(),
            file_io_handle: ptr::null_mut(),
            file_io_pool: ptr::null_mut(),
            opened: false,
        };

        umbrella.file_io_handle = range_handle(pool.primary())?;

        // SAFETY: every out-pointer is a field of `umbrella`, which frees
        // whatever was acquired if a later step fails.
        fvde_call(|error| unsafe { libfvde_volume_initialize(&raw mut umbrella.volume, error) })?;

        if let Some(plist) = &options.encrypted_root_plist {
            let filename = path_to_cstring(plist)?;
            fvde_call(|error| unsafe {
                libfvde_volume_read_encrypted_root_plist(umbrella.volume, filename.as_ptr(), error)
            })?;
        }

        fvde_call(|error| unsafe {
            libfvde_volume_open_file_io_handle(
                umbrella.volume,
                umbrella.file_io_handle,
                LIBFVDE_OPEN_READ,
                error,
            )
        })?;
        umbrella.opened = true;

        bfio_call(|error| unsafe {
            libbfio_pool_initialize(
                &raw mut umbrella.file_io_pool,
                0,
                LIBBFIO_POOL_UNLIMITED_NUMBER_OF_OPEN_HANDLES,
                error,
            )
        })?;
        for source in pool.iter() {
            let mut handle = range_handle(source)?;
            let mut entry: c_int = 0;
            let appended = bfio_call(|error| unsafe {
                libbfio_pool_append_handle(
                    umbrella.file_io_pool,
                    &raw mut entry,
                    handle,
                    LIBBFIO_OPEN_READ,
                    error,
                )
            });
            if let Err(message) = appended {
                // SAFETY: the pool did not take ownership of `handle`.
                let _ = bfio_call(|error| unsafe { libbfio_handle_free(&raw mut handle, error) });
                return Err(message);
            }
        }

        fvde_call(|error| unsafe {
            libfvde_volume_open_physical_volume_files_file_io_pool(
                umbrella.volume,
                umbrella.file_io_pool,
                error,
            )
        })?;
        fvde_call(|error| unsafe {
            libfvde_volume_get_volume_group(umbrella.volume, &raw mut umbrella.group, error)
        })?;

        Ok(umbrella)
    }
}

impl Drop for Umbrella {
    fn drop(&mut self) {
        // SAFETY: each pointer is either null or exclusively owned here;
        // logical volumes holding an `Arc<Umbrella>` are already gone.
        unsafe {
            if !self.group.is_null() {
                let _ = fvde_call(|error| libfvde_volume_group_free(&raw mut self.group, error));
            }
            if self.opened {
                let _ = fvde_call(|error| libfvde_volume_close(self.volume, error));
            }
            if !self.volume.is_null() {
                let _ = fvde_call(|error| libfvde_volume_free(&raw mut self.volume, error));
            }
            if !self.file_io_pool.is_null() {
                let _ = bfio_call(|error| libbfio_pool_free(&raw mut self.file_io_pool, error));
            }
            if !self.file_io_handle.is_null() {
                let _ = bfio_call(|error| libbfio_handle_free(&raw mut self.file_io_handle, error));
            }
        }
    }
}

/// Engine that decrypts volumes with libfvde.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibfvdeEngine;

impl LibfvdeEngine {
    pub fn new() -> Self {
        Self
    }
}

impl VolumeEngine for LibfvdeEngine {
    fn name(&self) -> &'static str {
        "libfvde"
    }

    fn open(
        &self,
        pool: Arc<IoPool>,
        options: &EngineOptions,
    ) -> EngineResult<Arc<dyn VolumeGroup>> {
        let umbrella = Umbrella::open(&pool, options).map_err(EngineError::Open)?;
        Ok(Arc::new(LibfvdeGroup {
            umbrella: Arc::new(umbrella),
            _pool: pool,
        }))
    }
}

struct LibfvdeGroup {
    umbrella: Arc<Umbrella>,
    _pool: Arc<IoPool>,
}

impl VolumeGroup for LibfvdeGroup {
    fn logical_volume_count(&self) -> EngineResult<usize> {
        let mut count: c_int = 0;
        // SAFETY: the group pointer is valid for the umbrella's lifetime.
        fvde_call(|error| unsafe {
            libfvde_volume_group_get_number_of_logical_volumes(
                self.umbrella.group,
                &raw mut count,
                error,
            )
        })
        .map_err(EngineError::Open)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn logical_volume(&self, index: usize) -> EngineResult<Box<dyn LogicalVolume>> {
        let raw_index = c_int::try_from(index).map_err(|_| EngineError::NoSuchVolume(index))?;
        let mut raw: *mut RawLogicalVolume = ptr::null_mut();
        // SAFETY: `raw` is a valid out-pointer; ownership passes to the
        // returned `LibfvdeVolume`.
        fvde_call(|error| unsafe {
            libfvde_volume_group_get_logical_volume_by_index(
                self.umbrella.group,
                raw_index,
                &raw mut raw,
                error,
            )
        })
        .map_err(EngineError::Open)?;
        Ok(Box::new(LibfvdeVolume {
            raw,
            _umbrella: Arc::clone(&self.umbrella),
        }))
    }

    fn signal_abort(&self) {
        // SAFETY: signal_abort only sets a flag inside the volume object.
        let _ = fvde_call(|error| unsafe { libfvde_volume_signal_abort(self.umbrella.volume, error) });
    }
}

struct LibfvdeVolume {
    raw: *mut RawLogicalVolume,
    _umbrella: Arc<Umbrella>,
}

// SAFETY: see `Umbrella`.
unsafe impl Send for LibfvdeVolume {}
// SAFETY: see `Umbrella`.
unsafe impl Sync for LibfvdeVolume {}

impl LogicalVolume for LibfvdeVolume {
    fn identifier(&self) -> EngineResult<[u8; 16]> {
        let mut uuid = [0u8; 16];
        // SAFETY: `uuid` is 16 writable bytes.
        fvde_call(|error| unsafe {
            libfvde_logical_volume_get_identifier(self.raw, uuid.as_mut_ptr(), uuid.len(), error)
        })
        .map_err(EngineError::Open)?;
        Ok(uuid)
    }

    fn name(&self) -> EngineResult<Option<String>> {
        let mut size = 0usize;
        // SAFETY: out-pointers are valid locals; the buffer has `size` bytes.
        let available = fvde_call(|error| unsafe {
            libfvde_logical_volume_get_utf8_name_size(self.raw, &raw mut size, error)
        })
        .map_err(EngineError::Open)?;
        if available == 0 || size == 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; size];
        fvde_call(|error| unsafe {
            libfvde_logical_volume_get_utf8_name(self.raw, buf.as_mut_ptr(), buf.len(), error)
        })
        .map_err(EngineError::Open)?;
        let name = CStr::from_bytes_until_nul(&buf)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&buf).into_owned());
        Ok(Some(name))
    }

    fn size(&self) -> EngineResult<u64> {
        let mut size = 0u64;
        // SAFETY: `size` is a valid out-pointer.
        fvde_call(|error| unsafe { libfvde_logical_volume_get_size(self.raw, &raw mut size, error) })
            .map_err(EngineError::Open)?;
        Ok(size)
    }

    fn is_locked(&self) -> EngineResult<bool> {
        // SAFETY: plain query on a live volume.
        let locked = fvde_call(|error| unsafe { libfvde_logical_volume_is_locked(self.raw, error) })
            .map_err(EngineError::Unlock)?;
        Ok(locked != 0)
    }

    fn set_key(&mut self, key: &[u8]) -> EngineResult<()> {
        // SAFETY: `key` is valid for `key.len()` bytes for the whole call.
        fvde_call(|error| unsafe {
            libfvde_logical_volume_set_key(self.raw, key.as_ptr(), key.len(), error)
        })
        .map_err(EngineError::Unlock)?;
        Ok(())
    }

    fn set_password(&mut self, password: &str) -> EngineResult<()> {
        // SAFETY: as in `set_key`.
        fvde_call(|error| unsafe {
            libfvde_logical_volume_set_utf8_password(
                self.raw,
                password.as_ptr(),
                password.len(),
                error,
            )
        })
        .map_err(EngineError::Unlock)?;
        Ok(())
    }

    fn set_recovery_password(&mut self, recovery_password: &str) -> EngineResult<()> {
        // SAFETY: as in `set_key`.
        fvde_call(|error| unsafe {
            libfvde_logical_volume_set_utf8_recovery_password(
                self.raw,
                recovery_password.as_ptr(),
                recovery_password.len(),
                error,
            )
        })
        .map_err(EngineError::Unlock)?;
        Ok(())
    }

    fn unlock(&mut self) -> EngineResult<UnlockOutcome> {
        // SAFETY: plain call on a live volume.
        let result = fvde_call(|error| unsafe { libfvde_logical_volume_unlock(self.raw, error) })
            .map_err(EngineError::Unlock)?;
        Ok(if result == 1 {
            UnlockOutcome::Unlocked
        } else {
            UnlockOutcome::Locked
        })
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> EngineResult<usize> {
        let Ok(raw_offset) = i64::try_from(offset) else {
            return Ok(0);
        };
        let mut error: *mut RawFvdeError = ptr::null_mut();
        // SAFETY: `buf` is writable for `buf.len()` bytes.
        let read = unsafe {
            libfvde_logical_volume_read_buffer_at_offset(
                self.raw,
                buf.as_mut_ptr().cast::<c_void>(),
                buf.len(),
                raw_offset,
                &raw mut error,
            )
        };
        if read >= 0 {
            return Ok(read.unsigned_abs());
        }
        let reason = fvde_error_message(error);
        if self.is_locked().unwrap_or(false) {
            return Err(EngineError::Locked);
        }
        Err(EngineError::Read { offset, reason })
    }
}

impl Drop for LibfvdeVolume {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            // SAFETY: the volume is exclusively owned and no longer used.
            let _ = fvde_call(|error| unsafe { libfvde_logical_volume_free(&raw mut self.raw, error) });
        }
    }
}

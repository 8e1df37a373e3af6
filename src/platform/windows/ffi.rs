use std::io;
use std::os::windows::io::{FromRawHandle, OwnedHandle};
use std::ptr;
use std::time::Duration;

use widestring::U16CString;
use windows_sys::Win32::Foundation::{
    ERROR_IO_PENDING, ERROR_NOT_FOUND, ERROR_OPERATION_ABORTED, HANDLE, INVALID_HANDLE_VALUE,
    WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadFile, WriteFile, FILE_CREATION_DISPOSITION, FILE_FLAGS_AND_ATTRIBUTES,
    FILE_SHARE_MODE,
};
use windows_sys::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

pub(crate) fn create_file(
    path: &str,
    access: u32,
    share: FILE_SHARE_MODE,
    disposition: FILE_CREATION_DISPOSITION,
    flags: FILE_FLAGS_AND_ATTRIBUTES,
) -> io::Result<OwnedHandle> {
    let path =
        U16CString::from_str(path).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let handle = unsafe {
        CreateFileW(
            path.as_ptr(),
            access,
            share,
            ptr::null(),
            disposition,
            flags,
            ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    unsafe { Ok(OwnedHandle::from_raw_handle(handle)) }
}

/// Auto-reset event, initially unsignaled.
pub(crate) fn create_event() -> io::Result<OwnedHandle> {
    let handle = unsafe { CreateEventW(ptr::null(), 0, 0, ptr::null()) };
    if handle.is_null() {
        return Err(io::Error::last_os_error());
    }
    unsafe { Ok(OwnedHandle::from_raw_handle(handle)) }
}

pub(crate) fn io_overlapped() -> OVERLAPPED {
    unsafe { std::mem::zeroed() }
}

/// `Ok(true)` when the call completed synchronously, `Ok(false)` when it is pending.
fn issued(ret: i32) -> io::Result<bool> {
    if ret != 0 {
        return Ok(true);
    }
    let e = io::Error::last_os_error();
    if e.raw_os_error() == Some(ERROR_IO_PENDING as i32) {
        Ok(false)
    } else {
        Err(e)
    }
}

/// # Safety
/// `buf` and `overlapped` must stay valid until the operation completes.
pub(crate) unsafe fn read_file(
    handle: HANDLE,
    overlapped: *mut OVERLAPPED,
    buf: *mut u8,
    len: u32,
) -> io::Result<bool> {
    issued(ReadFile(handle, buf, len, ptr::null_mut(), overlapped))
}

/// # Safety
/// `buf` and `overlapped` must stay valid until the operation completes.
pub(crate) unsafe fn write_file(
    handle: HANDLE,
    overlapped: *mut OVERLAPPED,
    buf: *const u8,
    len: u32,
) -> io::Result<bool> {
    issued(WriteFile(handle, buf, len, ptr::null_mut(), overlapped))
}

/// Bytes transferred, and whether the operation was cancelled.
pub(crate) fn get_overlapped_result(
    handle: HANDLE,
    overlapped: &OVERLAPPED,
    wait: bool,
) -> io::Result<(u32, bool)> {
    let mut transferred = 0;
    let ret =
        unsafe { GetOverlappedResult(handle, overlapped, &mut transferred, i32::from(wait)) };
    if ret != 0 {
        return Ok((transferred, false));
    }
    let e = io::Error::last_os_error();
    if e.raw_os_error() == Some(ERROR_OPERATION_ABORTED as i32) {
        Ok((transferred, true))
    } else {
        Err(e)
    }
}

/// `Ok(false)` when no operation was found to cancel.
pub(crate) fn cancel_io_overlapped(handle: HANDLE, overlapped: &OVERLAPPED) -> io::Result<bool> {
    if unsafe { CancelIoEx(handle, overlapped) } != 0 {
        return Ok(true);
    }
    let e = io::Error::last_os_error();
    if e.raw_os_error() == Some(ERROR_NOT_FOUND as i32) {
        Ok(false)
    } else {
        Err(e)
    }
}

/// `Ok(false)` when the timeout expired.
pub(crate) fn wait_for_single_object(handle: HANDLE, timeout: Duration) -> io::Result<bool> {
    let millis = timeout.as_millis().min(INFINITE as u128 - 1) as u32;
    match unsafe { WaitForSingleObject(handle, millis) } {
        WAIT_OBJECT_0 => Ok(true),
        WAIT_TIMEOUT => Ok(false),
        WAIT_FAILED => Err(io::Error::last_os_error()),
        other => Err(io::Error::other(format!(
            "WaitForSingleObject returned {other:#x}"
        ))),
    }
}

use std::io;
use std::os::windows::io::{AsRawHandle, OwnedHandle};
use std::time::Duration;

use windows_sys::Win32::Foundation::{GENERIC_READ, GENERIC_WRITE};
use windows_sys::Win32::Storage::FileSystem::{
    FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::IO::OVERLAPPED;

use crate::overlapped::{CancelStatus, Issue, OverlappedFile, Transfer, WaitStatus};
use crate::platform::windows::ffi;
use crate::poll::Source;

/// A device handle opened for overlapped I/O.
pub struct Win32File {
    handle: OwnedHandle,
}

impl Win32File {
    pub fn open(path: &str) -> io::Result<Self> {
        let handle = ffi::create_file(
            path,
            GENERIC_READ | GENERIC_WRITE,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            OPEN_EXISTING,
            FILE_FLAG_OVERLAPPED,
        )?;
        Ok(Self { handle })
    }
}

/// Control block of one direction, with its auto-reset completion event.
pub struct Win32Op {
    overlapped: Box<OVERLAPPED>,
    event: OwnedHandle,
}

// The OVERLAPPED only carries the event handle owned alongside it.
unsafe impl Send for Win32Op {}

impl Win32Op {
    /// Zeroes the control block for a new operation.
    fn rearm(&mut self) -> *mut OVERLAPPED {
        *self.overlapped = ffi::io_overlapped();
        self.overlapped.hEvent = self.event.as_raw_handle();
        &mut *self.overlapped
    }
}

fn len_u32(len: usize) -> u32 {
    len.min(u32::MAX as usize) as u32
}

impl OverlappedFile for Win32File {
    type Op = Win32Op;

    fn new_op(&self) -> io::Result<Win32Op> {
        let event = ffi::create_event()?;
        let mut overlapped = Box::new(ffi::io_overlapped());
        overlapped.hEvent = event.as_raw_handle();
        Ok(Win32Op { overlapped, event })
    }
    fn source(&self, op: &Win32Op) -> Source {
        Source::from_raw(op.event.as_raw_handle() as isize)
    }
    unsafe fn start_read(&self, op: &mut Win32Op, buf: *mut u8, len: usize) -> io::Result<Issue> {
        let overlapped = op.rearm();
        if !ffi::read_file(self.handle.as_raw_handle(), overlapped, buf, len_u32(len))? {
            return Ok(Issue::Pending);
        }
        let (n, _) = ffi::get_overlapped_result(self.handle.as_raw_handle(), &op.overlapped, false)?;
        Ok(Issue::Complete(n as usize))
    }
    unsafe fn start_write(
        &self,
        op: &mut Win32Op,
        buf: *const u8,
        len: usize,
    ) -> io::Result<Issue> {
        let overlapped = op.rearm();
        if !ffi::write_file(self.handle.as_raw_handle(), overlapped, buf, len_u32(len))? {
            return Ok(Issue::Pending);
        }
        let (n, _) = ffi::get_overlapped_result(self.handle.as_raw_handle(), &op.overlapped, false)?;
        Ok(Issue::Complete(n as usize))
    }
    fn wait(&self, op: &Win32Op, timeout: Duration) -> io::Result<WaitStatus> {
        if ffi::wait_for_single_object(op.event.as_raw_handle(), timeout)? {
            Ok(WaitStatus::Signaled)
        } else {
            Ok(WaitStatus::TimedOut)
        }
    }
    fn result(&self, op: &Win32Op, block: bool) -> io::Result<Transfer> {
        let (n, aborted) =
            ffi::get_overlapped_result(self.handle.as_raw_handle(), &op.overlapped, block)?;
        if aborted {
            Ok(Transfer::Aborted(n as usize))
        } else {
            Ok(Transfer::Done(n as usize))
        }
    }
    fn cancel(&self, op: &Win32Op) -> io::Result<CancelStatus> {
        if ffi::cancel_io_overlapped(self.handle.as_raw_handle(), &op.overlapped)? {
            Ok(CancelStatus::Requested)
        } else {
            Ok(CancelStatus::NotFound)
        }
    }
}

/*!
# Overlapped transport

Device I/O over an overlapped (completion based) backend. An operation is
issued against a per-direction control block; it either completes at once or
stays pending until its completion resource is signaled.

The state machine is platform independent and talks to the OS through
[`OverlappedFile`]. On Windows the backend is `Win32File`
(`ReadFile`/`WriteFile`/`GetOverlappedResult`/`CancelIoEx` on a handle
opened with `FILE_FLAG_OVERLAPPED`).

Reads and writes have independent state:

- reads go through one staging buffer, filled either by a timeout-bound
  [`read_timeout`](crate::Device::read_timeout) or by the read pump once the
  device is registered;
- writes go through a queue of at most [`WRITE_QUEUE_DEPTH`] entries whose
  head is the write in flight.

No buffer is released while an operation may still target it: every path
that gives up on an operation cancels it and waits for the cancellation to be
acknowledged first.
*/

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scopeguard::ScopeGuard;

use crate::device::{DeviceType, Transport, WriteStatus};
use crate::error::{Direction, Error, Result};
use crate::poll::{Bridge, DeviceHandler, HandlerSlot, Interest, Poller, Registration, Source};
use crate::report::{pad_report, strip_report_id};

mod pump;
mod queue;

pub use queue::WRITE_QUEUE_DEPTH;
use queue::WriteQueue;

/// Outcome of issuing an operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Issue {
    /// Completed synchronously, transferring this many bytes.
    Complete(usize),
    /// In flight; the completion resource is signaled when it finishes.
    Pending,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

/// Result of a finished operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transfer {
    Done(usize),
    /// Cancelled; the count is what was transferred before cancellation landed.
    Aborted(usize),
}

impl Transfer {
    pub fn len(self) -> usize {
        match self {
            Transfer::Done(n) | Transfer::Aborted(n) => n,
        }
    }
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }
    fn completed(self) -> io::Result<usize> {
        match self {
            Transfer::Done(n) => Ok(n),
            Transfer::Aborted(_) => Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "operation aborted",
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelStatus {
    /// Cancellation was requested; wait for the result to observe it.
    Requested,
    /// Nothing was in flight.
    NotFound,
}

/// OS primitives for overlapped I/O on an open file.
///
/// Each direction owns one [`OverlappedFile::Op`] (the control block and its
/// completion resource). At most one operation is in flight per `Op`.
pub trait OverlappedFile: Send + Sync + 'static {
    type Op: Send + 'static;

    /// Creates a control block with its own completion resource.
    fn new_op(&self) -> io::Result<Self::Op>;
    /// The completion resource of `op`, as registered with a poller.
    fn source(&self, op: &Self::Op) -> Source;
    /// Starts reading up to `len` bytes into `buf`.
    ///
    /// # Safety
    /// `buf` must be valid for `len` bytes until the operation is observed
    /// finished through [`result`](Self::result).
    unsafe fn start_read(&self, op: &mut Self::Op, buf: *mut u8, len: usize) -> io::Result<Issue>;
    /// Starts writing `len` bytes from `buf`.
    ///
    /// # Safety
    /// Same contract as [`start_read`](Self::start_read).
    unsafe fn start_write(
        &self,
        op: &mut Self::Op,
        buf: *const u8,
        len: usize,
    ) -> io::Result<Issue>;
    /// Waits until the completion resource of `op` is signaled.
    fn wait(&self, op: &Self::Op, timeout: Duration) -> io::Result<WaitStatus>;
    /// Result of the last operation on `op`; with `block` set, waits for it to finish.
    ///
    /// Without `block`, an operation still in flight is an error.
    fn result(&self, op: &Self::Op, block: bool) -> io::Result<Transfer>;
    /// Requests cancellation of the operation in flight on `op`.
    fn cancel(&self, op: &Self::Op) -> io::Result<CancelStatus>;
}

pub(crate) struct ReadState<Op> {
    op: Op,
    device_type: DeviceType,
    /// Staging buffer, never shrunk.
    buf: Vec<u8>,
    /// Bytes requested per read.
    count: usize,
    /// Length of the read in flight, which `count` may no longer match.
    issued: usize,
    /// Bytes of a completed read not yet delivered.
    bread: usize,
    pending: bool,
}

impl<Op> ReadState<Op> {
    fn check_endpoint(&self) -> Result<()> {
        if self.device_type == DeviceType::Hid && self.count == 0 {
            log::error!("the HID device has no IN endpoint");
            return Err(Error::NoEndpoint(Direction::In));
        }
        Ok(())
    }
}

pub(crate) struct WriteState<Op> {
    op: Op,
    device_type: DeviceType,
    queue: WriteQueue,
    /// Fixed report length, 0 when writes are not padded.
    size: usize,
    pending: bool,
}

impl<Op> WriteState<Op> {
    fn check_endpoint(&self) -> Result<()> {
        if self.device_type == DeviceType::Hid && self.size == 0 {
            log::error!("the HID device has no OUT endpoint");
            return Err(Error::NoEndpoint(Direction::Out));
        }
        Ok(())
    }
}

/// Device internals reachable from poller notifications.
pub(crate) struct Shared<F: OverlappedFile> {
    file: F,
    read: Mutex<ReadState<F::Op>>,
    write: Mutex<WriteState<F::Op>>,
    handler: HandlerSlot,
    /// Set by `close`; no read is issued afterwards.
    closed: AtomicBool,
    read_source: Source,
    write_source: Source,
}

impl<F: OverlappedFile> Shared<F> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
    /// Issues a read of `count` bytes into the staging buffer.
    fn start_read(&self, read: &mut ReadState<F::Op>) -> io::Result<Issue> {
        let count = read.count;
        read.buf[..count].fill(0);
        let buf = read.buf.as_mut_ptr();
        // SAFETY: the staging buffer is only resized while no read is pending,
        // and is dropped after `close` cancelled the read.
        let issue = unsafe { self.file.start_read(&mut read.op, buf, count) };
        read.issued = count;
        match issue {
            Ok(Issue::Complete(n)) => read.bread = n.min(count),
            Ok(Issue::Pending) => read.pending = true,
            Err(ref e) => log::error!("ReadFile failed with error: {e}"),
        }
        issue
    }
    /// Issues the write at the head of the queue.
    fn start_write(&self, write: &mut WriteState<F::Op>) -> io::Result<Issue> {
        let Some(report) = write.queue.front() else {
            return Ok(Issue::Complete(0));
        };
        let (buf, len) = (report.as_ptr(), report.len());
        // SAFETY: the head entry stays in the queue until its completion is
        // observed or it is cancelled in `close`.
        let issue = unsafe { self.file.start_write(&mut write.op, buf, len) };
        match issue {
            Ok(Issue::Pending) => write.pending = true,
            Ok(Issue::Complete(_)) => {}
            Err(ref e) => log::error!("WriteFile failed with error: {e}"),
        }
        issue
    }
}

/// Waits for the operation in flight on `op` for at most `timeout`.
///
/// On expiry the operation is cancelled and the cancellation awaited; the
/// returned flag tells whether that happened. Returns with nothing in flight.
fn await_transfer<F: OverlappedFile>(
    file: &F,
    op: &F::Op,
    timeout: Duration,
) -> Result<(usize, bool)> {
    match file.wait(op, timeout) {
        Ok(WaitStatus::Signaled) => match file.result(op, false) {
            Ok(transfer) => Ok((transfer.len(), false)),
            Err(e) => {
                log::error!("GetOverlappedResult failed with error: {e}");
                Err(Error::Io(e))
            }
        },
        Ok(WaitStatus::TimedOut) => {
            if let Err(e) = file.cancel(op) {
                log::error!("CancelIoEx failed with error: {e}");
                // The transfer may still target the buffer.
                if let Err(e) = file.result(op, true) {
                    log::error!("GetOverlappedResult failed with error: {e}");
                }
                return Err(Error::Cancel(e));
            }
            match file.result(op, true) {
                Ok(transfer) => Ok((transfer.len(), true)),
                Err(e) => {
                    log::error!("GetOverlappedResult failed with error: {e}");
                    Err(Error::Io(e))
                }
            }
        }
        Err(e) => {
            log::error!("WaitForSingleObject failed with error: {e}");
            cancel_and_wait(file, op);
            Err(Error::Wait(e))
        }
    }
}

/// Cancels whatever is in flight on `op` and blocks until it is acknowledged.
///
/// Failures are logged only.
fn cancel_and_wait<F: OverlappedFile>(file: &F, op: &F::Op) {
    match file.cancel(op) {
        Ok(CancelStatus::NotFound) => return,
        Ok(CancelStatus::Requested) => {}
        Err(e) => log::error!("{}", Error::Cancel(e)),
    }
    if let Err(e) = file.result(op, true) {
        log::error!("GetOverlappedResult failed with error: {e}");
    }
}

/// Transport over an [`OverlappedFile`].
pub struct OverlappedTransport<F: OverlappedFile> {
    shared: Arc<Shared<F>>,
    registration: Option<Registration>,
}

impl<F: OverlappedFile> OverlappedTransport<F> {
    pub fn new(file: F) -> io::Result<Self> {
        let read_op = file.new_op()?;
        let write_op = file.new_op()?;
        let read_source = file.source(&read_op);
        let write_source = file.source(&write_op);
        let shared = Shared {
            file,
            read: Mutex::new(ReadState {
                op: read_op,
                device_type: DeviceType::default(),
                buf: Vec::new(),
                count: 0,
                issued: 0,
                bread: 0,
                pending: false,
            }),
            write: Mutex::new(WriteState {
                op: write_op,
                device_type: DeviceType::default(),
                queue: WriteQueue::default(),
                size: 0,
                pending: false,
            }),
            handler: HandlerSlot::default(),
            closed: AtomicBool::new(false),
            read_source,
            write_source,
        };
        Ok(Self {
            shared: Arc::new(shared),
            registration: None,
        })
    }
    /// The backend file.
    pub fn file(&self) -> &F {
        &self.shared.file
    }
    /// Completion resource signaled by writes.
    pub fn write_source(&self) -> Source {
        self.shared.write_source
    }
    fn has_pending(&self) -> bool {
        self.shared.read.lock().unwrap().pending || self.shared.write.lock().unwrap().pending
    }
}

impl<F: OverlappedFile> Transport for OverlappedTransport<F> {
    fn source(&self) -> Source {
        self.shared.read_source
    }
    fn device_type(&self) -> DeviceType {
        self.shared.read.lock().unwrap().device_type
    }
    fn set_device_type(&mut self, device_type: DeviceType) {
        self.shared.read.lock().unwrap().device_type = device_type;
        self.shared.write.lock().unwrap().device_type = device_type;
    }
    fn set_read_size(&mut self, size: usize) -> Result<()> {
        let mut read = self.shared.read.lock().unwrap();
        if size > read.buf.len() {
            if read.pending {
                return Err(Error::Busy);
            }
            let additional = size - read.buf.len();
            if read.buf.try_reserve_exact(additional).is_err() {
                log::error!("failed to grow the read buffer to {size} bytes");
                return Err(Error::Alloc(size));
            }
            read.buf.resize(size, 0);
        }
        read.count = size;
        Ok(())
    }
    fn set_write_size(&mut self, size: usize) -> Result<()> {
        self.shared.write.lock().unwrap().size = size;
        Ok(())
    }
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let shared = &*self.shared;
        let mut guard = shared.read.lock().unwrap();
        let read = &mut *guard;
        read.check_endpoint()?;
        if read.pending {
            return Err(Error::Busy);
        }
        buf.fill(0);
        let hid = read.device_type == DeviceType::Hid;
        let (dest, len) = if hid {
            read.buf[..read.count].fill(0);
            (read.buf.as_mut_ptr(), read.count)
        } else {
            (buf.as_mut_ptr(), buf.len())
        };
        // SAFETY: both buffers outlive this call and `await_transfer` returns
        // with nothing in flight.
        let issue = unsafe { shared.file.start_read(&mut read.op, dest, len) };
        let transferred = match issue {
            Ok(Issue::Complete(n)) => n,
            Ok(Issue::Pending) => {
                let (n, timed_out) = await_transfer(&shared.file, &read.op, timeout)?;
                if timed_out && n != len {
                    log::debug!("ReadFile failed: timeout expired");
                }
                n
            }
            Err(e) => {
                log::error!("ReadFile failed with error: {e}");
                return Err(Error::Io(e));
            }
        }
        .min(len);
        if !hid {
            return Ok(transferred);
        }
        let report = strip_report_id(&read.buf[..transferred]);
        let length = report.len().min(buf.len());
        buf[..length].copy_from_slice(&report[..length]);
        Ok(length)
    }
    fn write_timeout(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        let shared = &*self.shared;
        let mut guard = shared.write.lock().unwrap();
        let write = &mut *guard;
        write.check_endpoint()?;
        if write.pending || !write.queue.is_empty() {
            return Err(Error::Busy);
        }
        let report = pad_report(buf, write.size);
        // SAFETY: `report` outlives this call and `await_transfer` returns
        // with nothing in flight.
        let issue = unsafe {
            shared
                .file
                .start_write(&mut write.op, report.as_ptr(), report.len())
        };
        match issue {
            Ok(Issue::Complete(n)) => Ok(n),
            Ok(Issue::Pending) => {
                let (n, timed_out) = await_transfer(&shared.file, &write.op, timeout)?;
                if timed_out && n != report.len() {
                    // the write may still have succeeded
                    log::error!(
                        "WriteFile failed: timeout expired, {}",
                        Error::ShortTransfer {
                            transferred: n,
                            requested: report.len()
                        }
                    );
                }
                Ok(n)
            }
            Err(e) => {
                log::error!("WriteFile failed with error: {e}");
                Err(Error::Io(e))
            }
        }
    }
    fn write(&self, buf: &[u8]) -> Result<WriteStatus> {
        let shared = &*self.shared;
        let mut write = shared.write.lock().unwrap();
        write.check_endpoint()?;
        let report = pad_report(buf, write.size);
        let ahead = write.queue.push(report).inspect_err(|_| {
            log::error!("no space left in write queue");
        })?;
        if ahead > 0 {
            // issued once the writes ahead complete
            return Ok(WriteStatus::Pending);
        }
        match shared.start_write(&mut write) {
            Ok(Issue::Pending) => Ok(WriteStatus::Pending),
            Ok(Issue::Complete(n)) => {
                let requested = write.queue.pop().map_or(0, |report| report.len());
                if n < requested {
                    log::warn!(
                        "{}",
                        Error::ShortTransfer {
                            transferred: n,
                            requested
                        }
                    );
                }
                Ok(WriteStatus::Written(n))
            }
            Err(e) => {
                write.queue.pop();
                Err(Error::Io(e))
            }
        }
    }
    fn register(
        &mut self,
        poller: Arc<dyn Poller>,
        handler: Box<dyn DeviceHandler>,
    ) -> Result<()> {
        if let Some(registration) = self.registration.take() {
            registration.remove();
        }
        let shared = &self.shared;
        let read_source = shared.read_source;
        let write_source = shared.write_source;
        shared.handler.bind(handler);
        let bound = scopeguard::guard(&shared.handler, |handler| {
            handler.unbind();
        });
        poller
            .register(
                read_source,
                Interest::Readable,
                Box::new(Bridge::readable(
                    shared,
                    pump::on_read_complete::<F>,
                    pump::on_close::<F>,
                )),
            )
            .map_err(|e| {
                log::error!("failed to register the read event: {e}");
                Error::Register(e)
            })?;
        let read_registered = scopeguard::guard(read_source, |source| poller.remove(source));
        poller
            .register(
                write_source,
                Interest::Writable,
                Box::new(Bridge::writable(
                    shared,
                    pump::on_write_complete::<F>,
                    pump::on_close::<F>,
                )),
            )
            .map_err(|e| {
                log::error!("failed to register the write event: {e}");
                Error::Register(e)
            })?;
        let read_source = ScopeGuard::into_inner(read_registered);
        ScopeGuard::into_inner(bound);
        self.registration = Some(Registration::new(
            poller.clone(),
            vec![read_source, write_source],
        ));
        pump::pump(shared);
        Ok(())
    }
    fn close(&mut self) {
        let shared = &*self.shared;
        shared.closed.store(true, Ordering::Release);
        shared.handler.unbind();
        {
            let mut read = shared.read.lock().unwrap();
            cancel_and_wait(&shared.file, &read.op);
            read.pending = false;
            read.bread = 0;
        }
        {
            let mut write = shared.write.lock().unwrap();
            cancel_and_wait(&shared.file, &write.op);
            write.pending = false;
            write.queue.clear();
        }
        if let Some(registration) = self.registration.take() {
            registration.remove();
        }
    }
}

impl<F: OverlappedFile> Drop for OverlappedTransport<F> {
    fn drop(&mut self) {
        // no buffer is freed under a pending operation
        if self.registration.is_some() || self.has_pending() {
            self.close();
        }
    }
}

use std::io;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::device::{DeviceType, Transport, WriteStatus};
use crate::error::{duplicate, Direction, Error, Result};
use crate::platform::unix::Fd;
use crate::poll::{Bridge, DeviceHandler, HandlerSlot, Interest, Poller, Registration, Source};
use crate::report::pad_report;

struct ReadBuffer {
    /// Never shrunk.
    buf: Vec<u8>,
    /// Bytes read per readiness notification.
    count: usize,
}

struct Shared {
    fd: Fd,
    read: Mutex<ReadBuffer>,
    handler: HandlerSlot,
}

/// Blocking transport over a non-blocking file descriptor.
///
/// Timeout-bound calls wait for readiness with `poll(2)`; once registered,
/// every readiness notification performs one read. Writes are always
/// synchronous, so `on_write` is never invoked.
pub(crate) struct BlockingTransport {
    shared: Arc<Shared>,
    device_type: DeviceType,
    write_size: usize,
    registration: Option<Registration>,
}

impl BlockingTransport {
    pub(crate) fn open(path: &str) -> io::Result<Self> {
        Ok(Self::from_fd(Fd::open(path)?))
    }
    fn from_fd(fd: Fd) -> Self {
        Self {
            shared: Arc::new(Shared {
                fd,
                read: Mutex::new(ReadBuffer {
                    buf: Vec::new(),
                    count: 0,
                }),
                handler: HandlerSlot::default(),
            }),
            device_type: DeviceType::default(),
            write_size: 0,
            registration: None,
        }
    }
    fn check_read_endpoint(&self) -> Result<()> {
        let count = self.shared.read.lock().unwrap().count;
        if self.device_type == DeviceType::Hid && count == 0 {
            log::error!("the HID device has no IN endpoint");
            return Err(Error::NoEndpoint(Direction::In));
        }
        Ok(())
    }
    fn check_write_endpoint(&self) -> Result<()> {
        if self.device_type == DeviceType::Hid && self.write_size == 0 {
            log::error!("the HID device has no OUT endpoint");
            return Err(Error::NoEndpoint(Direction::Out));
        }
        Ok(())
    }
}

/// Time left until `deadline`; `None` waits forever.
fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

/// Whether a readiness wait ended the transfer.
fn wait_ended(result: io::Result<()>) -> Option<bool> {
    match result {
        Ok(()) => Some(false),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Some(true),
        Err(e) => {
            log::error!("poll failed with error: {e}");
            Some(true)
        }
    }
}

/// Performs one read and delivers it.
///
/// End of stream is delivered as `on_close` and returned as an error so the
/// poller stops dispatching.
fn on_readable(shared: &Shared) -> io::Result<()> {
    let result = {
        let mut read = shared.read.lock().unwrap();
        let count = read.count;
        if count == 0 {
            log::trace!("read size is 0, readiness ignored");
            return Ok(());
        }
        let result = shared.fd.read(&mut read.buf[..count]);
        result.map(|n| read.buf[..n].to_vec())
    };
    match result {
        Ok(report) if report.is_empty() => {
            log::debug!("end of stream");
            shared.handler.with(|handler| handler.on_close());
            Err(io::Error::from(io::ErrorKind::UnexpectedEof))
        }
        Ok(report) => {
            shared.handler.with(|handler| handler.on_read(Ok(&report)));
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => {
            log::error!("read failed with error: {e}");
            let status = duplicate(&e);
            shared
                .handler
                .with(|handler| handler.on_read(Err(Error::Io(e))));
            Err(status)
        }
    }
}

fn on_close(shared: &Shared) -> io::Result<()> {
    shared.handler.with(|handler| handler.on_close());
    Ok(())
}

impl Transport for BlockingTransport {
    fn source(&self) -> Source {
        Source::from_raw(self.shared.fd.as_raw_fd() as isize)
    }
    fn device_type(&self) -> DeviceType {
        self.device_type
    }
    fn set_device_type(&mut self, device_type: DeviceType) {
        self.device_type = device_type;
    }
    fn set_read_size(&mut self, size: usize) -> Result<()> {
        let mut read = self.shared.read.lock().unwrap();
        if size > read.buf.len() {
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
        self.write_size = size;
        Ok(())
    }
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.check_read_endpoint()?;
        let fd = &self.shared.fd;
        let deadline = Instant::now().checked_add(timeout);
        let mut bread = 0;
        while bread < buf.len() {
            match wait_ended(fd.wait_readable(remaining(deadline))) {
                None => continue,
                Some(true) => break,
                Some(false) => {}
            }
            match fd.read(&mut buf[bread..]) {
                Ok(0) => {
                    log::debug!("end of stream after {bread} bytes");
                    break;
                }
                Ok(n) => bread += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("read failed with error: {e}");
                    break;
                }
            }
            if expired(deadline) {
                break;
            }
        }
        if bread < buf.len() {
            log::debug!("read timeout expired after {bread} of {} bytes", buf.len());
        }
        Ok(bread)
    }
    fn write_timeout(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        self.check_write_endpoint()?;
        let fd = &self.shared.fd;
        let report = pad_report(buf, self.write_size);
        let deadline = Instant::now().checked_add(timeout);
        let mut bwritten = 0;
        while bwritten < report.len() {
            match wait_ended(fd.wait_writable(remaining(deadline))) {
                None => continue,
                Some(true) => break,
                Some(false) => {}
            }
            match fd.write(&report[bwritten..]) {
                Ok(n) => bwritten += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::error!("write failed with error: {e}");
                    break;
                }
            }
            if expired(deadline) {
                break;
            }
        }
        if bwritten < report.len() {
            log::debug!(
                "write timeout expired, {}",
                Error::ShortTransfer {
                    transferred: bwritten,
                    requested: report.len()
                }
            );
        }
        Ok(bwritten)
    }
    fn write(&self, buf: &[u8]) -> Result<WriteStatus> {
        self.check_write_endpoint()?;
        let report = pad_report(buf, self.write_size);
        match self.shared.fd.write(&report) {
            Ok(n) => {
                if n < report.len() {
                    log::warn!(
                        "{}",
                        Error::ShortTransfer {
                            transferred: n,
                            requested: report.len()
                        }
                    );
                }
                Ok(WriteStatus::Written(n))
            }
            Err(e) => {
                log::error!("write failed with error: {e}");
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
        let source = self.source();
        if self.shared.read.lock().unwrap().count == 0 {
            log::error!("read size is 0, readiness notifications are ignored");
        }
        self.shared.handler.bind(handler);
        let bridge = Bridge::readable(&self.shared, on_readable, on_close);
        if let Err(e) = poller.register(source, Interest::Readable, Box::new(bridge)) {
            log::error!("failed to register {source:?}: {e}");
            self.shared.handler.unbind();
            return Err(Error::Register(e));
        }
        self.registration = Some(Registration::new(poller, vec![source]));
        Ok(())
    }
    fn close(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.remove();
        }
        self.shared.handler.unbind();
    }
}

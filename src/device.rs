use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::poll::{DeviceHandler, Poller, Source};
use crate::registry::Reservation;

/// Kind of device behind a path.
///
/// HID devices exchange fixed-size reports that may carry a leading null
/// report ID; serial devices exchange raw byte streams.
#[derive(Clone, Copy, Default, Debug, Eq, PartialEq)]
pub enum DeviceType {
    #[default]
    Serial,
    Hid,
}

/// Outcome of a non-blocking [`Device::write`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteStatus {
    /// The write completed immediately with this many bytes.
    Written(usize),
    /// The write was accepted; its result is delivered to
    /// [`DeviceHandler::on_write`].
    Pending,
}

/// Common interface of the blocking and the overlapped transports.
///
/// Implementations own the platform handle and release it in [`Transport::close`],
/// which is called exactly once.
pub trait Transport: Send {
    /// The resource identifying the device to a poller.
    fn source(&self) -> Source;
    fn device_type(&self) -> DeviceType;
    fn set_device_type(&mut self, device_type: DeviceType);
    /// Grows the read buffer to `size` bytes and reads `size` bytes per request.
    fn set_read_size(&mut self, size: usize) -> Result<()>;
    /// Pads every write shorter than `size` with zeros.
    fn set_write_size(&mut self, size: usize) -> Result<()>;
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
    fn write_timeout(&self, buf: &[u8], timeout: Duration) -> Result<usize>;
    fn write(&self, buf: &[u8]) -> Result<WriteStatus>;
    fn register(&mut self, poller: Arc<dyn Poller>, handler: Box<dyn DeviceHandler>)
        -> Result<()>;
    fn close(&mut self);
}

/// An open serial or HID device.
///
/// Created by [`DeviceRegistry::open`](crate::DeviceRegistry::open) or
/// [`DeviceBuilder`](crate::DeviceBuilder). Dropping the device closes it.
pub struct Device {
    transport: Box<dyn Transport>,
    closed: bool,
    private: Option<Box<dyn Any + Send>>,
    // Dropped after the transport is closed, so the path is only released
    // once the handle is gone.
    reservation: Reservation,
}

impl Device {
    pub(crate) fn new(transport: Box<dyn Transport>, reservation: Reservation) -> Self {
        Self {
            transport,
            closed: false,
            private: None,
            reservation,
        }
    }
    fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
    fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }
    /// The path the device was opened with.
    pub fn path(&self) -> &str {
        self.reservation.path()
    }
    /// The resource a poller watches for this device.
    ///
    /// This is the file descriptor on unix. For the overlapped transport it is
    /// the read completion event.
    pub fn source(&self) -> Source {
        self.transport().source()
    }
    pub fn device_type(&self) -> DeviceType {
        self.transport().device_type()
    }
    pub fn set_device_type(&mut self, device_type: DeviceType) {
        self.transport_mut().set_device_type(device_type)
    }
    /// Sets the number of bytes requested per read.
    ///
    /// The internal buffer only ever grows; a smaller size keeps the larger
    /// allocation and just requests fewer bytes.
    pub fn set_read_size(&mut self, size: usize) -> Result<()> {
        self.transport_mut().set_read_size(size)
    }
    /// Sets the fixed report size; shorter writes are zero-padded up to it.
    pub fn set_write_size(&mut self, size: usize) -> Result<()> {
        self.transport_mut().set_write_size(size)
    }
    /// Reads up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns the number of bytes read, which is fewer than requested when
    /// the timeout expires. The caller must compare it against `buf.len()`.
    pub fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.transport().read_timeout(buf, timeout)
    }
    /// Writes `buf`, waiting at most `timeout`.
    ///
    /// A timeout is not an error: the number of bytes known to be written is returned.
    pub fn write_timeout(&self, buf: &[u8], timeout: Duration) -> Result<usize> {
        self.transport().write_timeout(buf, timeout)
    }
    /// Starts a write without blocking.
    pub fn write(&self, buf: &[u8]) -> Result<WriteStatus> {
        self.transport().write(buf)
    }
    /// Binds `handler` and registers the device with `poller`.
    ///
    /// From then on reads are pumped continuously and delivered to
    /// [`DeviceHandler::on_read`]; pending writes complete through
    /// [`DeviceHandler::on_write`].
    pub fn register<H: DeviceHandler + 'static>(
        &mut self,
        poller: Arc<dyn Poller>,
        handler: H,
    ) -> Result<()> {
        self.transport_mut().register(poller, Box::new(handler))
    }
    /// Attaches caller data to the device, replacing any previous value.
    pub fn set_private<T: Any + Send>(&mut self, data: T) {
        self.private = Some(Box::new(data));
    }
    pub fn private<T: Any + Send>(&self) -> Option<&T> {
        self.private.as_ref()?.downcast_ref()
    }
    pub fn private_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.private.as_mut()?.downcast_mut()
    }
    pub fn take_private<T: Any + Send>(&mut self) -> Option<T> {
        let data = self.private.take()?;
        match data.downcast::<T>() {
            Ok(data) => Some(*data),
            Err(data) => {
                self.private = Some(data);
                None
            }
        }
    }
    /// Cancels in-flight operations, waits for them, and releases the device.
    pub fn close(mut self) {
        self.shutdown();
    }
    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close();
            log::debug!("{}: closed", self.path());
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("path", &self.path())
            .field("source", &self.source())
            .field("device_type", &self.device_type())
            .finish()
    }
}

/*!
# Event registration bridge

Devices never run their own event loop. A host program owns a polling
mechanism, implements [`Poller`] for it, and passes it to
[`Device::register`](crate::Device::register). The device registers its
completion resources with that poller, handing over [`SourceHandler`]
adapters. When the host observes a signaled resource it calls the adapter,
which drives the device state machine and finally reaches the caller's
[`DeviceHandler`].

Adapters only keep a weak reference to the device internals, so a
notification dispatched after the device has been closed is dropped.
*/

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, Weak};

use crate::error::Result;

/// Opaque completion resource: a file descriptor on unix, an event handle on Windows.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Source(isize);

impl Source {
    pub const fn from_raw(raw: isize) -> Self {
        Source(raw)
    }
    pub const fn as_raw(self) -> isize {
        self.0
    }
    #[cfg(unix)]
    pub fn as_raw_fd(self) -> std::os::fd::RawFd {
        self.0 as std::os::fd::RawFd
    }
    #[cfg(windows)]
    pub fn as_raw_handle(self) -> std::os::windows::io::RawHandle {
        self.0 as std::os::windows::io::RawHandle
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Source({:#x})", self.0)
    }
}

/// The notification a source is registered for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Interest {
    Readable,
    Writable,
}

/// External polling mechanism.
///
/// `register` hands the poller a handler to invoke whenever `source` signals;
/// `remove` drops it again. Both are called from the thread that owns the device.
pub trait Poller: Send + Sync {
    fn register(
        &self,
        source: Source,
        interest: Interest,
        handler: Box<dyn SourceHandler>,
    ) -> io::Result<()>;
    fn remove(&self, source: Source);
}

/// Callbacks a [`Poller`] invokes for a registered source.
///
/// An error return tells the poller the notification failed; what it does with
/// that (stop dispatching, close the source) is up to the host.
pub trait SourceHandler: Send + Sync {
    fn on_readable(&self) -> io::Result<()> {
        Ok(())
    }
    fn on_writable(&self) -> io::Result<()> {
        Ok(())
    }
    fn on_close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Caller-supplied device event handler.
///
/// The handler owns whatever context it needs; it replaces the usual
/// "user pointer plus function pointers" pair.
pub trait DeviceHandler: Send {
    /// A read completed. The slice is only valid for the duration of the call.
    fn on_read(&mut self, data: Result<&[u8]>);
    /// A write that was accepted as pending completed.
    fn on_write(&mut self, status: Result<usize>);
    /// The poller reported the device as closed or failed.
    fn on_close(&mut self);
}

type BoundHandler = Arc<Mutex<Box<dyn DeviceHandler>>>;

/// Holds the bound [`DeviceHandler`].
#[derive(Default)]
pub(crate) struct HandlerSlot(Mutex<Option<BoundHandler>>);

impl HandlerSlot {
    pub(crate) fn bind(&self, handler: Box<dyn DeviceHandler>) {
        self.0.lock().unwrap().replace(Arc::new(Mutex::new(handler)));
    }
    pub(crate) fn unbind(&self) {
        self.0.lock().unwrap().take();
    }
    /// Runs `f` with the handler, if one is bound.
    ///
    /// The slot itself is not locked while `f` runs: the handler may close or
    /// re-register its device, and once unbound it is not called again.
    pub(crate) fn with<F: FnOnce(&mut dyn DeviceHandler)>(&self, f: F) {
        let handler = self.0.lock().unwrap().clone();
        if let Some(handler) = handler {
            f(handler.lock().unwrap().as_mut());
        }
    }
}

type Notify<T> = fn(&T) -> io::Result<()>;

/// Adapter turning poller notifications into calls on device internals `T`.
pub(crate) struct Bridge<T> {
    target: Weak<T>,
    readable: Option<Notify<T>>,
    writable: Option<Notify<T>>,
    close: Notify<T>,
}

impl<T: Send + Sync + 'static> Bridge<T> {
    pub(crate) fn readable(target: &Arc<T>, on_readable: Notify<T>, on_close: Notify<T>) -> Self {
        Self {
            target: Arc::downgrade(target),
            readable: Some(on_readable),
            writable: None,
            close: on_close,
        }
    }
    pub(crate) fn writable(target: &Arc<T>, on_writable: Notify<T>, on_close: Notify<T>) -> Self {
        Self {
            target: Arc::downgrade(target),
            readable: None,
            writable: Some(on_writable),
            close: on_close,
        }
    }
    fn dispatch(&self, notify: Option<Notify<T>>) -> io::Result<()> {
        match (notify, self.target.upgrade()) {
            (Some(notify), Some(target)) => notify(&target),
            (_, None) => {
                log::trace!("notification for a closed device dropped");
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }
}

impl<T: Send + Sync + 'static> SourceHandler for Bridge<T> {
    fn on_readable(&self) -> io::Result<()> {
        self.dispatch(self.readable)
    }
    fn on_writable(&self) -> io::Result<()> {
        self.dispatch(self.writable)
    }
    fn on_close(&self) -> io::Result<()> {
        self.dispatch(Some(self.close))
    }
}

/// Sources a device registered, removed again at close.
pub(crate) struct Registration {
    poller: Arc<dyn Poller>,
    sources: Vec<Source>,
}

impl Registration {
    pub(crate) fn new(poller: Arc<dyn Poller>, sources: Vec<Source>) -> Self {
        Self { poller, sources }
    }
    pub(crate) fn remove(self) {
        for source in self.sources {
            self.poller.remove(source);
        }
    }
}

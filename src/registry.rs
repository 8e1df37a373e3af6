/*!
# Device registry

Tracks the paths of open devices so a path cannot be opened twice at the same
time. The registry is a plain value: create one with [`DeviceRegistry::new`]
and share it (clones refer to the same set) with whatever opens devices.

Devices keep only a weak back-reference. Closing or dropping a [`Device`]
releases its path; dropping the registry itself does not close anything.
*/

use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, Mutex, Weak};

use crate::builder::DeviceBuilder;
use crate::device::{Device, Transport};
use crate::error::{Error, Result};

/// Creates the transport for a path.
///
/// [`SystemBackend`] is used unless another backend is given to
/// [`DeviceRegistry::open_with`] or [`DeviceBuilder::open_with`].
pub trait Backend {
    fn open(&self, path: &str) -> io::Result<Box<dyn Transport>>;
}

impl<F> Backend for F
where
    F: Fn(&str) -> io::Result<Box<dyn Transport>>,
{
    fn open(&self, path: &str) -> io::Result<Box<dyn Transport>> {
        self(path)
    }
}

/// The platform transport: blocking file descriptor I/O on unix, overlapped
/// I/O on Windows.
#[derive(Clone, Copy, Default, Debug)]
pub struct SystemBackend;

impl Backend for SystemBackend {
    fn open(&self, path: &str) -> io::Result<Box<dyn Transport>> {
        crate::platform::open(path)
    }
}

#[derive(Clone, Default)]
pub struct DeviceRegistry {
    paths: Arc<Mutex<BTreeSet<String>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    /// Opens `path` with the platform transport.
    ///
    /// With `diagnostics` set, failures are logged at error level.
    pub fn open(&self, path: &str, diagnostics: bool) -> Result<Device> {
        DeviceBuilder::new().diagnostics(diagnostics).open(self, path)
    }
    /// Opens `path` with a custom transport backend.
    pub fn open_with<B: Backend + ?Sized>(
        &self,
        path: &str,
        diagnostics: bool,
        backend: &B,
    ) -> Result<Device> {
        DeviceBuilder::new()
            .diagnostics(diagnostics)
            .open_with(self, path, backend)
    }
    pub fn contains(&self, path: &str) -> bool {
        self.paths.lock().unwrap().contains(path)
    }
    /// Paths of the open devices, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().iter().cloned().collect()
    }
    pub fn len(&self) -> usize {
        self.paths.lock().unwrap().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Claims `path`, failing if it is already claimed.
    pub(crate) fn reserve(&self, path: &str) -> Result<Reservation> {
        let mut paths = self.paths.lock().unwrap();
        if !paths.insert(path.to_string()) {
            return Err(Error::AlreadyOpen(path.to_string()));
        }
        Ok(Reservation {
            paths: Arc::downgrade(&self.paths),
            path: path.to_string(),
        })
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.paths().iter()).finish()
    }
}

/// A claimed path; releases the claim when dropped.
pub(crate) struct Reservation {
    paths: Weak<Mutex<BTreeSet<String>>>,
    path: String,
}

impl Reservation {
    pub(crate) fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(paths) = self.paths.upgrade() {
            paths.lock().unwrap().remove(&self.path);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockBackend;

    #[test]
    fn second_open_of_a_path_fails() {
        let registry = DeviceRegistry::new();
        let backend = MockBackend::default();
        let device = registry.open_with("/dev/hidraw0", true, &backend).unwrap();
        assert_eq!("/dev/hidraw0", device.path());
        let err = registry
            .open_with("/dev/hidraw0", true, &backend)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyOpen(ref path) if path == "/dev/hidraw0"));
        assert_eq!(1, backend.opened());
        assert_eq!(vec!["/dev/hidraw0".to_string()], registry.paths());
    }

    #[test]
    fn close_releases_the_path() {
        let registry = DeviceRegistry::new();
        let backend = MockBackend::default();
        let device = registry.open_with("COM3", false, &backend).unwrap();
        let other = registry.open_with("COM4", false, &backend).unwrap();
        assert_eq!(2, registry.len());
        device.close();
        assert!(!registry.contains("COM3"));
        assert!(registry.contains("COM4"));
        drop(other);
        assert!(registry.is_empty());
        registry.open_with("COM3", false, &backend).unwrap();
    }

    #[test]
    fn failed_open_does_not_claim_the_path() {
        let registry = DeviceRegistry::new();
        let failing = |_: &str| -> io::Result<Box<dyn Transport>> {
            Err(io::Error::from(io::ErrorKind::NotFound))
        };
        let err = registry.open_with("COM9", true, &failing).unwrap_err();
        assert!(matches!(err, Error::OpenFailed { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn clones_share_the_same_set() {
        let registry = DeviceRegistry::new();
        let clone = registry.clone();
        let backend = MockBackend::default();
        let _device = registry.open_with("COM1", false, &backend).unwrap();
        assert!(clone.contains("COM1"));
        assert!(clone.open_with("COM1", false, &backend).is_err());
    }

    #[test]
    fn devices_outlive_the_registry() {
        let registry = DeviceRegistry::new();
        let device = registry
            .open_with("COM2", false, &MockBackend::default())
            .unwrap();
        drop(registry);
        assert_eq!("COM2", device.path());
        device.close();
    }
}

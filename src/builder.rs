/*!
# Device Builder Module

[`DeviceBuilder`] collects the options applied to a device right after it is
opened, so a caller does not have to sequence `set_device_type`,
`set_read_size` and `set_write_size` by hand.

```no_run
use async_dev::{DeviceBuilder, DeviceRegistry, DeviceType};

let registry = DeviceRegistry::new();
let device = DeviceBuilder::new()
    .device_type(DeviceType::Hid)
    .read_size(65)
    .write_size(65)
    .diagnostics(true)
    .open(&registry, "/dev/hidraw0")?;
# Ok::<(), async_dev::Error>(())
```
*/

use crate::device::{Device, DeviceType};
use crate::error::{Error, Result};
use crate::registry::{Backend, DeviceRegistry, SystemBackend};

/// Options applied to a freshly opened device.
#[derive(Clone, Default, Debug)]
pub(crate) struct DeviceConfig {
    /// Log open failures at error level instead of debug level.
    pub(crate) diagnostics: bool,
    pub(crate) device_type: Option<DeviceType>,
    /// Bytes requested per read; also the read buffer size.
    pub(crate) read_size: Option<usize>,
    /// Fixed report length for writes.
    pub(crate) write_size: Option<usize>,
}

/// Builder for opening a [`Device`].
#[derive(Clone, Default, Debug)]
pub struct DeviceBuilder {
    config: DeviceConfig,
}

impl DeviceBuilder {
    pub fn new() -> Self {
        Self::default()
    }
    /// Logs open failures at error level. Off by default.
    pub fn diagnostics(mut self, diagnostics: bool) -> Self {
        self.config.diagnostics = diagnostics;
        self
    }
    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.config.device_type = Some(device_type);
        self
    }
    pub fn read_size(mut self, size: usize) -> Self {
        self.config.read_size = Some(size);
        self
    }
    pub fn write_size(mut self, size: usize) -> Self {
        self.config.write_size = Some(size);
        self
    }
    /// Opens `path` with the platform transport and applies the options.
    pub fn open(self, registry: &DeviceRegistry, path: &str) -> Result<Device> {
        self.open_with(registry, path, &SystemBackend)
    }
    /// Opens `path` with `backend` and applies the options.
    pub fn open_with<B: Backend + ?Sized>(
        self,
        registry: &DeviceRegistry,
        path: &str,
        backend: &B,
    ) -> Result<Device> {
        let config = self.config;
        let reservation = match registry.reserve(path) {
            Ok(reservation) => reservation,
            Err(e) => {
                if config.diagnostics {
                    log::error!("{path}: device already opened");
                }
                return Err(e);
            }
        };
        let transport = match backend.open(path) {
            Ok(transport) => transport,
            Err(source) => {
                if config.diagnostics {
                    log::error!("{path}: open failed with error: {source}");
                } else {
                    log::debug!("{path}: open failed with error: {source}");
                }
                return Err(Error::OpenFailed {
                    path: path.to_string(),
                    source,
                });
            }
        };
        let mut device = Device::new(transport, reservation);
        Self::config(&config, &mut device)?;
        Ok(device)
    }
    fn config(config: &DeviceConfig, device: &mut Device) -> Result<()> {
        if let Some(device_type) = config.device_type {
            device.set_device_type(device_type);
        }
        if let Some(size) = config.read_size {
            device.set_read_size(size)?;
        }
        if let Some(size) = config.write_size {
            device.set_write_size(size)?;
        }
        Ok(())
    }
}

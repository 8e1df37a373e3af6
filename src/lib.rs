#![cfg_attr(docsrs, feature(doc_cfg))]

/*!
# async-dev: Cross-platform serial and HID device I/O

Opens serial ports and HID devices by path and exposes one API over two very
different I/O models: blocking descriptor reads and writes with a timeout on
unix, and overlapped (completion based) I/O on Windows. Devices plug into an
event loop owned by the caller instead of running their own.

## Features

- **Path registry**: a [`DeviceRegistry`] refuses to open the same path twice
- **Timeout-bound I/O**: [`Device::read_timeout`] and [`Device::write_timeout`]
  return the bytes transferred when the timeout expires instead of failing
- **Non-blocking writes**: [`Device::write`] queues up to
  [`WRITE_QUEUE_DEPTH`] reports and reports completions through a handler
- **Read pump**: once registered, reads are kept in flight continuously and
  every report is delivered to [`DeviceHandler::on_read`]
- **HID reports**: a leading null report ID is stripped from reads, and writes
  are zero-padded to the configured report size

## Quick Start

```no_run
use async_dev::{DeviceBuilder, DeviceRegistry, DeviceType};
use std::time::Duration;

let registry = DeviceRegistry::new();
let device = DeviceBuilder::new()
    .device_type(DeviceType::Hid)
    .read_size(65)
    .write_size(65)
    .open(&registry, "/dev/hidraw0")?;

device.write_timeout(&[0x01, 0x80], Duration::from_millis(100))?;
let mut buf = [0; 64];
let len = device.read_timeout(&mut buf, Duration::from_millis(100))?;
println!("Received: {:?}", &buf[..len]);
# Ok::<(), async_dev::Error>(())
```

### Event loop integration

The host implements [`Poller`] for its polling mechanism and passes it to
[`Device::register`] together with a [`DeviceHandler`]:

```no_run
use async_dev::{Device, DeviceHandler, Poller, Result};
use std::sync::Arc;

struct Printer;

impl DeviceHandler for Printer {
    fn on_read(&mut self, data: Result<&[u8]>) {
        match data {
            Ok(data) => println!("report: {data:?}"),
            Err(e) => eprintln!("read failed: {e}"),
        }
    }
    fn on_write(&mut self, status: Result<usize>) {
        println!("write done: {status:?}");
    }
    fn on_close(&mut self) {
        println!("device gone");
    }
}

fn attach(device: &mut Device, poller: Arc<dyn Poller>) -> Result<()> {
    device.register(poller, Printer)
}
```

## Platform-Specific Notes

### Unix
- Devices are opened with `O_RDWR | O_NOCTTY | O_NONBLOCK`
- The poller watches the file descriptor; writes are always synchronous

### Windows
- Devices are opened with `FILE_FLAG_OVERLAPPED`
- Each direction has its own auto-reset completion event; both are registered
- Reads go through an internal buffer of the configured read size

## Error Handling

Every operation returns [`Result`] with the crate [`Error`]. OS failures keep
their `std::io::Error`, available through [`Error::io_error`]. Nothing is
logged unless the application installs a `log` implementation.
*/

mod builder;
mod device;
mod error;
pub mod overlapped;
mod platform;
mod poll;
mod registry;
mod report;

#[cfg(test)]
mod mock;

pub use crate::builder::DeviceBuilder;
pub use crate::device::{Device, DeviceType, Transport, WriteStatus};
pub use crate::error::{Direction, Error, Result};
pub use crate::overlapped::{OverlappedFile, OverlappedTransport, WRITE_QUEUE_DEPTH};
#[cfg(windows)]
pub use crate::platform::Win32File;
pub use crate::poll::{DeviceHandler, Interest, Poller, Source, SourceHandler};
pub use crate::registry::{Backend, DeviceRegistry, SystemBackend};
pub use crate::report::{strip_report_id, NULL_REPORT_ID};

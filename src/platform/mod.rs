use std::io;

use crate::device::Transport;

#[cfg(unix)]
pub(crate) mod unix;

#[cfg(windows)]
pub(crate) mod windows;
#[cfg(windows)]
pub use self::windows::Win32File;

/// Opens `path` with the platform transport.
#[cfg(unix)]
pub(crate) fn open(path: &str) -> io::Result<Box<dyn Transport>> {
    Ok(Box::new(unix::BlockingTransport::open(path)?))
}

/// Opens `path` with the platform transport.
#[cfg(windows)]
pub(crate) fn open(path: &str) -> io::Result<Box<dyn Transport>> {
    let file = Win32File::open(path)?;
    Ok(Box::new(crate::overlapped::OverlappedTransport::new(file)?))
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn open(_path: &str) -> io::Result<Box<dyn Transport>> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

//! Error type shared by both transports.

use std::fmt;
use std::io;
use thiserror::Error;

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Transfer direction, used to report which endpoint is missing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::In => f.write_str("IN"),
            Direction::Out => f.write_str("OUT"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("device {0} is already opened")]
    AlreadyOpen(String),

    #[error("failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to allocate {0} bytes")]
    Alloc(usize),

    #[error("the HID device has no {0} endpoint")]
    NoEndpoint(Direction),

    #[error("no space left in write queue")]
    QueueFull,

    #[error("an operation is already in flight")]
    Busy,

    #[error("wait failed: {0}")]
    Wait(#[source] io::Error),

    #[error("cancel failed: {0}")]
    Cancel(#[source] io::Error),

    /// Never returned; formatted into diagnostics when a timeout-bound
    /// transfer moved fewer bytes than requested.
    #[error("only {transferred} bytes transferred (requested {requested})")]
    ShortTransfer { transferred: usize, requested: usize },

    #[error("failed to register with the poller: {0}")]
    Register(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the underlying OS error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Error::OpenFailed { source, .. } => Some(source),
            Error::Wait(e) | Error::Cancel(e) | Error::Register(e) | Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Copies an `io::Error`, keeping the OS code or the kind.
pub(crate) fn duplicate(e: &io::Error) -> io::Error {
    match e.raw_os_error() {
        Some(code) => io::Error::from_raw_os_error(code),
        None => io::Error::new(e.kind(), e.to_string()),
    }
}

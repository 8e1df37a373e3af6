use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// Owned POSIX file descriptor.
pub(crate) struct Fd {
    pub(crate) inner: RawFd,
}

impl Fd {
    pub(crate) fn new(value: RawFd) -> io::Result<Self> {
        if value < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Fd { inner: value })
    }
    /// Opens a character device (or FIFO) for non-blocking I/O.
    ///
    /// The device never becomes the controlling terminal.
    pub(crate) fn open(path: &str) -> io::Result<Self> {
        let path =
            CString::new(path).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let fd = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        Fd::new(fd)
    }
    #[inline]
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let fd = self.as_raw_fd();
        let amount = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
        if amount < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(amount as usize)
    }
    #[inline]
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let fd = self.as_raw_fd();
        let amount = unsafe { libc::write(fd, buf.as_ptr() as *const _, buf.len()) };
        if amount < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(amount as usize)
    }
    /// Waits until the descriptor is readable.
    ///
    /// Expiry is reported as `TimedOut`, a signal as `Interrupted`. Error and
    /// hang-up conditions count as ready so the following read reports them.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.wait(libc::POLLIN, timeout)
    }
    pub fn wait_writable(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.wait(libc::POLLOUT, timeout)
    }
    fn wait(&self, events: libc::c_short, timeout: Option<Duration>) -> io::Result<()> {
        let mut fds = [libc::pollfd {
            fd: self.as_raw_fd(),
            events,
            revents: 0,
        }];
        let result = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                timeout
                    .map(|t| t.as_millis().min(i32::MAX as _) as _)
                    .unwrap_or(-1),
            )
        };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }
        if result == 0 {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        Ok(())
    }
}

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.inner
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        if self.inner >= 0 {
            unsafe { libc::close(self.inner) };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pipe() -> (Fd, Fd) {
        let mut fds = [0; 2];
        assert_eq!(0, unsafe { libc::pipe(fds.as_mut_ptr()) });
        (Fd::new(fds[0]).unwrap(), Fd::new(fds[1]).unwrap())
    }

    #[test]
    fn wait_times_out_without_data() {
        let (rx, _tx) = pipe();
        let err = rx.wait_readable(Some(Duration::ZERO)).unwrap_err();
        assert_eq!(io::ErrorKind::TimedOut, err.kind());
    }

    #[test]
    fn wait_sees_written_data() {
        let (rx, tx) = pipe();
        tx.wait_writable(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(3, tx.write(b"abc").unwrap());
        rx.wait_readable(Some(Duration::from_secs(1))).unwrap();
        let mut buf = [0; 8];
        assert_eq!(3, rx.read(&mut buf).unwrap());
        assert_eq!(b"abc", &buf[..3]);
    }

    #[test]
    fn open_missing_path_fails() {
        assert!(Fd::open("/nonexistent/async-dev").is_err());
    }
}

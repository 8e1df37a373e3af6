mod fd;
pub(crate) use self::fd::Fd;

mod device;
pub(crate) use self::device::BlockingTransport;

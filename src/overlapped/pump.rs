//! Poller notifications of the overlapped transport.

use std::io;

use super::{Issue, OverlappedFile, Shared};
use crate::device::DeviceType;
use crate::error::{duplicate, Error, Result};
use crate::report::strip_report_id;

/// Delivers the pending report, then keeps a read in flight.
///
/// Reads that complete synchronously are delivered in turn; the loop stops
/// once a read is pending or cannot be issued, or the device was closed by
/// the handler.
pub(super) fn pump<F: OverlappedFile>(shared: &Shared<F>) {
    loop {
        let mut report = None;
        let mut failure = None;
        let mut again = false;
        {
            let mut guard = shared.read.lock().unwrap();
            let read = &mut *guard;
            if shared.is_closed() {
                break;
            }
            if read.bread > 0 {
                let data = &read.buf[..read.bread];
                let data = match read.device_type {
                    DeviceType::Hid => strip_report_id(data),
                    DeviceType::Serial => data,
                };
                report = Some(data.to_vec());
                read.bread = 0;
            }
            if read.pending {
                // completion arrives through `on_read_complete`
            } else if read.count == 0 {
                log::error!("read size is 0, no read issued");
            } else {
                match shared.start_read(read) {
                    Ok(Issue::Complete(0)) => {
                        // The completion resource is signaled anyway; the next
                        // read is issued from that notification.
                        log::trace!("read completed with no data");
                        read.pending = true;
                    }
                    Ok(Issue::Complete(_)) => again = true,
                    Ok(Issue::Pending) => {}
                    Err(e) => failure = Some(e),
                }
            }
        }
        if let Some(report) = report {
            shared.handler.with(|handler| handler.on_read(Ok(&report)));
        }
        if let Some(e) = failure {
            shared.handler.with(|handler| handler.on_read(Err(Error::Io(e))));
        }
        if !again {
            break;
        }
    }
}

/// The read completion resource was signaled.
pub(super) fn on_read_complete<F: OverlappedFile>(shared: &Shared<F>) -> io::Result<()> {
    {
        let mut read = shared.read.lock().unwrap();
        if !read.pending {
            log::trace!("spurious read notification");
            return Ok(());
        }
        let transfer = shared
            .file
            .result(&read.op, false)
            .and_then(|transfer| transfer.completed());
        read.pending = false;
        match transfer {
            Ok(n) => read.bread = n.min(read.issued),
            Err(e) => {
                log::error!("GetOverlappedResult failed with error: {e}");
                let status = duplicate(&e);
                drop(read);
                shared
                    .handler
                    .with(|handler| handler.on_read(Err(Error::Io(e))));
                return Err(status);
            }
        }
    }
    pump(shared);
    Ok(())
}

/// The write completion resource was signaled.
///
/// Completes the head of the queue, then issues the queued writes until one
/// is pending. Every write that finishes here gets its own `on_write`.
pub(super) fn on_write_complete<F: OverlappedFile>(shared: &Shared<F>) -> io::Result<()> {
    let mut statuses: Vec<Result<usize>> = Vec::new();
    {
        let mut write = shared.write.lock().unwrap();
        if !write.pending {
            // the write completed synchronously and was already reported
            log::trace!("spurious write notification");
            return Ok(());
        }
        write.pending = false;
        let transfer = shared
            .file
            .result(&write.op, false)
            .and_then(|transfer| transfer.completed());
        write.queue.pop();
        statuses.push(transfer.map_err(|e| {
            log::error!("GetOverlappedResult failed with error: {e}");
            Error::Io(e)
        }));
        while !write.queue.is_empty() {
            match shared.start_write(&mut write) {
                Ok(Issue::Pending) => break,
                Ok(Issue::Complete(n)) => {
                    write.queue.pop();
                    statuses.push(Ok(n));
                }
                Err(e) => {
                    write.queue.pop();
                    statuses.push(Err(Error::Io(e)));
                }
            }
        }
    }
    let mut failure = None;
    for status in statuses {
        if let Err(Error::Io(ref e)) = status {
            failure.get_or_insert_with(|| duplicate(e));
        }
        shared.handler.with(|handler| handler.on_write(status));
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub(super) fn on_close<F: OverlappedFile>(shared: &Shared<F>) -> io::Result<()> {
    shared.handler.with(|handler| handler.on_close());
    Ok(())
}

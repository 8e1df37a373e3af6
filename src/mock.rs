//! In-memory stand-ins for the OS and the host poller, used by unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::device::Transport;
use crate::error::Result;
use crate::overlapped::{
    CancelStatus, Issue, OverlappedFile, OverlappedTransport, Transfer, WaitStatus,
};
use crate::poll::{DeviceHandler, Interest, Poller, Source, SourceHandler};
use crate::registry::Backend;

static NEXT_SOURCE: AtomicIsize = AtomicIsize::new(100);

/// Opens a [`MockFile`] for every path.
#[derive(Default)]
pub(crate) struct MockBackend {
    files: Mutex<Vec<MockFile>>,
}

impl MockBackend {
    pub(crate) fn opened(&self) -> usize {
        self.files.lock().unwrap().len()
    }
    pub(crate) fn file(&self, index: usize) -> MockFile {
        self.files.lock().unwrap()[index].clone()
    }
}

impl Backend for MockBackend {
    fn open(&self, _path: &str) -> io::Result<Box<dyn Transport>> {
        let file = MockFile::default();
        self.files.lock().unwrap().push(file.clone());
        Ok(Box::new(OverlappedTransport::new(file)?))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) enum WriteMode {
    #[default]
    Immediate,
    Pending,
}

struct SendPtr(*mut u8);

unsafe impl Send for SendPtr {}

enum InFlight {
    Read { buf: SendPtr, len: usize },
    Write(Vec<u8>),
}

#[derive(Default)]
struct OpState {
    inflight: Option<InFlight>,
    signaled: bool,
    last: Option<std::result::Result<Transfer, io::ErrorKind>>,
}

impl OpState {
    fn finish(&mut self, last: std::result::Result<Transfer, io::ErrorKind>) {
        self.inflight = None;
        self.last = Some(last);
        self.signaled = true;
    }
}

pub(crate) struct MockOp {
    state: Arc<Mutex<OpState>>,
    source: Source,
}

#[derive(Default)]
struct FileState {
    reads: VecDeque<Vec<u8>>,
    write_mode: WriteMode,
    written: Vec<Vec<u8>>,
    fail_wait: bool,
    fail_cancel: bool,
    complete_on_cancel: Option<Vec<u8>>,
    ops: Vec<(Arc<Mutex<OpState>>, Source)>,
}

/// Scriptable overlapped file.
///
/// Reads complete synchronously when data was pushed beforehand and stay
/// pending otherwise. Writes follow the [`WriteMode`]. Waiting never sleeps:
/// an unsignaled operation times out at once.
#[derive(Clone, Default)]
pub(crate) struct MockFile(Arc<Mutex<FileState>>);

/// Copies `data` into a pending read and returns the transfer.
fn fill(buf: &SendPtr, len: usize, data: &[u8]) -> Transfer {
    let n = data.len().min(len);
    // SAFETY: the transport keeps the destination alive while the read is
    // in flight.
    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), buf.0, n) };
    Transfer::Done(n)
}

impl MockFile {
    fn op(&self, index: usize) -> Arc<Mutex<OpState>> {
        self.0.lock().unwrap().ops[index].0.clone()
    }
    /// Completes the pending read with `data`, or queues it for the next read.
    pub(crate) fn push_read(&self, data: &[u8]) {
        let op = self.op(0);
        let mut op = op.lock().unwrap();
        match op.inflight.take() {
            Some(InFlight::Read { buf, len }) => {
                let transfer = fill(&buf, len, data);
                op.finish(Ok(transfer));
            }
            inflight => {
                op.inflight = inflight;
                self.0.lock().unwrap().reads.push_back(data.to_vec());
            }
        }
    }
    pub(crate) fn set_write_mode(&self, mode: WriteMode) {
        self.0.lock().unwrap().write_mode = mode;
    }
    /// Completes the pending write successfully.
    pub(crate) fn complete_write(&self) {
        let op = self.op(1);
        let mut op = op.lock().unwrap();
        if let Some(InFlight::Write(data)) = op.inflight.take() {
            let transfer = Transfer::Done(data.len());
            self.0.lock().unwrap().written.push(data);
            op.finish(Ok(transfer));
        }
    }
    /// Fails the pending write.
    pub(crate) fn fail_write(&self) {
        let op = self.op(1);
        let mut op = op.lock().unwrap();
        if op.inflight.is_some() {
            op.finish(Err(io::ErrorKind::BrokenPipe));
        }
    }
    pub(crate) fn fail_wait(&self) {
        self.0.lock().unwrap().fail_wait = true;
    }
    /// Makes cancellation fail; the operation in flight aborts on its own.
    pub(crate) fn fail_cancel(&self) {
        self.0.lock().unwrap().fail_cancel = true;
    }
    /// Makes the next cancelled read complete with `data` instead of aborting.
    pub(crate) fn complete_on_cancel(&self, data: &[u8]) {
        self.0.lock().unwrap().complete_on_cancel = Some(data.to_vec());
    }
    /// Number of operations in flight.
    pub(crate) fn outstanding(&self) -> usize {
        let ops: Vec<_> = self.0.lock().unwrap().ops.iter().map(|op| op.0.clone()).collect();
        ops.iter()
            .filter(|op| op.lock().unwrap().inflight.is_some())
            .count()
    }
    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().written.clone()
    }
    pub(crate) fn read_source(&self) -> Source {
        self.0.lock().unwrap().ops[0].1
    }
    pub(crate) fn write_source(&self) -> Source {
        self.0.lock().unwrap().ops[1].1
    }
}

impl OverlappedFile for MockFile {
    type Op = MockOp;

    fn new_op(&self) -> io::Result<MockOp> {
        let state = Arc::new(Mutex::new(OpState::default()));
        let source = Source::from_raw(NEXT_SOURCE.fetch_add(1, Ordering::Relaxed));
        self.0.lock().unwrap().ops.push((state.clone(), source));
        Ok(MockOp { state, source })
    }
    fn source(&self, op: &MockOp) -> Source {
        op.source
    }
    unsafe fn start_read(&self, op: &mut MockOp, buf: *mut u8, len: usize) -> io::Result<Issue> {
        let mut state = op.state.lock().unwrap();
        assert!(state.inflight.is_none(), "read issued twice");
        state.signaled = false;
        let buf = SendPtr(buf);
        match self.0.lock().unwrap().reads.pop_front() {
            Some(data) => {
                let transfer = fill(&buf, len, &data);
                state.finish(Ok(transfer));
                Ok(Issue::Complete(transfer.len()))
            }
            None => {
                state.inflight = Some(InFlight::Read { buf, len });
                Ok(Issue::Pending)
            }
        }
    }
    unsafe fn start_write(
        &self,
        op: &mut MockOp,
        buf: *const u8,
        len: usize,
    ) -> io::Result<Issue> {
        let mut state = op.state.lock().unwrap();
        assert!(state.inflight.is_none(), "write issued twice");
        state.signaled = false;
        let data = std::slice::from_raw_parts(buf, len).to_vec();
        let mut file = self.0.lock().unwrap();
        match file.write_mode {
            WriteMode::Immediate => {
                file.written.push(data);
                state.finish(Ok(Transfer::Done(len)));
                Ok(Issue::Complete(len))
            }
            WriteMode::Pending => {
                state.inflight = Some(InFlight::Write(data));
                Ok(Issue::Pending)
            }
        }
    }
    fn wait(&self, op: &MockOp, _timeout: Duration) -> io::Result<WaitStatus> {
        if self.0.lock().unwrap().fail_wait {
            return Err(io::Error::other("wait failed"));
        }
        let mut state = op.state.lock().unwrap();
        if state.signaled {
            state.signaled = false;
            Ok(WaitStatus::Signaled)
        } else {
            Ok(WaitStatus::TimedOut)
        }
    }
    fn result(&self, op: &MockOp, block: bool) -> io::Result<Transfer> {
        let state = op.state.lock().unwrap();
        if state.inflight.is_some() {
            assert!(!block, "blocking on an operation that was not cancelled");
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        match state.last {
            Some(Ok(transfer)) => Ok(transfer),
            Some(Err(kind)) => Err(io::Error::from(kind)),
            None => Err(io::Error::other("no operation issued")),
        }
    }
    fn cancel(&self, op: &MockOp) -> io::Result<CancelStatus> {
        let mut state = op.state.lock().unwrap();
        if self.0.lock().unwrap().fail_cancel {
            if state.inflight.is_some() {
                state.finish(Ok(Transfer::Aborted(0)));
            }
            return Err(io::Error::other("cancel failed"));
        }
        match state.inflight.take() {
            None => Ok(CancelStatus::NotFound),
            Some(InFlight::Read { buf, len }) => {
                let transfer = match self.0.lock().unwrap().complete_on_cancel.take() {
                    Some(data) => fill(&buf, len, &data),
                    None => Transfer::Aborted(0),
                };
                state.finish(Ok(transfer));
                Ok(CancelStatus::Requested)
            }
            Some(InFlight::Write(_)) => {
                state.finish(Ok(Transfer::Aborted(0)));
                Ok(CancelStatus::Requested)
            }
        }
    }
}

#[derive(Default)]
struct PollerState {
    handlers: BTreeMap<Source, (Interest, Arc<dyn SourceHandler>)>,
    removed: Vec<Arc<dyn SourceHandler>>,
    accept: Option<usize>,
}

/// Host poller whose sources are signaled by hand.
#[derive(Default)]
pub(crate) struct MockPoller(Mutex<PollerState>);

impl MockPoller {
    /// Accepts `count` more registrations, then refuses them.
    pub(crate) fn fail_registration_after(&self, count: usize) {
        self.0.lock().unwrap().accept = Some(count);
    }
    pub(crate) fn sources(&self) -> Vec<Source> {
        self.0.lock().unwrap().handlers.keys().copied().collect()
    }
    /// Dispatches the notification `source` was registered for.
    pub(crate) fn signal(&self, source: Source) -> io::Result<()> {
        let registered = self.0.lock().unwrap().handlers.get(&source).cloned();
        match registered {
            Some((Interest::Readable, handler)) => handler.on_readable(),
            Some((Interest::Writable, handler)) => handler.on_writable(),
            None => Ok(()),
        }
    }
    pub(crate) fn close(&self, source: Source) -> io::Result<()> {
        let registered = self.0.lock().unwrap().handlers.get(&source).cloned();
        match registered {
            Some((_, handler)) => handler.on_close(),
            None => Ok(()),
        }
    }
    /// Fires every notification on handlers that were already removed.
    pub(crate) fn signal_removed(&self) {
        let removed = self.0.lock().unwrap().removed.clone();
        for handler in removed {
            let _ = handler.on_readable();
            let _ = handler.on_writable();
            let _ = handler.on_close();
        }
    }
}

impl Poller for MockPoller {
    fn register(
        &self,
        source: Source,
        interest: Interest,
        handler: Box<dyn SourceHandler>,
    ) -> io::Result<()> {
        let mut state = self.0.lock().unwrap();
        match state.accept {
            Some(0) => return Err(io::Error::other("registration refused")),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        state.handlers.insert(source, (interest, Arc::from(handler)));
        Ok(())
    }
    fn remove(&self, source: Source) {
        let mut state = self.0.lock().unwrap();
        if let Some((_, handler)) = state.handlers.remove(&source) {
            state.removed.push(handler);
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Event {
    Read(Vec<u8>),
    ReadError,
    Write(usize),
    WriteError,
    Close,
}

/// Device handler that records what it is told.
#[derive(Clone, Default)]
pub(crate) struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    /// Takes the events recorded so far.
    pub(crate) fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl DeviceHandler for Recorder {
    fn on_read(&mut self, data: Result<&[u8]>) {
        let event = match data {
            Ok(data) => Event::Read(data.to_vec()),
            Err(_) => Event::ReadError,
        };
        self.0.lock().unwrap().push(event);
    }
    fn on_write(&mut self, status: Result<usize>) {
        let event = match status {
            Ok(n) => Event::Write(n),
            Err(_) => Event::WriteError,
        };
        self.0.lock().unwrap().push(event);
    }
    fn on_close(&mut self) {
        self.0.lock().unwrap().push(Event::Close);
    }
}

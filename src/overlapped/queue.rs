use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Maximum number of writes queued on a device, including the one in flight.
pub const WRITE_QUEUE_DEPTH: usize = 2;

/// Bounded FIFO of pending writes.
///
/// Entries are [`Bytes`], so their contents stay at a fixed address while the
/// head is in flight even when the queue itself moves entries around.
#[derive(Debug)]
pub(crate) struct WriteQueue {
    entries: VecDeque<Bytes>,
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self {
            entries: VecDeque::with_capacity(WRITE_QUEUE_DEPTH),
        }
    }
}

impl WriteQueue {
    /// Appends `report` and returns how many entries are ahead of it.
    pub(crate) fn push(&mut self, report: Bytes) -> Result<usize> {
        if self.entries.len() == WRITE_QUEUE_DEPTH {
            return Err(Error::QueueFull);
        }
        self.entries.push_back(report);
        Ok(self.entries.len() - 1)
    }
    pub(crate) fn front(&self) -> Option<&Bytes> {
        self.entries.front()
    }
    pub(crate) fn pop(&mut self) -> Option<Bytes> {
        self.entries.pop_front()
    }
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bounded_at_two() {
        let mut queue = WriteQueue::default();
        assert_eq!(0, queue.push(Bytes::from_static(b"a")).unwrap());
        assert_eq!(1, queue.push(Bytes::from_static(b"b")).unwrap());
        assert!(matches!(
            queue.push(Bytes::from_static(b"c")),
            Err(Error::QueueFull)
        ));
        assert_eq!(WRITE_QUEUE_DEPTH, queue.entries.len());
    }

    #[test]
    fn first_in_first_out() {
        let mut queue = WriteQueue::default();
        queue.push(Bytes::from_static(b"a")).unwrap();
        queue.push(Bytes::from_static(b"b")).unwrap();
        assert_eq!(b"a", &queue.pop().unwrap()[..]);
        assert_eq!(1, queue.push(Bytes::from_static(b"c")).unwrap());
        assert_eq!(b"b", &queue.front().unwrap()[..]);
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}

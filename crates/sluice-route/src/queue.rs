//! Bounded handoff queue between the reader and routing consumers
//!
//! A fixed-capacity MPMC queue on top of `crossbeam-channel`. The reader is the
//! only producer; any number of consumer threads may pull from it. A full
//! queue never blocks the producer here: [`BoundedQueue::try_push`] hands the
//! item back and the reader decides when to retry.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::model::Data;

/// Element flowing through the queue
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    /// A change record to route
    Data(Data),
    /// The reader will not produce anything else
    EndOfStream,
}

impl QueueItem {
    /// Whether this is the end-of-stream marker
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// Outcome of waiting for the next item
#[derive(Debug, Clone, PartialEq)]
pub enum Take {
    /// Next change record
    Data(Data),
    /// The end-of-stream marker was dequeued
    EndOfStream,
    /// Nothing arrived before the timeout
    TimedOut,
}

impl Take {
    /// Collapse into the record, if any
    pub fn into_data(self) -> Option<Data> {
        match self {
            Self::Data(data) => Some(data),
            Self::EndOfStream | Self::TimedOut => None,
        }
    }
}

/// Fixed-capacity FIFO of [`QueueItem`]s
pub struct BoundedQueue {
    sender: Sender<QueueItem>,
    receiver: Receiver<QueueItem>,
    capacity: usize,
    /// Total items ever enqueued
    total_enqueued: AtomicU64,
    /// Total items ever dequeued
    total_dequeued: AtomicU64,
    /// Number of times enqueue was refused (backpressure)
    rejected_enqueues: AtomicU64,
}

impl BoundedQueue {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            total_enqueued: AtomicU64::new(0),
            total_dequeued: AtomicU64::new(0),
            rejected_enqueues: AtomicU64::new(0),
        }
    }

    /// Try to enqueue without blocking; a full queue returns the item
    pub fn try_push(&self, item: QueueItem) -> Result<(), QueueItem> {
        match self.sender.try_send(item) {
            Ok(()) => {
                self.total_enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(item)) => {
                self.rejected_enqueues.fetch_add(1, Ordering::Relaxed);
                Err(item)
            }
            Err(TrySendError::Disconnected(item)) => Err(item),
        }
    }

    /// Try to dequeue without blocking
    pub fn try_pop(&self) -> Option<QueueItem> {
        let item = self.receiver.try_recv().ok()?;
        self.total_dequeued.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    /// Wait up to `timeout` for the next item
    pub fn poll(&self, timeout: Duration) -> Option<QueueItem> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => {
                self.total_dequeued.fetch_add(1, Ordering::Relaxed);
                Some(item)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Get statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            capacity: self.capacity,
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_dequeued: self.total_dequeued.load(Ordering::Relaxed),
            rejected_enqueues: self.rejected_enqueues.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BoundedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct QueueStats {
    pub len: usize,
    pub capacity: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub rejected_enqueues: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventType;

    fn item(id: i64) -> QueueItem {
        QueueItem::Data(Data::new(id, "item", EventType::Insert, "default"))
    }

    #[test]
    fn test_try_push_respects_capacity() {
        let queue = BoundedQueue::new(2);

        assert!(queue.try_push(item(1)).is_ok());
        assert!(queue.try_push(item(2)).is_ok());
        assert_eq!(queue.try_push(item(3)), Err(item(3)));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.remaining(), 0);
        assert_eq!(queue.stats().rejected_enqueues, 1);
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(4);
        queue.try_push(item(1)).unwrap();
        queue.try_push(item(2)).unwrap();
        queue.try_push(QueueItem::EndOfStream).unwrap();

        assert_eq!(queue.try_pop(), Some(item(1)));
        assert_eq!(queue.poll(Duration::from_millis(10)), Some(item(2)));
        assert!(queue.try_pop().unwrap().is_end_of_stream());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_poll_times_out_when_empty() {
        let queue = BoundedQueue::new(1);
        assert_eq!(queue.poll(Duration::from_millis(20)), None);
    }

    #[test]
    fn test_stats() {
        let queue = BoundedQueue::new(3);
        queue.try_push(item(1)).unwrap();
        queue.try_push(item(2)).unwrap();
        queue.try_pop();

        let stats = queue.stats();
        assert_eq!(stats.len, 1);
        assert_eq!(stats.capacity, 3);
        assert_eq!(stats.total_enqueued, 2);
        assert_eq!(stats.total_dequeued, 1);
    }

    #[test]
    fn test_take_into_data() {
        let data = Data::new(1, "item", EventType::Insert, "default");
        assert_eq!(Take::Data(data.clone()).into_data(), Some(data));
        assert_eq!(Take::EndOfStream.into_data(), None);
        assert_eq!(Take::TimedOut.into_data(), None);
    }
}

//! Closed-connection batching.
//!
//! Closed records accumulate in a bounded buffer; every close-adjacent
//! return hook (TCP and UDP alike) runs the threshold check and, when the
//! buffer has reached capacity, hands the whole batch to the consumer in
//! one non-blocking call.

use nettrace_common::ConnClose;
use parking_lot::Mutex;

/// Consumer of full closed-connection batches. `batch_ready` must not
/// block; it runs on the native execution context of whatever close
/// operation tripped the threshold.
pub trait BatchSink: Send + Sync {
    fn batch_ready(&self, batch: &[ConnClose]);
}

impl<T: BatchSink + ?Sized> BatchSink for std::sync::Arc<T> {
    fn batch_ready(&self, batch: &[ConnClose]) {
        (**self).batch_ready(batch)
    }
}

/// Sink that discards batches. Placeholder for deployments that only read
/// the live statistics maps.
#[derive(Debug, Default)]
pub struct NullSink;

impl BatchSink for NullSink {
    fn batch_ready(&self, _batch: &[ConnClose]) {}
}

/// Bounded buffer of closed-connection records.
///
/// When the buffer is full before being drained, new records are dropped
/// (drop-newest): the caller learns about it from `enqueue` and counts the
/// loss. Dropping the newest record keeps already-queued records stable,
/// which matches how the consumer will have sized its read.
pub struct CloseFlusher {
    capacity: usize,
    buf: Mutex<Vec<ConnClose>>,
}

impl CloseFlusher {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buf: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }

    /// Append a closed record. Returns `false` when the buffer was already
    /// full and the record was dropped.
    pub fn enqueue(&self, record: ConnClose) -> bool {
        let mut buf = self.buf.lock();
        if buf.len() >= self.capacity {
            return false;
        }
        buf.push(record);
        true
    }

    /// Threshold check run from every close-adjacent return hook: when the
    /// buffer has reached capacity, drain it and signal the sink.
    pub fn flush_if_full(&self, sink: &dyn BatchSink) {
        let batch = {
            let mut buf = self.buf.lock();
            if buf.len() < self.capacity {
                return;
            }
            std::mem::take(&mut *buf)
        };
        sink.batch_ready(&batch);
    }
}

//! Redo-log seam
//!
//! Durability is external to the core: commit only signals the moments. A
//! flush request carries a continuation that runs once the log reports the
//! transaction durable; lock release and the status flip to committed wait
//! for it. The version-publish step does not.

use parking_lot::Mutex;

/// Callback invoked when a flush request becomes durable.
pub type FlushCallback = Box<dyn FnOnce() + Send>;

/// The durability protocol as the core sees it.
pub trait RedoLog: Send + Sync {
    /// Request a flush; `on_durable` runs exactly once when it completes.
    /// Implementations may invoke it inline or from a log writer thread.
    fn flush(&self, on_durable: FlushCallback);
}

/// Log that acknowledges every flush inline. Used for embedded engines and
/// anywhere durability is handled out of band.
pub struct NoopRedoLog;

impl RedoLog for NoopRedoLog {
    fn flush(&self, on_durable: FlushCallback) {
        on_durable();
    }
}

/// Log that queues flush requests until explicitly acknowledged. Drives the
/// async-commit path in tests: `send` returns before the ack, the commit
/// finishes when `ack_all` runs.
pub struct QueuedRedoLog {
    pending: Mutex<Vec<FlushCallback>>,
}

impl QueuedRedoLog {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Acknowledge every queued flush, running the continuations in order.
    /// Returns how many were acknowledged.
    pub fn ack_all(&self) -> usize {
        let pending: Vec<_> = std::mem::take(&mut *self.pending.lock());
        let count = pending.len();
        for on_durable in pending {
            on_durable();
        }
        count
    }
}

impl Default for QueuedRedoLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RedoLog for QueuedRedoLog {
    fn flush(&self, on_durable: FlushCallback) {
        self.pending.lock().push(on_durable);
    }
}

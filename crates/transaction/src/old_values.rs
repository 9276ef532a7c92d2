//! Old-version chains for snapshot readers
//!
//! Each cell that was overwritten while a repeatable-read or serializable
//! transaction was live gets a chain of its prior committed values, ordered
//! by descending commit timestamp. The chain is append-only at the head;
//! pruning only ever cuts the tail, so a reader that grabbed a head mid-walk
//! keeps a consistent view.
//!
//! Chains live in the engine's [`OldValueIndex`], a concurrent map keyed by
//! cell identity, and exist at all only while some snapshot reader might
//! still need a prior version.

use crate::cell::CellId;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vellum_common::TxnId;

/// One past committed value of a cell.
///
/// `tid` is the commit timestamp of the writer that produced `value`. Two
/// synthetic tags exist: `TxnId::ZERO` on the chain tail built from a
/// pre-image with no known timestamp, and `head.tid + 1` when reactivating
/// a head whose retention was previously skipped via `use_last`.
pub struct OldValue<V> {
    tid: TxnId,
    value: Option<Arc<V>>,
    next: RwLock<Option<Arc<OldValue<V>>>>,
    /// Set when a committing writer was skipped because this chain already
    /// covered every live snapshot reader; the head then stands in for the
    /// skipped commit.
    use_last: AtomicBool,
}

impl<V> OldValue<V> {
    pub fn new(tid: TxnId, value: Option<Arc<V>>) -> Self {
        Self::with_next(tid, value, None)
    }

    pub fn with_next(tid: TxnId, value: Option<Arc<V>>, next: Option<Arc<OldValue<V>>>) -> Self {
        Self {
            tid,
            value,
            next: RwLock::new(next),
            use_last: AtomicBool::new(false),
        }
    }

    pub fn tid(&self) -> TxnId {
        self.tid
    }

    pub fn value(&self) -> Option<Arc<V>> {
        self.value.clone()
    }

    pub fn next(&self) -> Option<Arc<OldValue<V>>> {
        self.next.read().clone()
    }

    pub(crate) fn set_next(&self, next: Option<Arc<OldValue<V>>>) {
        *self.next.write() = next;
    }

    pub fn use_last(&self) -> bool {
        self.use_last.load(Ordering::Acquire)
    }

    pub(crate) fn mark_use_last(&self) {
        self.use_last.store(true, Ordering::Release);
    }

    /// Number of nodes reachable from this one, itself included.
    pub fn chain_len(self: &Arc<Self>) -> usize {
        let mut len = 1;
        let mut node = self.next();
        while let Some(n) = node {
            len += 1;
            node = n.next();
        }
        len
    }
}

/// Concurrent map from cell identity to old-value chain head.
pub struct OldValueIndex<V> {
    chains: DashMap<CellId, Arc<OldValue<V>>>,
}

impl<V> OldValueIndex<V> {
    pub fn new() -> Self {
        Self {
            chains: DashMap::new(),
        }
    }

    pub fn head(&self, cell: CellId) -> Option<Arc<OldValue<V>>> {
        self.chains.get(&cell).map(|entry| entry.clone())
    }

    pub(crate) fn publish(&self, cell: CellId, head: Arc<OldValue<V>>) {
        self.chains.insert(cell, head);
    }

    pub(crate) fn remove(&self, cell: CellId) {
        self.chains.remove(&cell);
    }

    pub(crate) fn clear(&self) {
        self.chains.clear();
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Cut every chain after the first node at or below `min_live`: that
    /// node serves the oldest live snapshot reader, nothing past it is
    /// reachable by any live transaction. Returns how many nodes were
    /// dropped.
    pub(crate) fn prune(&self, min_live: TxnId) -> usize {
        let mut dropped = 0;
        for entry in self.chains.iter() {
            let mut node: Arc<OldValue<V>> = entry.value().clone();
            loop {
                if node.tid() <= min_live {
                    let mut tail = node.next();
                    node.set_next(None);
                    while let Some(t) = tail {
                        dropped += 1;
                        tail = t.next();
                    }
                    break;
                }
                match node.next() {
                    Some(next) => node = next,
                    None => break,
                }
            }
        }
        dropped
    }
}

impl<V> Default for OldValueIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

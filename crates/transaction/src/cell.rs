//! Versioned cells and the row-lock protocol
//!
//! One [`VersionedCell`] exists per row per table, so the footprint stays
//! small: an owner word for the lock-free compare-and-set and a snapshot
//! lock around the `(value, lock)` pair. Acquisition races are settled
//! entirely on the owner word; losers never touch the snapshot lock. The
//! value is mutated only by the current lock owner, and readers always take
//! a consistent `(value, lock)` pair before inspecting either.

use crate::engine::TransactionEngine;
use crate::error::Result;
use crate::old_values::OldValue;
use crate::record::TxnRecord;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vellum_common::TxnId;
use vellum_storage::{DataBuffer, DataReader, DataType};

/// Identity of a cell, the key of the engine's old-value index.
///
/// Ids come from a process-wide counter so a chain can never be re-bound to
/// a different row after its cell is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(u64);

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

impl CellId {
    fn next() -> Self {
        Self(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell-{}", self.0)
    }
}

/// In-flight writer of a cell: the owning transaction and the value that
/// was committed when the lock was taken. The pre-image is what every other
/// transaction sees until commit, and what rollback restores.
pub struct RowLock<V> {
    owner: Arc<TxnRecord>,
    pre_image: Option<Arc<V>>,
}

impl<V> RowLock<V> {
    pub fn owner(&self) -> &Arc<TxnRecord> {
        &self.owner
    }

    pub fn pre_image(&self) -> Option<&Arc<V>> {
        self.pre_image.as_ref()
    }

    pub fn is_committed(&self) -> bool {
        self.owner.is_committed()
    }
}

impl<V> Clone for RowLock<V> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            pre_image: self.pre_image.clone(),
        }
    }
}

struct CellState<V> {
    value: Option<Arc<V>>,
    lock: Option<RowLock<V>>,
}

/// Outcome of a lock attempt on a cell.
pub(crate) enum LockAttempt {
    /// The compare-and-set won; the caller must register the cell with the
    /// owning transaction.
    Acquired,
    /// The caller already holds this cell.
    Reentrant,
    Conflict,
}

/// The per-row MVCC record: current value plus optional in-flight lock.
pub struct VersionedCell<V> {
    id: CellId,
    /// Transaction id of the in-flight writer, 0 when unlocked. The single
    /// compare-and-set gate for lock acquisition.
    owner: AtomicU64,
    state: RwLock<CellState<V>>,
}

impl<V: Send + Sync + 'static> VersionedCell<V> {
    /// Cell holding a committed value with no in-flight writer.
    pub fn new_committed(value: Option<Arc<V>>) -> Self {
        Self {
            id: CellId::next(),
            owner: AtomicU64::new(0),
            state: RwLock::new(CellState { value, lock: None }),
        }
    }

    /// Cell born locked by an inserting transaction. The pre-image is empty:
    /// until commit, every other transaction treats the row as nonexistent.
    pub(crate) fn new_locked(value: Option<Arc<V>>, owner: &Arc<TxnRecord>) -> Self {
        Self {
            id: CellId::next(),
            owner: AtomicU64::new(owner.id().as_u64()),
            state: RwLock::new(CellState {
                value,
                lock: Some(RowLock {
                    owner: owner.clone(),
                    pre_image: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Current value with no visibility check. For internal use by the lock
    /// owner and the commit path.
    pub fn get_current(&self) -> Option<Arc<V>> {
        self.state.read().value.clone()
    }

    /// Consistent `(value, lock)` pair for the visibility oracle.
    pub fn snapshot(&self) -> (Option<Arc<V>>, Option<RowLock<V>>) {
        let state = self.state.read();
        (state.value.clone(), state.lock.clone())
    }

    /// Transaction holding this cell, if any.
    pub fn lock_owner(&self) -> Option<Arc<TxnRecord>> {
        self.state.read().lock.as_ref().map(|l| l.owner.clone())
    }

    pub fn is_locked_by_other(&self, txn: TxnId) -> bool {
        let owner = self.owner.load(Ordering::Acquire);
        owner != 0 && owner != txn.as_u64()
    }

    /// Non-blocking acquisition. Wins or loses on a single compare-and-set
    /// of the owner word; on a win the pre-image is captured before the
    /// caller can mutate the value.
    pub(crate) fn try_lock(&self, owner: &Arc<TxnRecord>) -> LockAttempt {
        let tid = owner.id().as_u64();
        if self.owner.load(Ordering::Acquire) == tid {
            return LockAttempt::Reentrant;
        }
        if self
            .owner
            .compare_exchange(0, tid, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return LockAttempt::Conflict;
        }
        let mut state = self.state.write();
        let pre_image = state.value.clone();
        state.lock = Some(RowLock {
            owner: owner.clone(),
            pre_image,
        });
        LockAttempt::Acquired
    }

    /// Release the lock. Only the owner calls this, from commit or rollback.
    pub(crate) fn unlock(&self) {
        let mut state = self.state.write();
        state.lock = None;
        drop(state);
        self.owner.store(0, Ordering::Release);
    }

    /// Replace the value. Only the current lock owner calls this, between a
    /// successful `try_lock` and the matching unlock.
    pub(crate) fn set_value(&self, value: Option<Arc<V>>) {
        self.state.write().value = value;
    }

    /// Restore the pre-image and release the lock.
    pub(crate) fn rollback(&self) {
        let mut state = self.state.write();
        if let Some(lock) = state.lock.take() {
            state.value = lock.pre_image;
        }
        drop(state);
        self.owner.store(0, Ordering::Release);
    }

    /// Version-publish on commit: push the newly committed value onto the
    /// cell's old-value chain so live snapshot readers keep their view.
    /// Skipped entirely when no snapshot reader is alive. Does not release
    /// the lock; that waits for the redo-log acknowledgement.
    pub(crate) fn commit(&self, engine: &TransactionEngine<V>) {
        let (value, lock) = self.snapshot();
        let Some(lock) = lock else { return };
        if !engine.has_snapshot_readers() {
            return;
        }
        let Some(commit_ts) = lock.owner.commit_timestamp() else {
            return;
        };

        if lock.pre_image.is_none() {
            // Pure insert: the only version older transactions could need
            // is "row absent", which an exhausted chain already encodes.
            engine
                .old_values()
                .publish(self.id, Arc::new(OldValue::new(commit_ts, value)));
            return;
        }

        let head = engine.old_values().head(self.id);
        if let (Some(head), Some(max_live)) = (&head, engine.max_live_snapshot_tid()) {
            if head.tid() > max_live {
                // The chain already covers every live snapshot reader;
                // remember that the newest entry stands in for this commit.
                head.mark_use_last();
                return;
            }
        }

        let tail = match head {
            None => Some(Arc::new(OldValue::new(
                TxnId::ZERO,
                lock.pre_image.clone(),
            ))),
            Some(head) if head.use_last() => Some(Arc::new(OldValue::with_next(
                head.tid().next(),
                lock.pre_image.clone(),
                Some(head),
            ))),
            Some(head) => Some(head),
        };
        let new_head = OldValue::with_next(commit_ts, value, tail);
        engine.old_values().publish(self.id, Arc::new(new_head));
    }

    /// Serialize `{tid, value}`. Committed cells write `tid = 0`; an
    /// in-flight writer's id is written otherwise and resolved by redo-log
    /// recovery.
    pub fn write(&self, buf: &mut DataBuffer, value_type: &dyn DataType<V>) -> Result<()> {
        self.write_meta(buf);
        self.write_value(buf, value_type)
    }

    pub fn write_meta(&self, buf: &mut DataBuffer) {
        buf.put_var_u64(self.owner.load(Ordering::Acquire));
    }

    fn write_value(&self, buf: &mut DataBuffer, value_type: &dyn DataType<V>) -> Result<()> {
        match self.get_current() {
            None => buf.put_u8(0),
            Some(value) => {
                buf.put_u8(1);
                value_type.write(buf, &value)?;
            }
        }
        Ok(())
    }

    /// Deserialize a cell. The tid is always materialized as committed:
    /// in-flight transactions are recovered from the redo log, never from
    /// cell images, so the reader constructs `lock = None`.
    pub fn read(reader: &mut DataReader<'_>, value_type: &dyn DataType<V>) -> Result<Self> {
        let _tid = reader.get_var_u64()?;
        let value = Self::read_value(reader, value_type)?;
        Ok(Self::new_committed(value))
    }

    /// Deserialize only the meta columns of a cell.
    pub fn read_meta(
        reader: &mut DataReader<'_>,
        value_type: &dyn DataType<V>,
        column_count: usize,
    ) -> Result<Self> {
        let _tid = reader.get_var_u64()?;
        let value = value_type.read_meta(reader, column_count)?;
        Ok(Self::new_committed(Some(Arc::new(value))))
    }

    fn read_value(
        reader: &mut DataReader<'_>,
        value_type: &dyn DataType<V>,
    ) -> Result<Option<Arc<V>>> {
        match reader.get_u8()? {
            0 => Ok(None),
            _ => Ok(Some(Arc::new(value_type.read(reader)?))),
        }
    }
}

//! Transaction descriptor
//!
//! The full per-transaction state: the shared [`TxnRecord`] cells point at,
//! plus the list of held locks in acquisition order. The lock list doubles
//! as the savepoint mechanism: a savepoint id is a position in it, and
//! partial rollback releases everything acquired past that position.
//!
//! A transaction is driven by a single session at a time; the interior
//! mutex on the lock list only covers handoff to the redo-log continuation
//! at commit.

use crate::cell::{LockAttempt, VersionedCell};
use crate::engine::TransactionEngine;
use crate::error::{Error, Result};
use crate::log::FlushCallback;
use crate::map::TransactionMap;
use crate::record::TxnRecord;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use vellum_common::{IsolationLevel, TxnId, TxnStatus};
use vellum_storage::{MemoryStorage, StorageMap};

/// One transaction: identity, isolation, held locks, lifecycle.
pub struct Transaction<V> {
    record: Arc<TxnRecord>,
    engine: Arc<TransactionEngine<V>>,
    auto_commit: bool,
    /// Cells locked by this transaction, in acquisition order.
    locks: Mutex<Vec<Arc<VersionedCell<V>>>>,
}

impl<V: Send + Sync + 'static> Transaction<V> {
    pub(crate) fn new(
        record: Arc<TxnRecord>,
        engine: Arc<TransactionEngine<V>>,
        auto_commit: bool,
    ) -> Self {
        Self {
            record,
            engine,
            auto_commit,
            locks: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.record.id()
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.record.isolation_level()
    }

    pub fn status(&self) -> TxnStatus {
        self.record.status()
    }

    pub fn record(&self) -> &Arc<TxnRecord> {
        &self.record
    }

    pub fn engine(&self) -> &Arc<TransactionEngine<V>> {
        &self.engine
    }

    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn held_lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Marker for partial rollback: everything locked after this point is
    /// released by `rollback_to_savepoint`.
    pub fn savepoint_id(&self) -> usize {
        self.locks.lock().len()
    }

    /// Release the locks acquired after `savepoint`, restoring each cell's
    /// pre-image. Locks taken before the savepoint are untouched.
    pub fn rollback_to_savepoint(&self, savepoint: usize) -> Result<()> {
        self.ensure_active()?;
        let mut locks = self.locks.lock();
        while locks.len() > savepoint {
            if let Some(cell) = locks.pop() {
                cell.rollback();
            }
        }
        Ok(())
    }

    /// Bind this transaction to a named map of the given storage.
    pub fn open_map<K>(
        self: &Arc<Self>,
        name: &str,
        storage: &MemoryStorage<K, VersionedCell<V>>,
    ) -> TransactionMap<K, V>
    where
        K: Ord + Clone + Send + Sync + 'static,
    {
        self.bind_map(storage.open_map(name))
    }

    /// Bind this transaction to an already-opened storage map.
    pub fn bind_map<K>(
        self: &Arc<Self>,
        map: Arc<dyn StorageMap<K, VersionedCell<V>>>,
    ) -> TransactionMap<K, V>
    where
        K: Ord + Clone + Send + Sync + 'static,
    {
        TransactionMap::new(self.clone(), map)
    }

    /// Commit and wait for nothing: the redo-log continuation publishes the
    /// committed status and releases locks whenever the flush acknowledges.
    /// With an inline-acking log this completes before returning.
    pub fn commit(&self) -> Result<()> {
        self.commit_inner(None)
    }

    /// Commit, running `on_complete` after the redo-log flush finishes and
    /// locks are released.
    pub fn async_commit(&self, on_complete: FlushCallback) -> Result<()> {
        self.commit_inner(Some(on_complete))
    }

    fn commit_inner(&self, on_complete: Option<FlushCallback>) -> Result<()> {
        if self.engine.is_closed() {
            return Err(Error::ConnectionBroken);
        }
        if !self
            .record
            .cas_status(TxnStatus::Active, TxnStatus::Committing)
        {
            return Err(Error::Internal(format!(
                "commit on {:?} transaction {}",
                self.record.status(),
                self.record.id()
            )));
        }

        // Commit point: from here readers treat the new values as committed
        // even though the locks are still held.
        let commit_ts = self.engine.next_timestamp();
        self.record.assign_commit_timestamp(commit_ts);

        let cells: Vec<_> = std::mem::take(&mut *self.locks.lock());
        for cell in &cells {
            cell.commit(&self.engine);
        }
        debug!(
            txn = %self.record.id(),
            commit_ts = %commit_ts,
            rows = cells.len(),
            "commit"
        );

        let record = self.record.clone();
        let engine = self.engine.clone();
        self.engine.redo_log().flush(Box::new(move || {
            record.set_status(TxnStatus::Committed);
            for cell in &cells {
                cell.unlock();
            }
            engine.transaction_closed(&record);
            if let Some(on_complete) = on_complete {
                on_complete();
            }
        }));
        Ok(())
    }

    /// Roll back: restore every held cell's pre-image and release its lock,
    /// newest acquisition first.
    pub fn rollback(&self) -> Result<()> {
        if !self
            .record
            .cas_status(TxnStatus::Active, TxnStatus::RolledBack)
        {
            return Err(Error::Internal(format!(
                "rollback on {:?} transaction {}",
                self.record.status(),
                self.record.id()
            )));
        }
        let cells: Vec<_> = std::mem::take(&mut *self.locks.lock());
        for cell in cells.iter().rev() {
            cell.rollback();
        }
        debug!(txn = %self.record.id(), rows = cells.len(), "rollback");
        self.engine.transaction_closed(&self.record);
        Ok(())
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.engine.is_closed() {
            return Err(Error::ConnectionBroken);
        }
        match self.record.status() {
            TxnStatus::Active => Ok(()),
            status => Err(Error::Internal(format!(
                "operation on {:?} transaction {}",
                status,
                self.record.id()
            ))),
        }
    }

    /// Lock a cell for this transaction, registering it in the lock list on
    /// fresh acquisition.
    pub(crate) fn try_lock_cell(&self, cell: &Arc<VersionedCell<V>>) -> LockAttempt {
        match cell.try_lock(&self.record) {
            LockAttempt::Acquired => {
                self.locks.lock().push(cell.clone());
                LockAttempt::Acquired
            }
            other => other,
        }
    }

    /// Create a cell born locked by this transaction (the insert path).
    pub(crate) fn insert_cell(&self, value: Option<Arc<V>>) -> Arc<VersionedCell<V>> {
        let cell = Arc::new(VersionedCell::new_locked(value, &self.record));
        self.locks.lock().push(cell.clone());
        cell
    }

    /// Forget a freshly created cell that lost its map-insert race. The
    /// cell was never shared, so dropping it is the whole cleanup.
    pub(crate) fn discard_insert(&self, cell: &Arc<VersionedCell<V>>) {
        let mut locks = self.locks.lock();
        if let Some(pos) = locks.iter().rposition(|held| Arc::ptr_eq(held, cell)) {
            locks.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransactionEngineConfig;

    type Engine = TransactionEngine<String>;

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::new(TransactionEngineConfig::default()))
    }

    fn committed_cell(value: &str) -> Arc<VersionedCell<String>> {
        Arc::new(VersionedCell::new_committed(Some(Arc::new(
            value.to_string(),
        ))))
    }

    #[test]
    fn test_commit_releases_all_locks() {
        let engine = engine();
        let txn = engine.begin_transaction(false).unwrap();
        let a = committed_cell("a");
        let b = committed_cell("b");
        assert!(matches!(txn.try_lock_cell(&a), LockAttempt::Acquired));
        assert!(matches!(txn.try_lock_cell(&b), LockAttempt::Acquired));
        assert_eq!(txn.held_lock_count(), 2);

        txn.commit().unwrap();
        assert_eq!(txn.status(), TxnStatus::Committed);
        assert_eq!(txn.held_lock_count(), 0);
        assert!(a.lock_owner().is_none());
        assert!(b.lock_owner().is_none());
    }

    #[test]
    fn test_rollback_restores_pre_images() {
        let engine = engine();
        let txn = engine.begin_transaction(false).unwrap();
        let cell = committed_cell("original");
        assert!(matches!(txn.try_lock_cell(&cell), LockAttempt::Acquired));
        cell.set_value(Some(Arc::new("dirty".to_string())));

        txn.rollback().unwrap();
        assert_eq!(txn.status(), TxnStatus::RolledBack);
        assert_eq!(*cell.get_current().unwrap(), "original");
        assert!(cell.lock_owner().is_none());
    }

    #[test]
    fn test_terminates_exactly_once() {
        let engine = engine();
        let txn = engine.begin_transaction(false).unwrap();
        txn.commit().unwrap();
        assert!(txn.commit().is_err());
        assert!(txn.rollback().is_err());
    }

    #[test]
    fn test_savepoint_releases_later_locks_only() {
        let engine = engine();
        let txn = engine.begin_transaction(false).unwrap();
        let early = committed_cell("early");
        assert!(matches!(txn.try_lock_cell(&early), LockAttempt::Acquired));

        let savepoint = txn.savepoint_id();
        let late = committed_cell("late");
        assert!(matches!(txn.try_lock_cell(&late), LockAttempt::Acquired));
        late.set_value(None);

        txn.rollback_to_savepoint(savepoint).unwrap();
        assert_eq!(txn.held_lock_count(), 1);
        assert!(late.lock_owner().is_none());
        assert_eq!(*late.get_current().unwrap(), "late");
        assert!(early.lock_owner().is_some());

        txn.rollback().unwrap();
        assert!(early.lock_owner().is_none());
    }

    #[test]
    fn test_reentrant_lock_registers_once() {
        let engine = engine();
        let txn = engine.begin_transaction(false).unwrap();
        let cell = committed_cell("x");
        assert!(matches!(txn.try_lock_cell(&cell), LockAttempt::Acquired));
        assert!(matches!(txn.try_lock_cell(&cell), LockAttempt::Reentrant));
        assert_eq!(txn.held_lock_count(), 1);
        txn.rollback().unwrap();
    }

    #[test]
    fn test_commit_after_engine_close_fails() {
        let engine = engine();
        let txn = engine.begin_transaction(false).unwrap();
        engine.close();
        assert!(matches!(txn.commit(), Err(Error::ConnectionBroken)));
    }
}

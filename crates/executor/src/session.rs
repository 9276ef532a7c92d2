//! Session state
//!
//! A session is driven by one scheduler thread at a time, so everything
//! here is plain `&mut` state. The session owns the current transaction and
//! publishes why it stopped making progress: the status enum, the conflict
//! kind, and the transaction id it is parked behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vellum_common::{IsolationLevel, ReplicationConflictType, SessionStatus, TxnId};
use vellum_transaction::{Result as EngineResult, Transaction, TransactionEngine};

/// One client session: current transaction plus scheduler-visible state.
pub struct Session<V> {
    engine: Arc<TransactionEngine<V>>,
    txn: Option<Arc<Transaction<V>>>,
    isolation: IsolationLevel,
    auto_commit: bool,
    status: SessionStatus,
    conflict: ReplicationConflictType,
    waiting_for: Option<TxnId>,
    /// Pre-image of the row the current statement is parked on.
    current_locked_row: Option<Arc<V>>,
    lock_timeout: Duration,
    cancel: Arc<AtomicBool>,
}

impl<V: Send + Sync + 'static> Session<V> {
    pub fn new(engine: Arc<TransactionEngine<V>>) -> Self {
        let isolation = engine.config().default_isolation;
        let lock_timeout = engine.config().lock_timeout;
        Self {
            engine,
            txn: None,
            isolation,
            auto_commit: true,
            status: SessionStatus::TransactionNotStart,
            conflict: ReplicationConflictType::None,
            waiting_for: None,
            current_locked_row: None,
            lock_timeout,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engine(&self) -> &Arc<TransactionEngine<V>> {
        &self.engine
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Takes effect at the next transaction begin.
    pub fn set_isolation_level(&mut self, isolation: IsolationLevel) {
        self.isolation = isolation;
    }

    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    /// The session's transaction, begun lazily on first use.
    pub fn transaction(&mut self) -> EngineResult<Arc<Transaction<V>>> {
        if let Some(txn) = &self.txn {
            return Ok(txn.clone());
        }
        let txn = self.engine.begin(self.auto_commit, self.isolation)?;
        self.txn = Some(txn.clone());
        Ok(txn)
    }

    pub fn current_transaction(&self) -> Option<&Arc<Transaction<V>>> {
        self.txn.as_ref()
    }

    /// Adopt a transaction created elsewhere (e.g. the one a map was opened
    /// on). No-op when it is already the session's transaction.
    pub(crate) fn adopt_transaction(&mut self, txn: &Arc<Transaction<V>>) {
        if self.txn.is_none() {
            self.txn = Some(txn.clone());
        }
    }

    /// Commit the session's transaction, if one is open.
    pub fn commit(&mut self) -> EngineResult<()> {
        if let Some(txn) = self.txn.take() {
            txn.commit()?;
        }
        self.status = SessionStatus::TransactionNotStart;
        Ok(())
    }

    /// Roll back the session's transaction, if one is open.
    pub fn rollback(&mut self) -> EngineResult<()> {
        if let Some(txn) = self.txn.take() {
            txn.rollback()?;
        }
        self.status = SessionStatus::TransactionNotStart;
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn conflict(&self) -> ReplicationConflictType {
        self.conflict
    }

    pub fn set_conflict(&mut self, conflict: ReplicationConflictType) {
        self.conflict = conflict;
    }

    /// Transaction this session is parked behind, if any.
    pub fn waiting_for(&self) -> Option<TxnId> {
        self.waiting_for
    }

    /// The row whose lock the current statement is parked on, as last seen
    /// by its visibility read.
    pub fn current_locked_row(&self) -> Option<&Arc<V>> {
        self.current_locked_row.as_ref()
    }

    pub(crate) fn set_current_locked_row(&mut self, row: Option<Arc<V>>) {
        self.current_locked_row = row;
    }

    /// Park the session behind `holder`, registering the wait edge the
    /// deadlock walk runs over.
    pub(crate) fn park_on(&mut self, holder: TxnId, conflict: ReplicationConflictType) {
        self.status = SessionStatus::Waiting;
        self.conflict = conflict;
        self.waiting_for = Some(holder);
        if let Some(txn) = &self.txn {
            self.engine.register_wait(txn.id(), holder);
        }
    }

    /// Resume after the holder released. The wait edge stays until the lock
    /// is actually acquired; only the session-visible state flips.
    pub(crate) fn resume(&mut self) {
        self.status = SessionStatus::Retrying;
        self.conflict = ReplicationConflictType::None;
        self.waiting_for = None;
    }

    /// Drop this session's wait edge, after acquiring the contested lock or
    /// abandoning the statement.
    pub(crate) fn clear_wait_edge(&mut self) {
        if let Some(txn) = &self.txn {
            self.engine.clear_wait(txn.id());
        }
    }

    /// Walk the wait graph from this session's transaction; a path back to
    /// it is a deadlock.
    pub fn check_deadlock(&self) -> Option<Vec<TxnId>> {
        let txn = self.txn.as_ref()?;
        self.engine.find_deadlock(txn.id())
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn set_lock_timeout(&mut self, timeout: Duration) {
        self.lock_timeout = timeout;
    }

    /// Shared flag raised by another thread to cancel the running
    /// statement; consulted on the cooperative yield stride.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn clear_canceled(&mut self) {
        self.cancel.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_transaction::TransactionEngineConfig;

    fn session() -> Session<String> {
        Session::new(Arc::new(TransactionEngine::new(
            TransactionEngineConfig::default(),
        )))
    }

    #[test]
    fn test_lazy_transaction_begin() {
        let mut s = session();
        assert!(s.current_transaction().is_none());
        let txn = s.transaction().unwrap();
        let again = s.transaction().unwrap();
        assert!(Arc::ptr_eq(&txn, &again));
        s.rollback().unwrap();
        assert!(s.current_transaction().is_none());
    }

    #[test]
    fn test_park_and_resume_state() {
        let mut s = session();
        let txn = s.transaction().unwrap();
        s.park_on(TxnId::new(99), ReplicationConflictType::RowLock);
        assert_eq!(s.status(), SessionStatus::Waiting);
        assert_eq!(s.waiting_for(), Some(TxnId::new(99)));
        assert!(s.engine().find_deadlock(TxnId::new(99)).is_none());

        s.resume();
        assert_eq!(s.status(), SessionStatus::Retrying);
        assert_eq!(s.waiting_for(), None);
        assert_eq!(s.conflict(), ReplicationConflictType::None);
        drop(txn);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let mut s = session();
        let handle = s.cancel_handle();
        assert!(!s.is_canceled());
        handle.store(true, Ordering::SeqCst);
        assert!(s.is_canceled());
        s.clear_canceled();
        assert!(!s.is_canceled());
    }
}

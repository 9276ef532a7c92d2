//! Transaction engine
//!
//! Central authority for transaction identity and old-version retention.
//! Ids and commit timestamps come from one monotone counter, so snapshot
//! checks compare them directly. The engine tracks the set of live
//! snapshot-isolated transactions: its minimum gates garbage collection of
//! old-value chains, its maximum gates the retention skip on commit.
//!
//! The engine also keeps the waiter -> holder edges the executor registers
//! while a session is parked on a row lock, and walks them for deadlock
//! detection.

use crate::config::TransactionEngineConfig;
use crate::error::{Error, Result};
use crate::log::{NoopRedoLog, RedoLog};
use crate::old_values::OldValueIndex;
use crate::record::TxnRecord;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use vellum_common::{IsolationLevel, TxnId};

/// Called after a transaction releases its locks: the finished id plus the
/// ids that were parked waiting on it. The executor's scheduler registers
/// one to re-run parked sessions.
pub type ReleaseHook = Box<dyn Fn(TxnId, &[TxnId]) + Send + Sync>;

/// Allocates transaction ids and commit timestamps, tracks live
/// transactions, and decides when old versions may be dropped.
pub struct TransactionEngine<V> {
    config: TransactionEngineConfig,
    next_tid: AtomicU64,
    /// Count of live snapshot-isolated transactions; lock-free gate for the
    /// common no-snapshot-reader case on every commit.
    snapshot_count: AtomicUsize,
    live_snapshots: Mutex<BTreeSet<TxnId>>,
    old_values: OldValueIndex<V>,
    /// Waiter -> holder edges for parked sessions.
    waits: Mutex<HashMap<TxnId, TxnId>>,
    release_hook: Mutex<Option<ReleaseHook>>,
    redo_log: Arc<dyn RedoLog>,
    closed: AtomicBool,
}

impl<V: Send + Sync + 'static> TransactionEngine<V> {
    pub fn new(config: TransactionEngineConfig) -> Self {
        Self::with_redo_log(config, Arc::new(NoopRedoLog))
    }

    pub fn with_redo_log(config: TransactionEngineConfig, redo_log: Arc<dyn RedoLog>) -> Self {
        let first = config.initial_transaction_id.max(1);
        Self {
            config,
            next_tid: AtomicU64::new(first),
            snapshot_count: AtomicUsize::new(0),
            live_snapshots: Mutex::new(BTreeSet::new()),
            old_values: OldValueIndex::new(),
            waits: Mutex::new(HashMap::new()),
            release_hook: Mutex::new(None),
            redo_log,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &TransactionEngineConfig {
        &self.config
    }

    pub fn redo_log(&self) -> &Arc<dyn RedoLog> {
        &self.redo_log
    }

    /// Reinitialize the counter after recovery: the next id handed out is
    /// `max_persisted + 1`.
    pub fn init_transaction_id(&self, max_persisted: TxnId) {
        self.next_tid
            .store(max_persisted.as_u64() + 1, Ordering::SeqCst);
    }

    /// Begin a transaction at the engine's default isolation level.
    pub fn begin_transaction(self: &Arc<Self>, auto_commit: bool) -> Result<Arc<Transaction<V>>> {
        self.begin(auto_commit, self.config.default_isolation)
    }

    /// Begin a transaction at an explicit isolation level.
    pub fn begin(
        self: &Arc<Self>,
        auto_commit: bool,
        isolation: IsolationLevel,
    ) -> Result<Arc<Transaction<V>>> {
        if self.is_closed() {
            return Err(Error::ConnectionBroken);
        }
        let id = self.next_timestamp();
        let record = Arc::new(TxnRecord::new(id, isolation));
        if isolation.is_snapshot() {
            self.live_snapshots.lock().insert(id);
            self.snapshot_count.fetch_add(1, Ordering::SeqCst);
        }
        debug!(txn = %id, ?isolation, "begin transaction");
        Ok(Arc::new(Transaction::new(record, self.clone(), auto_commit)))
    }

    /// Next value of the shared id/timestamp counter.
    pub(crate) fn next_timestamp(&self) -> TxnId {
        TxnId::new(self.next_tid.fetch_add(1, Ordering::SeqCst))
    }

    /// Cheap check used by cell commit to skip version bookkeeping when no
    /// snapshot reader is alive.
    pub fn has_snapshot_readers(&self) -> bool {
        self.snapshot_count.load(Ordering::SeqCst) > 0
    }

    /// Smallest live snapshot-isolated transaction id, or `TxnId::MAX` if
    /// none. Old-value nodes below this line are unreachable.
    pub fn min_live_snapshot_tid(&self) -> TxnId {
        self.live_snapshots
            .lock()
            .iter()
            .next()
            .copied()
            .unwrap_or(TxnId::MAX)
    }

    /// Largest live snapshot-isolated transaction id, if any. When a chain
    /// head already postdates it, committing writers skip chain extension.
    pub(crate) fn max_live_snapshot_tid(&self) -> Option<TxnId> {
        self.live_snapshots.lock().iter().next_back().copied()
    }

    pub fn old_values(&self) -> &OldValueIndex<V> {
        &self.old_values
    }

    /// Drop old-value nodes no live snapshot reader can reach. Runs
    /// opportunistically when such a transaction ends and from the periodic
    /// sweep. Returns how many nodes were dropped.
    pub fn sweep(&self) -> usize {
        if !self.has_snapshot_readers() {
            let dropped = self.old_values.len();
            self.old_values.clear();
            if dropped > 0 {
                debug!(chains = dropped, "dropped all old-value chains");
            }
            return dropped;
        }
        let dropped = self.old_values.prune(self.min_live_snapshot_tid());
        if dropped > 0 {
            debug!(nodes = dropped, "pruned old-value chains");
        }
        dropped
    }

    /// A transaction reached a terminal state: retire it from the live set,
    /// garbage-collect what its departure unpins, and hand its waiters to
    /// the release hook.
    pub(crate) fn transaction_closed(&self, record: &TxnRecord) {
        if record.isolation_level().is_snapshot() {
            self.live_snapshots.lock().remove(&record.id());
            self.snapshot_count.fetch_sub(1, Ordering::SeqCst);
        }
        if !self.old_values.is_empty() {
            self.sweep();
        }
        debug!(txn = %record.id(), status = ?record.status(), "transaction closed");

        let waiters = self.take_waiters(record.id());
        let hook = self.release_hook.lock();
        if let Some(hook) = hook.as_ref() {
            hook(record.id(), &waiters);
        }
    }

    // === Lock-wait tracking ===

    /// Record that `waiter` is parked on a row lock held by `holder`.
    pub fn register_wait(&self, waiter: TxnId, holder: TxnId) {
        self.waits.lock().insert(waiter, holder);
    }

    /// Clear the waiter's edge, e.g. when its session resumes.
    pub fn clear_wait(&self, waiter: TxnId) {
        self.waits.lock().remove(&waiter);
    }

    /// Remove and return everything parked on `holder`, in id order.
    fn take_waiters(&self, holder: TxnId) -> Vec<TxnId> {
        let mut waits = self.waits.lock();
        let mut waiters: Vec<TxnId> = waits
            .iter()
            .filter(|(_, h)| **h == holder)
            .map(|(w, _)| *w)
            .collect();
        for w in &waiters {
            waits.remove(w);
        }
        waiters.sort();
        waiters
    }

    /// Walk "waits for" edges from `start`; a path back to `start` is a
    /// deadlock and the cycle is returned, oldest first.
    pub fn find_deadlock(&self, start: TxnId) -> Option<Vec<TxnId>> {
        let waits = self.waits.lock();
        let mut path = vec![start];
        let mut current = start;
        while let Some(&holder) = waits.get(&current) {
            if holder == start {
                return Some(path);
            }
            if path.contains(&holder) {
                // A cycle not involving us; someone else will break it.
                return None;
            }
            path.push(holder);
            current = holder;
        }
        None
    }

    /// Register the callback that re-schedules parked sessions after a
    /// transaction releases its locks.
    pub fn set_release_hook(&self, hook: ReleaseHook) {
        *self.release_hook.lock() = Some(hook);
    }

    // === Lifecycle ===

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Orderly close: no new transactions; live ones may still finish.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Emergency stop after a fatal error: partial transaction state cannot
    /// be trusted, so everything is abandoned where it stands and recovery
    /// is left to the redo log.
    pub fn shutdown_immediately(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.old_values.clear();
        self.waits.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Engine = TransactionEngine<String>;

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::new(TransactionEngineConfig::default()))
    }

    #[test]
    fn test_ids_are_monotone() {
        let engine = engine();
        let a = engine.begin_transaction(false).unwrap();
        let b = engine.begin_transaction(false).unwrap();
        assert!(a.id() < b.id());
    }

    #[test]
    fn test_counter_recovery() {
        let engine = engine();
        engine.init_transaction_id(TxnId::new(500));
        let t = engine.begin_transaction(false).unwrap();
        assert_eq!(t.id(), TxnId::new(501));
    }

    #[test]
    fn test_live_snapshot_tracking() {
        let engine = engine();
        assert!(!engine.has_snapshot_readers());
        assert_eq!(engine.min_live_snapshot_tid(), TxnId::MAX);

        let rc = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        assert!(!engine.has_snapshot_readers());

        let rr1 = engine.begin(false, IsolationLevel::RepeatableRead).unwrap();
        let rr2 = engine.begin(false, IsolationLevel::Serializable).unwrap();
        assert!(engine.has_snapshot_readers());
        assert_eq!(engine.min_live_snapshot_tid(), rr1.id());
        assert_eq!(engine.max_live_snapshot_tid(), Some(rr2.id()));

        rr1.rollback().unwrap();
        assert_eq!(engine.min_live_snapshot_tid(), rr2.id());

        rr2.rollback().unwrap();
        assert!(!engine.has_snapshot_readers());
        rc.rollback().unwrap();
    }

    #[test]
    fn test_begin_after_close_fails() {
        let engine = engine();
        engine.close();
        assert!(matches!(
            engine.begin_transaction(false),
            Err(Error::ConnectionBroken)
        ));
    }

    #[test]
    fn test_deadlock_walk_finds_cycle() {
        let engine = engine();
        let a = TxnId::new(10);
        let b = TxnId::new(20);
        let c = TxnId::new(30);

        engine.register_wait(a, b);
        assert!(engine.find_deadlock(a).is_none());

        engine.register_wait(b, c);
        engine.register_wait(c, a);
        let cycle = engine.find_deadlock(a).unwrap();
        assert_eq!(cycle, vec![a, b, c]);

        // A bystander chained onto the cycle is not itself deadlocked.
        let d = TxnId::new(40);
        engine.register_wait(d, a);
        assert!(engine.find_deadlock(d).is_none());
    }

    #[test]
    fn test_release_hook_receives_waiters() {
        let engine = engine();
        let seen: Arc<Mutex<Vec<(TxnId, Vec<TxnId>)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.set_release_hook(Box::new(move |holder, waiters| {
            sink.lock().push((holder, waiters.to_vec()));
        }));

        let holder = engine.begin_transaction(false).unwrap();
        engine.register_wait(TxnId::new(100), holder.id());
        engine.register_wait(TxnId::new(90), holder.id());
        holder.rollback().unwrap();

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, holder.id());
        assert_eq!(events[0].1, vec![TxnId::new(90), TxnId::new(100)]);
    }
}

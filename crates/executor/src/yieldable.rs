//! Yieldable DML execution
//!
//! One statement is a state machine over `{Start, Execute, Stop}` with a
//! resume anchor, not a continuation: `run` drives it one cooperative step
//! and returns `true` to mean "suspended, call me again". A row-lock
//! conflict parks the whole statement and records the holder; the scheduler
//! invokes [`Yieldable::back`] before re-running it against the same cursor
//! position.
//!
//! Error policy: `ConcurrentUpdate` never leaves the loop - it retries
//! until the session lock timeout, then escalates via the wait-graph walk
//! to `Deadlock` (full rollback) or `LockTimeout` (rollback to the pre-row
//! savepoint). Out-of-memory bypasses the stop path and shuts the engine
//! down where it stands.

use crate::error::{ExecuteError, Result};
use crate::session::Session;
use crate::statement::{DmlOp, DmlStatement, RowFilter, RowHooks};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use vellum_common::{ReplicationConflictType, SessionStatus};
use vellum_transaction::{Error as EngineError, TransactionMap, TryLockRow};

/// Rows between cancellation checks and cooperative yields.
const YIELD_STRIDE: usize = 128;

/// Callback receiving the statement result instead of `take_result`.
pub type ResultHandler = Box<dyn FnOnce(Result<usize>) + Send>;

/// A long-running statement executing in cooperative steps.
pub trait Yieldable<V> {
    /// Drive one step. Returns `true` when suspended (re-run later) and
    /// `false` when finished or failed synchronously.
    fn run(&mut self, session: &mut Session<V>) -> bool;

    /// Resume hook the scheduler calls before re-running after a conflict.
    fn back(&mut self, session: &mut Session<V>);

    fn statement_text(&self) -> &str;

    /// When the current lock wait began, if the statement is parked.
    fn lock_wait_started(&self) -> Option<Instant>;

    /// The result, once finished, unless an async handler consumed it.
    fn take_result(&mut self) -> Option<Result<usize>>;
}

enum LoopState {
    Start,
    Execute,
    Stop,
}

enum StepOutcome {
    Suspended,
    Finished,
}

enum StepError {
    Engine(EngineError),
    Canceled,
}

/// Per-scan mutable state, grouped so the row loop can borrow it alongside
/// the statement closures.
#[derive(Default)]
struct ScanState {
    idx: usize,
    row_savepoint: usize,
    update_count: usize,
    pending_ops: usize,
    row_scan_count: usize,
}

/// Yieldable executor for one DML statement against one map.
pub struct YieldableDml<K, V> {
    map: TransactionMap<K, V>,
    statement: DmlStatement<K, V>,
    handler: Option<ResultHandler>,
    state: LoopState,
    /// Candidate keys snapshotted at statement start (delete/update).
    keys: Vec<K>,
    insert_idx: usize,
    /// Cursor anchor for resuming after a row-lock conflict.
    resume_key: Option<K>,
    scan: ScanState,
    lock_start: Option<Instant>,
    start_time: Option<Instant>,
    result: Option<Result<usize>>,
}

impl<K, V> YieldableDml<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Bind a statement to the map it runs against. The map's transaction
    /// becomes the session's transaction when the statement starts.
    pub fn new(
        map: TransactionMap<K, V>,
        statement: DmlStatement<K, V>,
        handler: Option<ResultHandler>,
    ) -> Self {
        Self {
            map,
            statement,
            handler,
            state: LoopState::Start,
            keys: Vec::new(),
            insert_idx: 0,
            resume_key: None,
            scan: ScanState::default(),
            lock_start: None,
            start_time: None,
            result: None,
        }
    }

    pub fn update_count(&self) -> usize {
        self.scan.update_count
    }

    /// Mutations scheduled against storage that have not completed yet.
    /// Zero whenever the statement is suspended or finished.
    pub fn pending_operation_count(&self) -> usize {
        self.scan.pending_ops
    }

    fn start(&mut self, session: &mut Session<V>) -> std::result::Result<(), StepError> {
        session.adopt_transaction(self.map.transaction());
        let txn = session.transaction().map_err(StepError::Engine)?;
        if !Arc::ptr_eq(&txn, self.map.transaction()) {
            return Err(StepError::Engine(EngineError::Internal(
                "statement map is bound to a foreign transaction".into(),
            )));
        }
        session.set_status(SessionStatus::StatementRunning);
        self.start_time = Some(Instant::now());
        self.scan.row_savepoint = txn.savepoint_id();
        if matches!(
            self.statement.op,
            DmlOp::Delete { .. } | DmlOp::Update { .. }
        ) {
            // Candidate rows: every key with a row visible at scan start.
            // Keys that vanish or stop matching are re-checked row by row.
            self.keys = self.map.iter().map(|(k, _)| k).collect();
        }
        Ok(())
    }

    fn execute_step(
        &mut self,
        session: &mut Session<V>,
    ) -> std::result::Result<StepOutcome, StepError> {
        let DmlStatement {
            op, limit, hooks, ..
        } = &mut self.statement;
        let scan = &mut self.scan;

        match op {
            DmlOp::Insert { rows } => {
                let txn = self.map.transaction().clone();
                while self.insert_idx < rows.len() {
                    if limit.is_some_and(|l| scan.update_count >= l) {
                        break;
                    }
                    scan.row_scan_count += 1;
                    if scan.row_scan_count % YIELD_STRIDE == 0 {
                        if session.is_canceled() {
                            return Err(StepError::Canceled);
                        }
                        return Ok(StepOutcome::Suspended);
                    }

                    scan.row_savepoint = txn.savepoint_id();
                    let (key, row) = rows[self.insert_idx].clone();
                    if let Some(before) = hooks.before.as_mut() {
                        if !before(&row) {
                            self.insert_idx += 1;
                            continue;
                        }
                    }
                    let after_row = hooks.after.as_mut().map(|_| row.clone());
                    scan.pending_ops += 1;
                    match self.map.put(key, row) {
                        Ok(()) => {
                            if let (Some(after), Some(row)) = (hooks.after.as_mut(), &after_row) {
                                after(row);
                            }
                            scan.pending_ops -= 1;
                            scan.update_count += 1;
                            self.insert_idx += 1;
                        }
                        Err(e) => {
                            scan.pending_ops -= 1;
                            if matches!(e, EngineError::ConcurrentUpdate(_)) {
                                // Lost an insert race on a fresh key.
                                session.set_conflict(ReplicationConflictType::Append);
                            }
                            return Err(StepError::Engine(e));
                        }
                    }
                }
                Ok(StepOutcome::Finished)
            }
            DmlOp::Delete { filter } => scan_rows(
                session,
                &self.map,
                &self.keys,
                &mut self.resume_key,
                scan,
                &mut self.lock_start,
                *limit,
                hooks,
                filter,
                &mut |map, key, _row| map.remove(key),
            ),
            DmlOp::Update { filter, apply } => scan_rows(
                session,
                &self.map,
                &self.keys,
                &mut self.resume_key,
                scan,
                &mut self.lock_start,
                *limit,
                hooks,
                filter,
                &mut |map, key, row| map.put(key.clone(), apply(row.as_ref())),
            ),
        }
    }

    /// Apply the propagation policy to a step error. Returns whether the
    /// statement is suspended (retrying) rather than finished.
    fn handle_error(&mut self, session: &mut Session<V>, error: StepError) -> bool {
        let text = self.statement.text.clone();
        match error {
            StepError::Canceled => {
                if let Some(txn) = session.current_transaction() {
                    let _ = txn.rollback_to_savepoint(self.scan.row_savepoint);
                }
                self.finish_with(session, Err(ExecuteError::Canceled { statement: text }));
                false
            }
            StepError::Engine(EngineError::ConcurrentUpdate(map_name)) => {
                match self.lock_start {
                    None => {
                        self.lock_start = Some(Instant::now());
                        session.set_status(SessionStatus::Retrying);
                        true
                    }
                    Some(started) if started.elapsed() <= session.lock_timeout() => {
                        session.set_status(SessionStatus::Retrying);
                        true
                    }
                    Some(_) => {
                        // Waited past the timeout: a cycle means deadlock,
                        // otherwise the wait itself is the failure.
                        let cycle = session.check_deadlock();
                        session.clear_wait_edge();
                        let result = match cycle {
                            Some(cycle) => {
                                let details = cycle
                                    .iter()
                                    .map(|id| id.to_string())
                                    .collect::<Vec<_>>()
                                    .join(" -> ");
                                warn!(%map_name, %details, "deadlock, rolling back");
                                let _ = session.rollback();
                                Err(ExecuteError::statement(
                                    text,
                                    EngineError::Deadlock { details },
                                ))
                            }
                            None => {
                                if let Some(txn) = session.current_transaction() {
                                    let _ =
                                        txn.rollback_to_savepoint(self.scan.row_savepoint);
                                }
                                Err(ExecuteError::statement(text, EngineError::LockTimeout))
                            }
                        };
                        self.finish_with(session, result);
                        false
                    }
                }
            }
            StepError::Engine(EngineError::Deadlock { details }) => {
                let _ = session.rollback();
                self.finish_with(
                    session,
                    Err(ExecuteError::statement(
                        text,
                        EngineError::Deadlock { details },
                    )),
                );
                false
            }
            StepError::Engine(EngineError::OutOfMemory) => {
                // Partial transaction state cannot be trusted: skip the
                // stop path entirely and halt the engine.
                session.engine().shutdown_immediately();
                self.finish_with(
                    session,
                    Err(ExecuteError::statement(text, EngineError::OutOfMemory)),
                );
                false
            }
            StepError::Engine(other) => {
                if let Some(txn) = session.current_transaction() {
                    let _ = txn.rollback_to_savepoint(self.scan.row_savepoint);
                }
                self.finish_with(session, Err(ExecuteError::statement(text, other)));
                false
            }
        }
    }

    fn stop(&mut self, session: &mut Session<V>) {
        session.clear_wait_edge();
        if let Some(start) = self.start_time {
            let elapsed = start.elapsed();
            if elapsed > session.engine().config().slow_statement_threshold {
                info!(
                    statement = %self.statement.text,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow statement"
                );
            }
        }
        let count = self.scan.update_count;
        if session.is_auto_commit() {
            if let Err(e) = session.commit() {
                let text = self.statement.text.clone();
                self.finish_with(session, Err(ExecuteError::statement(text, e)));
                return;
            }
        }
        self.finish_with(session, Ok(count));
    }

    fn finish_with(&mut self, session: &mut Session<V>, result: Result<usize>) {
        session.set_status(SessionStatus::StatementCompleted);
        match self.handler.take() {
            Some(handler) => handler(result),
            None => self.result = Some(result),
        }
    }
}

impl<K, V> Yieldable<V> for YieldableDml<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn run(&mut self, session: &mut Session<V>) -> bool {
        loop {
            match self.state {
                LoopState::Start => match self.start(session) {
                    Ok(()) => self.state = LoopState::Execute,
                    Err(e) => return self.handle_error(session, e),
                },
                LoopState::Execute => match self.execute_step(session) {
                    Ok(StepOutcome::Suspended) => return true,
                    Ok(StepOutcome::Finished) => self.state = LoopState::Stop,
                    Err(e) => return self.handle_error(session, e),
                },
                LoopState::Stop => {
                    self.stop(session);
                    return false;
                }
            }
        }
    }

    fn back(&mut self, session: &mut Session<V>) {
        session.resume();
    }

    fn statement_text(&self) -> &str {
        &self.statement.text
    }

    fn lock_wait_started(&self) -> Option<Instant> {
        self.lock_start
    }

    fn take_result(&mut self) -> Option<Result<usize>> {
        self.result.take()
    }
}

/// The per-row loop shared by delete and update.
#[allow(clippy::too_many_arguments)]
fn scan_rows<K, V>(
    session: &mut Session<V>,
    map: &TransactionMap<K, V>,
    keys: &[K],
    resume_key: &mut Option<K>,
    scan: &mut ScanState,
    lock_start: &mut Option<Instant>,
    limit: Option<usize>,
    hooks: &mut RowHooks<V>,
    filter: &mut RowFilter<K, V>,
    mutate: &mut dyn FnMut(&TransactionMap<K, V>, &K, &Arc<V>) -> vellum_transaction::Result<()>,
) -> std::result::Result<StepOutcome, StepError>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let txn = map.transaction().clone();

    // Resuming from a conflict: rebuild the cursor position at the saved
    // row and re-run its checks from scratch.
    if let Some(anchor) = resume_key.take() {
        if let Some(pos) = keys.iter().position(|k| *k == anchor) {
            scan.idx = pos;
        }
    }

    while scan.idx < keys.len() {
        if limit.is_some_and(|l| scan.update_count >= l) {
            return Ok(StepOutcome::Finished);
        }
        scan.row_scan_count += 1;
        if scan.row_scan_count % YIELD_STRIDE == 0 {
            if session.is_canceled() {
                return Err(StepError::Canceled);
            }
            // Cooperative yield: give the scheduler a chance even without
            // a conflict. The row is re-entered on the next run.
            return Ok(StepOutcome::Suspended);
        }

        let key = keys[scan.idx].clone();
        let Some(row) = map.get(&key) else {
            scan.idx += 1;
            continue;
        };
        if !filter(&key, &row) {
            scan.idx += 1;
            continue;
        }

        scan.row_savepoint = txn.savepoint_id();
        match map.try_lock_row(&key).map_err(StepError::Engine)? {
            TryLockRow::NotFound => {
                scan.idx += 1;
            }
            TryLockRow::Conflict { holder } => {
                if let Some(started) = *lock_start {
                    if started.elapsed() > session.lock_timeout() {
                        // Let the retry policy escalate this wait.
                        *resume_key = Some(key);
                        return Err(StepError::Engine(EngineError::ConcurrentUpdate(
                            map.name().to_string(),
                        )));
                    }
                } else {
                    *lock_start = Some(Instant::now());
                }
                *resume_key = Some(key);
                session.set_current_locked_row(Some(row));
                session.park_on(holder, ReplicationConflictType::RowLock);
                return Ok(StepOutcome::Suspended);
            }
            TryLockRow::Locked => {
                session.clear_wait_edge();
                session.set_current_locked_row(None);
                *lock_start = None;
                // The row may have changed between the visibility read and
                // the lock; what we own now is the committed truth.
                let Some(current) = map.get(&key) else {
                    scan.idx += 1;
                    continue;
                };
                if !filter(&key, &current) {
                    scan.idx += 1;
                    continue;
                }
                let vetoed = match hooks.before.as_mut() {
                    Some(before) => !before(&current),
                    None => false,
                };
                if !vetoed {
                    scan.pending_ops += 1;
                    let applied = mutate(map, &key, &current);
                    scan.pending_ops -= 1;
                    applied.map_err(StepError::Engine)?;
                    if let Some(after) = hooks.after.as_mut() {
                        after(&current);
                    }
                    scan.update_count += 1;
                }
                scan.idx += 1;
            }
        }
    }
    Ok(StepOutcome::Finished)
}

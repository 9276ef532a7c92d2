//! Session-visible execution state
//!
//! The executor publishes these values upward so the scheduler and the
//! protocol layer can tell why a session stopped making progress.

use serde::{Deserialize, Serialize};

/// Scheduler-visible status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// No transaction has been started on this session yet.
    TransactionNotStart,
    /// A statement is currently executing.
    StatementRunning,
    /// The last statement finished (successfully or with an error).
    StatementCompleted,
    /// Parked on a row lock; the scheduler re-runs the session when the
    /// holder releases.
    Waiting,
    /// Re-attempting after a lost row-lock race.
    Retrying,
}

/// Kind of conflict that parked the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationConflictType {
    None,
    /// Lost an insert race on a key that did not exist yet.
    Append,
    /// Blocked on another transaction's row lock.
    RowLock,
}

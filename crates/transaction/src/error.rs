//! Error types for the transaction core

use thiserror::Error;

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transaction core
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A row-lock compare-and-set was lost. Callers retry; the executor's
    /// loop upgrades repeated losses to `Deadlock` or `LockTimeout`.
    #[error("concurrent update on map {0}")]
    ConcurrentUpdate(String),

    /// A cycle was found among lock waiters.
    #[error("deadlock detected: {details}")]
    Deadlock { details: String },

    /// Waited past the session lock timeout with no cycle found.
    #[error("lock wait timed out")]
    LockTimeout,

    /// Fatal; partial transaction state cannot be trusted and the engine
    /// shuts down immediately.
    #[error("out of memory")]
    OutOfMemory,

    /// The database was closed mid-statement.
    #[error("connection broken: the database is closed")]
    ConnectionBroken,

    /// Invariant violation.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Storage(#[from] vellum_storage::Error),
}

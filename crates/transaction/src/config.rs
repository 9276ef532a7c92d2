//! Configuration for the transaction engine

use std::time::Duration;
use vellum_common::IsolationLevel;

/// Configuration for a [`TransactionEngine`](crate::TransactionEngine).
#[derive(Debug, Clone)]
pub struct TransactionEngineConfig {
    /// Isolation level for transactions begun without an explicit one.
    /// Default: read committed.
    pub default_isolation: IsolationLevel,

    /// How long a session may wait on a row lock before deadlock detection
    /// runs and the wait is broken. Default: 2 seconds.
    pub lock_timeout: Duration,

    /// How often the periodic old-version sweep should run.
    /// Default: 60 seconds.
    pub old_value_sweep_interval: Duration,

    /// Statements slower than this are logged. Default: 100 milliseconds.
    pub slow_statement_threshold: Duration,

    /// First transaction id to hand out. Recovery replaces this via
    /// `init_transaction_id` with max persisted + 1.
    pub initial_transaction_id: u64,
}

impl Default for TransactionEngineConfig {
    fn default() -> Self {
        Self {
            default_isolation: IsolationLevel::ReadCommitted,
            lock_timeout: Duration::from_secs(2),
            old_value_sweep_interval: Duration::from_secs(60),
            slow_statement_threshold: Duration::from_millis(100),
            initial_transaction_id: 1,
        }
    }
}

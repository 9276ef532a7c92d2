//! Transaction isolation levels

use serde::{Deserialize, Serialize};

/// Isolation level of a transaction.
///
/// The two snapshot levels (repeatable read and serializable) share one
/// visibility rule: the transaction id doubles as the snapshot marker, so
/// a reader sees exactly the commits whose timestamp is `<=` its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Whether this level reads from a fixed snapshot and therefore needs
    /// old versions retained while the transaction is live.
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        )
    }
}

//! Shared value types for the Vellum transaction core
//!
//! This crate defines:
//! - Transaction identity (a single monotone counter namespace shared with
//!   commit timestamps)
//! - Isolation levels and transaction status
//! - Session-visible status enums the executor publishes upward

mod isolation;
mod session_status;
mod txn_id;
mod txn_status;

pub use isolation::IsolationLevel;
pub use session_status::ReplicationConflictType;
pub use session_status::SessionStatus;
pub use txn_id::TxnId;
pub use txn_status::TxnStatus;

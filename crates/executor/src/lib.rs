//! Row-level DML execution on top of the transaction core
//!
//! One DML statement runs as a [`Yieldable`]: a state machine that executes
//! in cooperative steps and returns control whenever it would otherwise
//! block. A row-lock conflict parks the whole statement; the scheduler
//! re-runs it when the holder releases, and the retry policy upgrades waits
//! that outlive the session lock timeout into deadlock or lock-timeout
//! errors.
//!
//! Sessions own the transaction and publish scheduler-visible state:
//! status, conflict kind, and the transaction currently being waited on.

pub mod error;
pub mod scheduler;
pub mod session;
pub mod statement;
pub mod yieldable;

pub use error::{ExecuteError, Result};
pub use scheduler::Scheduler;
pub use session::Session;
pub use statement::{DmlOp, DmlStatement, RowFilter, RowHooks, RowTransform};
pub use yieldable::{ResultHandler, Yieldable, YieldableDml};

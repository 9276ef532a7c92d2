//! Multi-version concurrency-control transaction core
//!
//! This crate sits between the SQL executor and the key-value storage. It
//! owns per-row locking, visibility under four isolation levels, old-version
//! retention for snapshot readers, and commit/rollback sequencing.
//!
//! # Architecture
//!
//! Every row is a [`VersionedCell`]: the current value plus an optional
//! in-flight [`RowLock`] carrying the writer and the pre-image. Acquisition
//! is a lock-free compare-and-set on the cell's owner word. Prior committed
//! values live in per-cell [`OldValue`] chains held by the
//! [`TransactionEngine`]'s old-value index, retained only while a
//! repeatable-read or serializable transaction is live. The
//! [`visibility`] oracle is shared between point reads and cursors.
//!
//! Transactions are driven single-writer by their session; the engine hands
//! out ids and commit timestamps from one monotone counter so the two are
//! comparable in snapshot checks.

pub mod cell;
pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod map;
pub mod old_values;
pub mod record;
pub mod transaction;
pub mod visibility;

pub use cell::{CellId, RowLock, VersionedCell};
pub use config::TransactionEngineConfig;
pub use engine::{ReleaseHook, TransactionEngine};
pub use error::{Error, Result};
pub use log::{FlushCallback, NoopRedoLog, QueuedRedoLog, RedoLog};
pub use map::{TransactionMap, TransactionMapCursor, TryLockRow};
pub use old_values::{OldValue, OldValueIndex};
pub use record::TxnRecord;
pub use transaction::Transaction;
pub use visibility::{read_visible, Visibility};

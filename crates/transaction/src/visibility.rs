//! Visibility oracle
//!
//! One function decides what a transaction sees in a cell; point reads and
//! scan cursors both go through it. The caller's transaction id doubles as
//! the snapshot marker under repeatable read and serializable, so there is
//! no separate read timestamp: a reader with id `r` sees every commit whose
//! timestamp is `<= r`.

use crate::cell::{RowLock, VersionedCell};
use crate::engine::TransactionEngine;
use crate::record::TxnRecord;
use std::sync::Arc;
use vellum_common::IsolationLevel;

/// What a transaction sees in a cell.
///
/// `Visible(None)` is a present row whose payload slot is empty (a deleted
/// row, or a stored null); `Sightless` means no version of the row is
/// visible to this reader at all. The distinction matters to the layers
/// that track row existence separately from row content.
pub enum Visibility<V> {
    Visible(Option<Arc<V>>),
    Sightless,
}

impl<V> Visibility<V> {
    pub fn is_sightless(&self) -> bool {
        matches!(self, Visibility::Sightless)
    }

    /// The visible row payload, collapsing `Sightless` and deleted rows
    /// into absence.
    pub fn into_row(self) -> Option<Arc<V>> {
        match self {
            Visibility::Visible(value) => value,
            Visibility::Sightless => None,
        }
    }
}

/// The value `reader` must see in `cell`.
pub fn read_visible<V: Send + Sync + 'static>(
    cell: &VersionedCell<V>,
    reader: &TxnRecord,
    engine: &TransactionEngine<V>,
) -> Visibility<V> {
    let (value, lock) = cell.snapshot();

    // A transaction always sees its own writes, at every isolation level.
    if let Some(lock) = &lock {
        if lock.owner().id() == reader.id() {
            return Visibility::Visible(value);
        }
    }

    match reader.isolation_level() {
        IsolationLevel::ReadUncommitted => Visibility::Visible(value),
        IsolationLevel::ReadCommitted => read_committed(value, lock),
        IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
            snapshot_read(cell, value, lock, reader, engine)
        }
    }
}

fn read_committed<V>(value: Option<Arc<V>>, lock: Option<RowLock<V>>) -> Visibility<V> {
    match lock {
        None => Visibility::Visible(value),
        Some(lock) => {
            if lock.is_committed() {
                Visibility::Visible(value)
            } else if lock.pre_image().is_none() {
                // An uncommitted insert: the row does not exist yet.
                Visibility::Sightless
            } else {
                Visibility::Visible(lock.pre_image().cloned())
            }
        }
    }
}

fn snapshot_read<V: Send + Sync + 'static>(
    cell: &VersionedCell<V>,
    value: Option<Arc<V>>,
    lock: Option<RowLock<V>>,
    reader: &TxnRecord,
    engine: &TransactionEngine<V>,
) -> Visibility<V> {
    let rtid = reader.id();

    if let Some(lock) = &lock {
        if lock.is_committed() {
            if let Some(commit_ts) = lock.owner().commit_timestamp() {
                if rtid >= commit_ts {
                    return Visibility::Visible(value);
                }
            }
        }
    }

    if let Some(head) = engine.old_values().head(cell.id()) {
        if rtid >= head.tid() {
            // The newest committed version is within the snapshot. With a
            // writer in flight the committed value is its pre-image; bare
            // cells hold it directly.
            return match &lock {
                Some(lock) => Visibility::Visible(lock.pre_image().cloned()),
                None => Visibility::Visible(value),
            };
        }
        let mut node = Some(head);
        while let Some(n) = node {
            if rtid >= n.tid() {
                return Visibility::Visible(n.value());
            }
            node = n.next();
        }
        // Every chain entry postdates the reader: the row was created
        // after this snapshot.
        return Visibility::Sightless;
    }

    match &lock {
        Some(lock) => match lock.pre_image() {
            Some(pre_image) => Visibility::Visible(Some(pre_image.clone())),
            None => Visibility::Sightless,
        },
        None => Visibility::Visible(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::LockAttempt;
    use crate::config::TransactionEngineConfig;
    use crate::transaction::Transaction;
    use std::sync::Arc;

    type Engine = TransactionEngine<String>;

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::new(TransactionEngineConfig::default()))
    }

    fn val(s: &str) -> Option<Arc<String>> {
        Some(Arc::new(s.to_string()))
    }

    fn committed_cell(value: &str) -> Arc<VersionedCell<String>> {
        Arc::new(VersionedCell::new_committed(val(value)))
    }

    fn lock(txn: &Transaction<String>, cell: &Arc<VersionedCell<String>>) {
        assert!(matches!(txn.try_lock_cell(cell), LockAttempt::Acquired));
    }

    fn as_str(v: &Visibility<String>) -> Option<String> {
        match v {
            Visibility::Visible(Some(s)) => Some(s.as_ref().clone()),
            _ => None,
        }
    }

    #[test]
    fn test_own_write_always_visible() {
        let engine = engine();
        let writer = engine.begin(false, IsolationLevel::Serializable).unwrap();
        let cell = committed_cell("old");
        lock(&writer, &cell);
        cell.set_value(val("mine"));

        let seen = read_visible(&cell, writer.record(), &engine);
        assert_eq!(as_str(&seen), Some("mine".to_string()));
    }

    #[test]
    fn test_read_uncommitted_sees_dirty_value() {
        let engine = engine();
        let writer = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        let reader = engine.begin(false, IsolationLevel::ReadUncommitted).unwrap();
        let cell = committed_cell("old");
        lock(&writer, &cell);
        cell.set_value(val("dirty"));

        let seen = read_visible(&cell, reader.record(), &engine);
        assert_eq!(as_str(&seen), Some("dirty".to_string()));
    }

    #[test]
    fn test_read_committed_sees_pre_image_of_uncommitted_writer() {
        let engine = engine();
        let writer = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        let reader = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        let cell = committed_cell("old");
        lock(&writer, &cell);
        cell.set_value(val("dirty"));

        let seen = read_visible(&cell, reader.record(), &engine);
        assert_eq!(as_str(&seen), Some("old".to_string()));
    }

    #[test]
    fn test_read_committed_hides_uncommitted_insert() {
        let engine = engine();
        let writer = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        let reader = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        let cell = writer.insert_cell(val("new-row"));

        let seen = read_visible(&cell, reader.record(), &engine);
        assert!(seen.is_sightless());
    }

    #[test]
    fn test_read_committed_sees_value_once_commit_point_passes() {
        // Async commit against a deferred log: the commit point has passed
        // but the flush has not acknowledged, so the lock is still held.
        let deferred = Arc::new(crate::log::QueuedRedoLog::new());
        let engine = Arc::new(Engine::with_redo_log(
            TransactionEngineConfig::default(),
            deferred.clone(),
        ));
        let writer = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        let reader = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        let cell = committed_cell("old");
        lock(&writer, &cell);
        cell.set_value(val("new"));
        writer.async_commit(Box::new(|| {})).unwrap();
        assert!(cell.lock_owner().is_some());

        let seen = read_visible(&cell, reader.record(), &engine);
        assert_eq!(as_str(&seen), Some("new".to_string()));

        deferred.ack_all();
        assert!(cell.lock_owner().is_none());
    }

    #[test]
    fn test_snapshot_reader_walks_chain() {
        let engine = engine();
        // Old reader pins the chain.
        let reader = engine.begin(false, IsolationLevel::RepeatableRead).unwrap();

        let cell = committed_cell("v0");

        // A later writer overwrites and commits, publishing the chain.
        let writer = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        lock(&writer, &cell);
        cell.set_value(val("v1"));
        writer.commit().unwrap();

        // The snapshot reader still sees v0 through the chain tail.
        let seen = read_visible(&cell, reader.record(), &engine);
        assert_eq!(as_str(&seen), Some("v0".to_string()));

        // A fresh snapshot reader sees the new head.
        let fresh = engine.begin(false, IsolationLevel::RepeatableRead).unwrap();
        let seen = read_visible(&cell, fresh.record(), &engine);
        assert_eq!(as_str(&seen), Some("v1".to_string()));
    }

    #[test]
    fn test_snapshot_reader_blind_to_newer_insert() {
        let engine = engine();
        let reader = engine.begin(false, IsolationLevel::RepeatableRead).unwrap();

        let writer = engine.begin(false, IsolationLevel::ReadCommitted).unwrap();
        let cell = writer.insert_cell(val("born-later"));
        writer.commit().unwrap();

        // The insert committed after the reader began.
        let seen = read_visible(&cell, reader.record(), &engine);
        assert!(seen.is_sightless());
    }
}

//! Transaction-bound map view
//!
//! A [`TransactionMap`] is one transaction's window onto one storage map:
//! every read goes through the visibility oracle, every write goes through
//! the row-lock protocol. Deletes are tombstones: the cell stays in the map
//! with an empty payload and reads treat it as absent, leaving physical key
//! removal to the storage layer's own compaction.

use crate::cell::{LockAttempt, VersionedCell};
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use crate::visibility::{read_visible, Visibility};
use std::ops::Bound;
use std::sync::Arc;
use vellum_common::TxnId;
use vellum_storage::StorageMap;

/// Outcome of a row-lock attempt through the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockRow {
    /// This transaction now holds (or already held) the row.
    Locked,
    /// Another transaction holds the row.
    Conflict { holder: TxnId },
    /// No such key.
    NotFound,
}

/// One transaction's view of an ordered key to versioned-cell map.
pub struct TransactionMap<K, V> {
    txn: Arc<Transaction<V>>,
    map: Arc<dyn StorageMap<K, VersionedCell<V>>>,
}

impl<K, V> TransactionMap<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(txn: Arc<Transaction<V>>, map: Arc<dyn StorageMap<K, VersionedCell<V>>>) -> Self {
        Self { txn, map }
    }

    pub fn name(&self) -> &str {
        self.map.name()
    }

    pub fn transaction(&self) -> &Arc<Transaction<V>> {
        &self.txn
    }

    /// The row this transaction sees under `key`, if any.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.visibility(key).into_row()
    }

    /// Full visibility verdict for `key`, distinguishing a deleted row from
    /// one no version of which is visible.
    pub fn visibility(&self, key: &K) -> Visibility<V> {
        match self.map.get(key) {
            None => Visibility::Sightless,
            Some(cell) => read_visible(&cell, self.txn.record(), self.txn.engine()),
        }
    }

    /// Write `value` under `key`, locking the row.
    ///
    /// Fails with `ConcurrentUpdate` when another transaction holds the row
    /// or wins the insert race; the executor's retry loop owns that error.
    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.write_cell(key, Some(Arc::new(value)))
    }

    /// Write `value` unless this transaction already sees a row under
    /// `key`; returns the existing row when it does.
    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<Arc<V>>> {
        if let Some(existing) = self.get(&key) {
            return Ok(Some(existing));
        }
        self.put(key, value)?;
        Ok(None)
    }

    /// Delete the row under `key` by tombstoning its cell. Removing a
    /// missing key is a no-op.
    pub fn remove(&self, key: &K) -> Result<()> {
        if self.map.get(key).is_none() {
            return Ok(());
        }
        self.write_cell(key.clone(), None)
    }

    /// Lock the row under `key` without mutating it. The DML loop calls
    /// this before each mutation so a conflict can park the statement with
    /// the holder's identity instead of surfacing an error.
    pub fn try_lock_row(&self, key: &K) -> Result<TryLockRow> {
        self.txn.ensure_active()?;
        let Some(cell) = self.map.get(key) else {
            return Ok(TryLockRow::NotFound);
        };
        loop {
            match self.txn.try_lock_cell(&cell) {
                LockAttempt::Acquired | LockAttempt::Reentrant => return Ok(TryLockRow::Locked),
                LockAttempt::Conflict => {
                    if let Some(owner) = cell.lock_owner() {
                        return Ok(TryLockRow::Conflict { holder: owner.id() });
                    }
                    // The holder released between the failed compare-and-set
                    // and the owner read; take another swing.
                }
            }
        }
    }

    fn write_cell(&self, key: K, value: Option<Arc<V>>) -> Result<()> {
        self.txn.ensure_active()?;
        if let Some(cell) = self.map.get(&key) {
            match self.txn.try_lock_cell(&cell) {
                LockAttempt::Acquired | LockAttempt::Reentrant => {
                    cell.set_value(value);
                    Ok(())
                }
                LockAttempt::Conflict => Err(Error::ConcurrentUpdate(self.name().to_string())),
            }
        } else {
            let Some(value) = value else {
                return Ok(());
            };
            let cell = self.txn.insert_cell(Some(value));
            match self.map.try_insert(key, cell.clone()) {
                Ok(()) => Ok(()),
                Err(_existing) => {
                    self.txn.discard_insert(&cell);
                    Err(Error::ConcurrentUpdate(self.name().to_string()))
                }
            }
        }
    }

    /// Cursor over the rows visible to this transaction in `range`.
    pub fn cursor(&self, range: (Bound<K>, Bound<K>)) -> TransactionMapCursor<K, V> {
        TransactionMapCursor {
            txn: self.txn.clone(),
            map: self.map.clone(),
            keys: self.map.range_keys(range).into_iter(),
        }
    }

    /// Cursor over every visible row.
    pub fn iter(&self) -> TransactionMapCursor<K, V> {
        self.cursor((Bound::Unbounded, Bound::Unbounded))
    }

    /// Smallest key with a visible row.
    pub fn first_key(&self) -> Option<K> {
        self.iter().next().map(|(k, _)| k)
    }

    /// Largest key with a visible row.
    pub fn last_key(&self) -> Option<K> {
        let keys = self.map.range_keys((Bound::Unbounded, Bound::Unbounded));
        for key in keys.into_iter().rev() {
            if self.get(&key).is_some() {
                return Some(key);
            }
        }
        None
    }

    /// Number of rows visible to this transaction. Walks the map.
    pub fn count(&self) -> usize {
        self.iter().count()
    }
}

/// Iterator over the `(key, row)` pairs a transaction sees in a range.
///
/// Operates on a key snapshot taken at construction; each step re-reads the
/// cell through the visibility oracle, so the cursor never holds a map
/// latch across user code.
pub struct TransactionMapCursor<K, V> {
    txn: Arc<Transaction<V>>,
    map: Arc<dyn StorageMap<K, VersionedCell<V>>>,
    keys: std::vec::IntoIter<K>,
}

impl<K, V> Iterator for TransactionMapCursor<K, V>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        for key in self.keys.by_ref() {
            let Some(cell) = self.map.get(&key) else {
                continue;
            };
            if let Some(row) = read_visible(&cell, self.txn.record(), self.txn.engine()).into_row()
            {
                return Some((key, row));
            }
        }
        None
    }
}

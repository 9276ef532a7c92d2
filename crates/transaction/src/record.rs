//! Shared transaction record
//!
//! Row locks hold a reference to the writer from every cell it touches, so
//! the identity-and-state part of a transaction is split into this small
//! record: immutable identity plus atomically published status and commit
//! timestamp. The full descriptor with its lock list lives in
//! [`Transaction`](crate::Transaction) and is owned by the session, which
//! keeps the cell -> transaction -> cell reference cycle from forming.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use vellum_common::{IsolationLevel, TxnId, TxnStatus};

/// Identity and published state of one transaction.
pub struct TxnRecord {
    id: TxnId,
    isolation: IsolationLevel,
    status: AtomicU8,
    /// Commit timestamp, 0 until assigned. Assignment is the commit point
    /// observed by readers; the status flips to committed only after the
    /// redo log acknowledges.
    commit_ts: AtomicU64,
}

impl TxnRecord {
    pub(crate) fn new(id: TxnId, isolation: IsolationLevel) -> Self {
        Self {
            id,
            isolation,
            status: AtomicU8::new(TxnStatus::Active.as_u8()),
            commit_ts: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn status(&self) -> TxnStatus {
        TxnStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: TxnStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    /// Transition `from -> to` atomically; fails if another path already
    /// moved the transaction on.
    pub(crate) fn cas_status(&self, from: TxnStatus, to: TxnStatus) -> bool {
        self.status
            .compare_exchange(
                from.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Commit timestamp, if one has been assigned.
    pub fn commit_timestamp(&self) -> Option<TxnId> {
        match self.commit_ts.load(Ordering::Acquire) {
            0 => None,
            ts => Some(TxnId::new(ts)),
        }
    }

    pub(crate) fn assign_commit_timestamp(&self, ts: TxnId) {
        self.commit_ts.store(ts.as_u64(), Ordering::Release);
    }

    /// Whether the transaction has passed its commit point. True from
    /// commit-timestamp assignment onward, which covers the window where
    /// locks are still being released.
    pub fn is_committed(&self) -> bool {
        self.commit_ts.load(Ordering::Acquire) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_record_is_active() {
        let r = TxnRecord::new(TxnId::new(1), IsolationLevel::ReadCommitted);
        assert_eq!(r.status(), TxnStatus::Active);
        assert!(!r.is_committed());
        assert_eq!(r.commit_timestamp(), None);
    }

    #[test]
    fn test_commit_point_is_timestamp_assignment() {
        let r = TxnRecord::new(TxnId::new(1), IsolationLevel::RepeatableRead);
        assert!(r.cas_status(TxnStatus::Active, TxnStatus::Committing));
        assert!(!r.is_committed());

        r.assign_commit_timestamp(TxnId::new(2));
        // Committed as far as readers are concerned, even before the
        // status flip.
        assert!(r.is_committed());
        assert_eq!(r.status(), TxnStatus::Committing);

        r.set_status(TxnStatus::Committed);
        assert_eq!(r.status(), TxnStatus::Committed);
    }

    #[test]
    fn test_cas_rejects_stale_transition() {
        let r = TxnRecord::new(TxnId::new(1), IsolationLevel::ReadCommitted);
        assert!(r.cas_status(TxnStatus::Active, TxnStatus::RolledBack));
        assert!(!r.cas_status(TxnStatus::Active, TxnStatus::Committing));
        assert_eq!(r.status(), TxnStatus::RolledBack);
    }
}

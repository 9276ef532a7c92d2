//! Transaction identifier
//!
//! Transaction ids and commit timestamps are drawn from one monotone `u64`
//! counter, so the two are directly comparable: a reader with id `r` sees
//! every commit whose timestamp is `<= r` under snapshot isolation. The id
//! also serves as the lock identity in row-lock slots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier and commit-timestamp value.
///
/// `TxnId::ZERO` is reserved: in the persisted cell layout it marks an
/// already-committed cell, and in the old-value chain it tags the synthetic
/// tail holding a pre-image with no known commit timestamp. Live
/// transactions always get ids `>= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u64);

impl TxnId {
    /// Reserved id: "committed" on the wire, chain tail in the version index.
    pub const ZERO: TxnId = TxnId(0);

    /// Sentinel for "no live snapshot reader" (compares greater than any id).
    pub const MAX: TxnId = TxnId(u64::MAX);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Successor id, used by the old-value chain to reactivate a head whose
    /// retention was previously skipped.
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

impl From<u64> for TxnId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_matches_counter() {
        let a = TxnId::new(3);
        let b = TxnId::new(7);
        assert!(a < b);
        assert!(b <= TxnId::MAX);
        assert!(TxnId::ZERO < a);
    }

    #[test]
    fn test_zero_is_reserved() {
        assert!(TxnId::ZERO.is_zero());
        assert!(!TxnId::new(1).is_zero());
    }

    #[test]
    fn test_hash_eq_consistency() {
        use std::collections::HashMap;

        let id = TxnId::new(42);
        let copy = id;

        let mut map = HashMap::new();
        map.insert(id, "value");
        assert_eq!(map.get(&copy), Some(&"value"));
    }
}

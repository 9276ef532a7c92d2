//! Transaction lifecycle status

use serde::{Deserialize, Serialize};

/// Current status of a transaction.
///
/// A transaction is created `Active` and terminated by exactly one of
/// commit or rollback. `Committing` covers the window between commit
/// timestamp assignment and lock release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    Active,
    Committing,
    Committed,
    RolledBack,
}

impl TxnStatus {
    /// Stable discriminant for atomic storage.
    pub const fn as_u8(self) -> u8 {
        match self {
            TxnStatus::Active => 0,
            TxnStatus::Committing => 1,
            TxnStatus::Committed => 2,
            TxnStatus::RolledBack => 3,
        }
    }

    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => TxnStatus::Active,
            1 => TxnStatus::Committing,
            2 => TxnStatus::Committed,
            _ => TxnStatus::RolledBack,
        }
    }

    /// Whether the transaction has reached a terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(self, TxnStatus::Committed | TxnStatus::RolledBack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_roundtrip() {
        for status in [
            TxnStatus::Active,
            TxnStatus::Committing,
            TxnStatus::Committed,
            TxnStatus::RolledBack,
        ] {
            assert_eq!(TxnStatus::from_u8(status.as_u8()), status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TxnStatus::Active.is_closed());
        assert!(!TxnStatus::Committing.is_closed());
        assert!(TxnStatus::Committed.is_closed());
        assert!(TxnStatus::RolledBack.is_closed());
    }
}

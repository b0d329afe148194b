use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Coins;

/// Why a balance changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerReason {
    /// Coins debited to pay for an order
    Purchase,
    /// Coins returned for views that were not delivered
    Refund,
    /// Coins added by an administrator
    AdminCredit,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::Purchase => "Purchase",
            LedgerReason::Refund => "Refund",
            LedgerReason::AdminCredit => "AdminCredit",
        }
    }
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Purchase" => Ok(LedgerReason::Purchase),
            "Refund" => Ok(LedgerReason::Refund),
            "AdminCredit" => Ok(LedgerReason::AdminCredit),
            other => Err(format!("unknown ledger reason: {other}")),
        }
    }
}

/// Immutable record of one balance change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub user_id: String,
    pub delta: i64,
    pub reason: LedgerReason,
    pub related_order_id: Option<String>,
    pub timestamp: u64,
}

impl LedgerEntry {
    pub fn purchase(
        entry_id: impl Into<String>,
        user_id: impl Into<String>,
        amount: Coins,
        order_id: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            user_id: user_id.into(),
            delta: -(amount as i64),
            reason: LedgerReason::Purchase,
            related_order_id: Some(order_id.into()),
            timestamp,
        }
    }

    pub fn refund(
        entry_id: impl Into<String>,
        user_id: impl Into<String>,
        amount: Coins,
        order_id: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            user_id: user_id.into(),
            delta: amount as i64,
            reason: LedgerReason::Refund,
            related_order_id: Some(order_id.into()),
            timestamp,
        }
    }

    pub fn admin_credit(
        entry_id: impl Into<String>,
        user_id: impl Into<String>,
        amount: Coins,
        timestamp: u64,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            user_id: user_id.into(),
            delta: amount as i64,
            reason: LedgerReason::AdminCredit,
            related_order_id: None,
            timestamp,
        }
    }

    pub fn is_for_order(&self, order_id: &str, reason: LedgerReason) -> bool {
        self.reason == reason && self.related_order_id.as_deref() == Some(order_id)
    }
}

/// Sum of deltas; the authoritative balance of whoever owns `entries`.
///
/// `None` if the sum leaves the `i64` range.
pub fn sum_deltas<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Option<i64> {
    entries
        .into_iter()
        .try_fold(0i64, |acc, e| acc.checked_add(e.delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_signs() {
        let purchase = LedgerEntry::purchase("e1", "u1", 500, "o1", 1);
        let refund = LedgerEntry::refund("e2", "u1", 200, "o1", 2);
        let credit = LedgerEntry::admin_credit("e3", "u1", 1000, 3);

        assert_eq!(purchase.delta, -500);
        assert_eq!(refund.delta, 200);
        assert_eq!(sum_deltas([&credit, &purchase, &refund]), Some(700));
    }

    #[test]
    fn test_sum_deltas_overflow() {
        let big = LedgerEntry::admin_credit("e1", "u1", i64::MAX as Coins, 1);
        let one = LedgerEntry::admin_credit("e2", "u1", 1, 2);
        let purchase = LedgerEntry::purchase("e3", "u1", 1, "o1", 3);

        assert_eq!(sum_deltas([&big, &one]), None);
        assert_eq!(sum_deltas([&big, &purchase, &one]), Some(i64::MAX));
    }

    #[test]
    fn test_is_for_order() {
        let refund = LedgerEntry::refund("e2", "u1", 200, "o1", 2);
        assert!(refund.is_for_order("o1", LedgerReason::Refund));
        assert!(!refund.is_for_order("o1", LedgerReason::Purchase));
        assert!(!refund.is_for_order("o2", LedgerReason::Refund));
    }
}

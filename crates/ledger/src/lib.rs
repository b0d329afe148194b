//! Coin ledger: the source of truth for user funds.
//!
//! Balances are never stored as free-standing mutable fields. Every change is an
//! immutable [`LedgerEntry`]; a balance is the sum of a user's entries. Reserve
//! and refund are serialized per user so two concurrent purchases cannot both
//! pass the funds check against the same stale balance.

pub mod error;
pub mod locks;
pub mod memory;
pub mod sqlite;

pub use error::LedgerError;
pub use locks::UserLocks;
pub use memory::InMemoryLedger;
pub use sqlite::{open_pool, SqliteLedger};

use async_trait::async_trait;
use boostline_types::{Coins, LedgerEntry};

/// Result of a refund request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// A new Refund entry was appended
    Applied(LedgerEntry),
    /// The order had already been refunded; nothing was appended
    AlreadyRefunded(LedgerEntry),
    /// Zero coins owed
    NothingOwed,
}

impl RefundOutcome {
    pub fn entry(&self) -> Option<&LedgerEntry> {
        match self {
            RefundOutcome::Applied(entry) | RefundOutcome::AlreadyRefunded(entry) => Some(entry),
            RefundOutcome::NothingOwed => None,
        }
    }
}

#[async_trait]
pub trait CoinLedger: Send + Sync {
    /// Debit `amount` for `order_id` if the balance covers it.
    ///
    /// Idempotent per order: reserving again for an order that already has a
    /// Purchase entry returns that entry without debiting twice.
    async fn reserve(
        &self,
        user_id: &str,
        amount: Coins,
        order_id: &str,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Credit back `amount` for `order_id`; at most one Refund entry per order
    async fn refund(
        &self,
        user_id: &str,
        amount: Coins,
        order_id: &str,
    ) -> Result<RefundOutcome, LedgerError>;

    /// Admin top-up
    async fn credit(&self, user_id: &str, amount: Coins) -> Result<LedgerEntry, LedgerError>;

    async fn balance(&self, user_id: &str) -> Result<Coins, LedgerError>;

    /// The user's entries in append order
    async fn entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>, LedgerError>;
}

pub(crate) fn now_secs() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

pub(crate) fn new_entry_id() -> String {
    format!("entry-{}", uuid::Uuid::new_v4())
}

/// `balance + delta`, refusing to leave the `i64` range
pub(crate) fn add_delta(user_id: &str, balance: i64, delta: i64) -> Result<i64, LedgerError> {
    balance
        .checked_add(delta)
        .ok_or_else(|| LedgerError::BalanceOverflow {
            user_id: user_id.to_string(),
        })
}

pub(crate) fn check_amount(amount: Coins) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount { amount });
    }
    if amount > i64::MAX as u64 {
        return Err(LedgerError::InvalidAmount { amount });
    }
    Ok(())
}

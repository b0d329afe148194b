//! In-memory ledger

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use boostline_types::{sum_deltas, Coins, LedgerEntry, LedgerReason};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::{
    add_delta, check_amount, new_entry_id, now_secs, CoinLedger, LedgerError, RefundOutcome,
};

/// One user's log plus a cached running total.
///
/// The cache is only a shortcut; every operation checks it against the log
/// before trusting it.
#[derive(Debug, Default)]
struct Account {
    entries: Vec<LedgerEntry>,
    cached_balance: i64,
}

impl Account {
    fn verified_balance(&mut self, user_id: &str) -> Result<i64, LedgerError> {
        let computed = sum_deltas(&self.entries).ok_or_else(|| LedgerError::BalanceOverflow {
            user_id: user_id.to_string(),
        })?;
        if computed != self.cached_balance {
            let cached = self.cached_balance;
            error!(
                user_id = %user_id,
                cached,
                computed,
                "Balance cache disagrees with ledger log, rebuilding"
            );
            self.cached_balance = computed;
            return Err(LedgerError::Inconsistency {
                user_id: user_id.to_string(),
                cached,
                computed,
            });
        }
        Ok(computed)
    }

    fn find(&self, order_id: &str, reason: LedgerReason) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.is_for_order(order_id, reason))
    }

    /// Leaves the account untouched if the new balance would overflow.
    fn append(&mut self, entry: LedgerEntry) -> Result<(), LedgerError> {
        self.cached_balance = add_delta(&entry.user_id, self.cached_balance, entry.delta)?;
        self.entries.push(entry);
        Ok(())
    }
}

/// In-memory ledger for tests and single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    accounts: RwLock<HashMap<String, Arc<Mutex<Account>>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn account(&self, user_id: &str) -> Arc<Mutex<Account>> {
        if let Some(account) = self.accounts.read().unwrap().get(user_id) {
            return account.clone();
        }
        self.accounts
            .write()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    #[cfg(test)]
    async fn skew_cache(&self, user_id: &str, by: i64) {
        self.account(user_id).lock().await.cached_balance += by;
    }
}

#[async_trait]
impl CoinLedger for InMemoryLedger {
    async fn reserve(
        &self,
        user_id: &str,
        amount: Coins,
        order_id: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        check_amount(amount)?;

        let account = self.account(user_id);
        let mut account = account.lock().await;
        let balance = account.verified_balance(user_id)?;

        if let Some(existing) = account.find(order_id, LedgerReason::Purchase) {
            let existing_amount = existing.delta.unsigned_abs();
            if existing_amount != amount {
                return Err(LedgerError::ReservationMismatch {
                    order_id: order_id.to_string(),
                    existing: existing_amount,
                    requested: amount,
                });
            }
            debug!(order_id = %order_id, "Reservation already recorded");
            return Ok(existing.clone());
        }

        if balance < amount as i64 {
            return Err(LedgerError::InsufficientFunds {
                user_id: user_id.to_string(),
                required: amount,
                available: balance.max(0) as Coins,
            });
        }

        let entry = LedgerEntry::purchase(new_entry_id(), user_id, amount, order_id, now_secs());
        account.append(entry.clone())?;

        info!(user_id = %user_id, order_id = %order_id, amount, "Coins reserved");
        Ok(entry)
    }

    async fn refund(
        &self,
        user_id: &str,
        amount: Coins,
        order_id: &str,
    ) -> Result<RefundOutcome, LedgerError> {
        if amount == 0 {
            return Ok(RefundOutcome::NothingOwed);
        }
        check_amount(amount)?;

        let account = self.account(user_id);
        let mut account = account.lock().await;
        account.verified_balance(user_id)?;

        if let Some(existing) = account.find(order_id, LedgerReason::Refund) {
            debug!(order_id = %order_id, "Refund already recorded");
            return Ok(RefundOutcome::AlreadyRefunded(existing.clone()));
        }

        let purchased = account
            .find(order_id, LedgerReason::Purchase)
            .map(|e| e.delta.unsigned_abs())
            .ok_or_else(|| LedgerError::NoPurchase {
                order_id: order_id.to_string(),
            })?;
        if amount > purchased {
            return Err(LedgerError::RefundExceedsPurchase {
                order_id: order_id.to_string(),
                requested: amount,
                purchased,
            });
        }

        let entry = LedgerEntry::refund(new_entry_id(), user_id, amount, order_id, now_secs());
        account.append(entry.clone())?;

        info!(user_id = %user_id, order_id = %order_id, amount, "Coins refunded");
        Ok(RefundOutcome::Applied(entry))
    }

    async fn credit(&self, user_id: &str, amount: Coins) -> Result<LedgerEntry, LedgerError> {
        check_amount(amount)?;

        let account = self.account(user_id);
        let mut account = account.lock().await;
        account.verified_balance(user_id)?;

        let entry = LedgerEntry::admin_credit(new_entry_id(), user_id, amount, now_secs());
        account.append(entry.clone())?;

        info!(user_id = %user_id, amount, "Coins credited");
        Ok(entry)
    }

    async fn balance(&self, user_id: &str) -> Result<Coins, LedgerError> {
        let account = self.account(user_id);
        let mut account = account.lock().await;
        let balance = account.verified_balance(user_id)?;
        Ok(balance.max(0) as Coins)
    }

    async fn entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let account = self.account(user_id);
        let account = account.lock().await;
        Ok(account.entries.clone())
    }
}

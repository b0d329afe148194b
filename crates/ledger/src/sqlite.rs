use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use boostline_types::{Coins, LedgerEntry, LedgerReason};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::{
    add_delta, check_amount, new_entry_id, now_secs, CoinLedger, LedgerError, RefundOutcome,
    UserLocks,
};

// ═══════════════════════════════════════════════════════════════════════════
// CONNECTION
// ═══════════════════════════════════════════════════════════════════════════

/// Open a pool for `database_url` (`sqlite::memory:` or `sqlite://path.db`).
///
/// An in-memory database lives and dies with its connection, so such pools
/// are pinned to a single connection that is never recycled.
pub async fn open_pool(database_url: &str) -> Result<SqlitePool, LedgerError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| LedgerError::ConnectionError(e.to_string()))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(4)
    };

    pool_options
        .connect_with(options)
        .await
        .map_err(|e| LedgerError::ConnectionError(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE LEDGER
// ═══════════════════════════════════════════════════════════════════════════

pub struct SqliteLedger {
    pool: SqlitePool,
    locks: UserLocks,
}

impl SqliteLedger {
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = open_pool(database_url).await?;
        Self::with_pool(pool).await
    }

    /// Create an in-memory SQLite ledger (for testing)
    pub async fn in_memory() -> Result<Self, LedgerError> {
        Self::connect("sqlite::memory:").await
    }

    /// Use an existing pool, e.g. one shared with the order store
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, LedgerError> {
        let ledger = Self {
            pool,
            locks: UserLocks::new(),
        };
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), LedgerError> {
        let migration = include_str!("../migrations/001_create_ledger_entries.sql");
        for statement in migration.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::DatabaseError(e.to_string()))?;
        }
        Ok(())
    }

    fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry, LedgerError> {
        let reason_str: String = row.get("reason");
        let reason =
            LedgerReason::from_str(&reason_str).map_err(LedgerError::SerializationError)?;

        Ok(LedgerEntry {
            entry_id: row.get("entry_id"),
            user_id: row.get("user_id"),
            delta: row.get("delta"),
            reason,
            related_order_id: row.get("related_order_id"),
            timestamp: row.get::<i64, _>("timestamp") as u64,
        })
    }

    async fn find_for_order(
        conn: &mut SqliteConnection,
        order_id: &str,
        reason: LedgerReason,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT entry_id, user_id, delta, reason, related_order_id, timestamp
            FROM ledger_entries
            WHERE related_order_id = ? AND reason = ?
            "#,
        )
        .bind(order_id)
        .bind(reason.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn sum_for_user(conn: &mut SqliteConnection, user_id: &str) -> Result<i64, LedgerError> {
        let balance: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0) FROM ledger_entries WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(balance)
    }

    async fn insert(conn: &mut SqliteConnection, entry: &LedgerEntry) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                entry_id, user_id, delta, reason, related_order_id, timestamp
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.entry_id)
        .bind(&entry.user_id)
        .bind(entry.delta)
        .bind(entry.reason.as_str())
        .bind(&entry.related_order_id)
        .bind(entry.timestamp as i64)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CoinLedger for SqliteLedger {
    async fn reserve(
        &self,
        user_id: &str,
        amount: Coins,
        order_id: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        check_amount(amount)?;

        let _guard = self.locks.lock(user_id).await;
        let mut tx = self.pool.begin().await?;

        if let Some(existing) =
            Self::find_for_order(&mut tx, order_id, LedgerReason::Purchase).await?
        {
            let existing_amount = existing.delta.unsigned_abs();
            if existing_amount != amount {
                return Err(LedgerError::ReservationMismatch {
                    order_id: order_id.to_string(),
                    existing: existing_amount,
                    requested: amount,
                });
            }
            debug!(order_id = %order_id, "Reservation already recorded");
            return Ok(existing);
        }

        let balance = Self::sum_for_user(&mut tx, user_id).await?;
        if balance < amount as i64 {
            return Err(LedgerError::InsufficientFunds {
                user_id: user_id.to_string(),
                required: amount,
                available: balance.max(0) as Coins,
            });
        }

        let entry = LedgerEntry::purchase(new_entry_id(), user_id, amount, order_id, now_secs());
        Self::insert(&mut tx, &entry).await?;
        tx.commit().await?;

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

        let _guard = self.locks.lock(user_id).await;
        let mut tx = self.pool.begin().await?;

        if let Some(existing) =
            Self::find_for_order(&mut tx, order_id, LedgerReason::Refund).await?
        {
            debug!(order_id = %order_id, "Refund already recorded");
            return Ok(RefundOutcome::AlreadyRefunded(existing));
        }

        let purchased = Self::find_for_order(&mut tx, order_id, LedgerReason::Purchase)
            .await?
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

        let balance = Self::sum_for_user(&mut tx, user_id).await?;
        add_delta(user_id, balance, amount as i64)?;

        let entry = LedgerEntry::refund(new_entry_id(), user_id, amount, order_id, now_secs());
        Self::insert(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(user_id = %user_id, order_id = %order_id, amount, "Coins refunded");
        Ok(RefundOutcome::Applied(entry))
    }

    async fn credit(&self, user_id: &str, amount: Coins) -> Result<LedgerEntry, LedgerError> {
        check_amount(amount)?;

        let _guard = self.locks.lock(user_id).await;
        let mut tx = self.pool.begin().await?;

        let balance = Self::sum_for_user(&mut tx, user_id).await?;
        add_delta(user_id, balance, amount as i64)?;

        let entry = LedgerEntry::admin_credit(new_entry_id(), user_id, amount, now_secs());
        Self::insert(&mut tx, &entry).await?;
        tx.commit().await?;

        info!(user_id = %user_id, amount, "Coins credited");
        Ok(entry)
    }

    async fn balance(&self, user_id: &str) -> Result<Coins, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let balance = Self::sum_for_user(&mut conn, user_id).await?;
        if balance < 0 {
            return Err(LedgerError::Inconsistency {
                user_id: user_id.to_string(),
                cached: 0,
                computed: balance,
            });
        }
        Ok(balance as Coins)
    }

    async fn entries(&self, user_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, user_id, delta, reason, related_order_id, timestamp
            FROM ledger_entries
            WHERE user_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}

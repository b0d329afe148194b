use async_trait::async_trait;
use boostline_types::{Order, OrderState, PendingJob, SpeedPolicy};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::store::{OrderStore, StateTransition, StoreError};

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

const ORDER_COLUMNS: &str = "order_id, user_id, target, requested_quantity, unit_price, \
     speed_policy, state, delivered_quantity, reserved_cost, refunded_amount, provider_refs, \
     pending_job, created_at, updated_at, completed_at, error_message";

pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// Open (or create) the database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = boostline_ledger::open_pool(database_url)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;
        Self::with_pool(pool).await
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    /// Use an existing pool, e.g. the one backing the ledger
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let migrations = [
            include_str!("../migrations/001_create_orders.sql"),
            include_str!("../migrations/002_create_transitions.sql"),
        ];

        for migration in migrations {
            for statement in migration.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            }
        }

        Ok(())
    }

    /// Convert database row to Order
    fn row_to_order(row: &SqliteRow) -> Result<Order, StoreError> {
        let state_str: String = row.get("state");
        let state = OrderState::from_str(&state_str)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let speed_policy: SpeedPolicy =
            serde_json::from_str(row.get::<String, _>("speed_policy").as_str())
                .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let provider_refs: Vec<String> =
            serde_json::from_str(row.get::<String, _>("provider_refs").as_str())
                .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let pending_job: Option<PendingJob> = row
            .get::<Option<String>, _>("pending_job")
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        Ok(Order {
            order_id: row.get("order_id"),
            user_id: row.get("user_id"),
            target: row.get("target"),
            requested_quantity: row.get::<i64, _>("requested_quantity") as u64,
            unit_price: row.get::<i64, _>("unit_price") as u64,
            speed_policy,
            state,
            delivered_quantity: row.get::<i64, _>("delivered_quantity") as u64,
            reserved_cost: row.get::<i64, _>("reserved_cost") as u64,
            refunded_amount: row.get::<i64, _>("refunded_amount") as u64,
            provider_refs,
            pending_job,
            created_at: row.get::<i64, _>("created_at") as u64,
            updated_at: row.get::<i64, _>("updated_at") as u64,
            completed_at: row.get::<Option<i64>, _>("completed_at").map(|v| v as u64),
            error_message: row.get("error_message"),
        })
    }

    fn rows_to_orders(rows: &[SqliteRow]) -> Result<Vec<Order>, StoreError> {
        rows.iter().map(Self::row_to_order).collect()
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let speed_policy = serde_json::to_string(&order.speed_policy)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let provider_refs = serde_json::to_string(&order.provider_refs)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let pending_job = order
            .pending_job
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, user_id, target, requested_quantity, unit_price,
                speed_policy, state, delivered_quantity, reserved_cost, refunded_amount,
                provider_refs, pending_job, created_at, updated_at, completed_at, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(order_id) DO UPDATE SET
                state = excluded.state,
                delivered_quantity = excluded.delivered_quantity,
                refunded_amount = excluded.refunded_amount,
                provider_refs = excluded.provider_refs,
                pending_job = excluded.pending_job,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at,
                error_message = excluded.error_message
            WHERE orders.state NOT IN (?, ?, ?)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.user_id)
        .bind(&order.target)
        .bind(order.requested_quantity as i64)
        .bind(order.unit_price as i64)
        .bind(&speed_policy)
        .bind(order.state.as_str())
        .bind(order.delivered_quantity as i64)
        .bind(order.reserved_cost as i64)
        .bind(order.refunded_amount as i64)
        .bind(&provider_refs)
        .bind(&pending_job)
        .bind(order.created_at as i64)
        .bind(order.updated_at as i64)
        .bind(order.completed_at.map(|v| v as i64))
        .bind(&order.error_message)
        .bind(OrderState::Completed.as_str())
        .bind(OrderState::Refunded.as_str())
        .bind(OrderState::Rejected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // the row exists and is terminal
        match self.load(&order.order_id).await? {
            Some(stored) if stored == *order => Ok(()),
            Some(stored) => Err(StoreError::Finalized {
                order_id: order.order_id.clone(),
                state: stored.state,
            }),
            None => Err(StoreError::NotFound(order.order_id.clone())),
        }
    }

    async fn load(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE state IN (?, ?, ?, ?) \
             ORDER BY created_at ASC, order_id ASC"
        ))
        .bind(OrderState::ACTIVE[0].as_str())
        .bind(OrderState::ACTIVE[1].as_str())
        .bind(OrderState::ACTIVE[2].as_str())
        .bind(OrderState::ACTIVE[3].as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Self::rows_to_orders(&rows)
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE user_id = ? \
             ORDER BY created_at DESC, order_id DESC \
             LIMIT ?"
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Self::rows_to_orders(&rows)
    }

    async fn list_by_state(
        &self,
        state: OrderState,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE state = ? \
             ORDER BY created_at ASC, order_id ASC \
             LIMIT ?"
        ))
        .bind(state.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Self::rows_to_orders(&rows)
    }

    async fn record_transition(
        &self,
        order_id: &str,
        transition: StateTransition,
    ) -> Result<(), StoreError> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM orders WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        if exists.is_none() {
            return Err(StoreError::NotFound(order_id.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO order_transitions (order_id, from_state, to_state, timestamp, details)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(order_id)
        .bind(transition.from_state.as_str())
        .bind(transition.to_state.as_str())
        .bind(transition.timestamp as i64)
        .bind(&transition.details)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn history(&self, order_id: &str) -> Result<Vec<StateTransition>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT from_state, to_state, timestamp, details
            FROM order_transitions
            WHERE order_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let from: String = row.get("from_state");
                let to: String = row.get("to_state");
                Ok(StateTransition {
                    from_state: OrderState::from_str(&from)
                        .map_err(|e| StoreError::SerializationError(e.to_string()))?,
                    to_state: OrderState::from_str(&to)
                        .map_err(|e| StoreError::SerializationError(e.to_string()))?,
                    timestamp: row.get::<i64, _>("timestamp") as u64,
                    details: row.get("details"),
                })
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use boostline_types::{DripFeedParams, OrderRequest};
    use std::time::Duration;

    fn drip_order(id: &str, user: &str, created_at: u64) -> Order {
        let params = DripFeedParams::new(Duration::from_secs(90), 30)
            .with_start_delay(Duration::from_secs(60));
        let request = OrderRequest::new(
            user,
            "https://t.me/channel/7",
            100,
            SpeedPolicy::DripFeed(params),
        );
        Order::new(id, &request, 3, created_at).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_all_fields() {
        let store = SqliteOrderStore::in_memory().await.unwrap();
        let mut order = drip_order("o1", "alice", 100);
        order.transition(OrderState::Reserved, 101).unwrap();
        order.transition(OrderState::InProgress, 102).unwrap();
        order.record_delivery(60, 103).unwrap();
        order.provider_refs = vec!["501/30".into(), "502/30".into()];
        order.pending_job = Some(PendingJob {
            job_ref: "503/30".into(),
            quantity: 30,
        });

        store.save(&order).await.unwrap();
        let loaded = store.load("o1").await.unwrap().unwrap();
        assert_eq!(loaded, order);
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_row() {
        let store = SqliteOrderStore::in_memory().await.unwrap();
        let mut order = drip_order("o1", "alice", 100);
        store.save(&order).await.unwrap();

        order.transition(OrderState::Rejected, 101).unwrap();
        order.error_message = Some("insufficient funds".into());
        store.save(&order).await.unwrap();

        let loaded = store.load("o1").await.unwrap().unwrap();
        assert_eq!(loaded.state, OrderState::Rejected);
        assert_eq!(loaded.completed_at, Some(101));
        assert!(store.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finished_order_is_not_overwritten() {
        let store = SqliteOrderStore::in_memory().await.unwrap();
        let mut order = drip_order("o1", "alice", 100);
        order.transition(OrderState::Reserved, 101).unwrap();
        order.transition(OrderState::InProgress, 102).unwrap();
        let stale = order.clone();
        order.record_delivery(100, 103).unwrap();
        order.transition(OrderState::Completed, 104).unwrap();
        store.save(&order).await.unwrap();
        store.save(&order).await.unwrap();

        let result = store.save(&stale).await;
        assert!(matches!(result, Err(StoreError::Finalized { .. })));

        let loaded = store.load("o1").await.unwrap().unwrap();
        assert_eq!(loaded.state, OrderState::Completed);
        assert_eq!(loaded.delivered_quantity, 100);
    }

    #[tokio::test]
    async fn test_listing() {
        let store = SqliteOrderStore::in_memory().await.unwrap();
        let mut first = drip_order("o1", "alice", 10);
        first.transition(OrderState::Reserved, 11).unwrap();
        store.save(&first).await.unwrap();
        store.save(&drip_order("o2", "bob", 12)).await.unwrap();
        store.save(&drip_order("o3", "alice", 13)).await.unwrap();

        let active: Vec<_> = store
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(active, vec!["o1", "o2", "o3"]);

        let alice: Vec<_> = store
            .list_by_user("alice", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(alice, vec!["o3", "o1"]);

        let reserved = store.list_by_state(OrderState::Reserved, 10).await.unwrap();
        assert_eq!(reserved.len(), 1);
    }

    #[tokio::test]
    async fn test_history() {
        let store = SqliteOrderStore::in_memory().await.unwrap();
        store.save(&drip_order("o1", "alice", 10)).await.unwrap();

        store
            .record_transition(
                "o1",
                StateTransition::new(OrderState::Created, OrderState::Reserved, 11),
            )
            .await
            .unwrap();
        store
            .record_transition(
                "o1",
                StateTransition::new(OrderState::Reserved, OrderState::InProgress, 12)
                    .with_details("resumed"),
            )
            .await
            .unwrap();

        let history = store.history("o1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_state, OrderState::Reserved);
        assert_eq!(history[1].details.as_deref(), Some("resumed"));

        let missing = store
            .record_transition(
                "nope",
                StateTransition::new(OrderState::Created, OrderState::Rejected, 1),
            )
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("orders.db").display());

        {
            let store = SqliteOrderStore::connect(&url).await.unwrap();
            store.save(&drip_order("o1", "alice", 10)).await.unwrap();
            store.pool().close().await;
        }

        let reopened = SqliteOrderStore::connect(&url).await.unwrap();
        assert!(reopened.load("o1").await.unwrap().is_some());
    }
}

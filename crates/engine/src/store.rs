use async_trait::async_trait;
use boostline_types::{Order, OrderState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════
// CORE TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateTransition {
    pub from_state: OrderState,
    pub to_state: OrderState,
    pub timestamp: u64,
    pub details: Option<String>,
}

impl StateTransition {
    pub fn new(from_state: OrderState, to_state: OrderState, timestamp: u64) -> Self {
        Self {
            from_state,
            to_state,
            timestamp,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("order {order_id} is already {state}; its snapshot can no longer change")]
    Finalized { order_id: String, state: OrderState },
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// Durable order snapshots.
///
/// `save` must not return before the snapshot is durable; the engine acts on a
/// state only after saving it.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert or replace the order's snapshot.
    ///
    /// A terminal snapshot is final: saving a different snapshot over it fails
    /// with [`StoreError::Finalized`].
    async fn save(&self, order: &Order) -> Result<(), StoreError>;

    async fn load(&self, order_id: &str) -> Result<Option<Order>, StoreError>;

    /// Orders that are not terminal, oldest first
    async fn list_active(&self) -> Result<Vec<Order>, StoreError>;

    /// A user's orders, newest first
    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Order>, StoreError>;

    async fn list_by_state(&self, state: OrderState, limit: usize)
        -> Result<Vec<Order>, StoreError>;

    async fn record_transition(
        &self,
        order_id: &str,
        transition: StateTransition,
    ) -> Result<(), StoreError>;

    /// Transition history in the order it happened
    async fn history(&self, order_id: &str) -> Result<Vec<StateTransition>, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE (for testing)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    transitions: Arc<RwLock<HashMap<String, Vec<StateTransition>>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of orders (for testing)
    pub fn len(&self) -> usize {
        self.orders.read().unwrap().len()
    }

    /// Check if store is empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.orders.read().unwrap().is_empty()
    }
}

fn oldest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.order_id.cmp(&b.order_id))
    });
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.write().unwrap();
        if let Some(stored) = orders.get(&order.order_id) {
            if stored.state.is_terminal() && stored != order {
                return Err(StoreError::Finalized {
                    order_id: order.order_id.clone(),
                    state: stored.state,
                });
            }
        }
        orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn load(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().unwrap().get(order_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Order>, StoreError> {
        let mut results: Vec<_> = self
            .orders
            .read()
            .unwrap()
            .values()
            .filter(|o| o.state.is_active())
            .cloned()
            .collect();

        oldest_first(&mut results);
        Ok(results)
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Order>, StoreError> {
        let mut results: Vec<_> = self
            .orders
            .read()
            .unwrap()
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();

        oldest_first(&mut results);
        results.reverse();
        results.truncate(limit);
        Ok(results)
    }

    async fn list_by_state(
        &self,
        state: OrderState,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError> {
        let mut results: Vec<_> = self
            .orders
            .read()
            .unwrap()
            .values()
            .filter(|o| o.state == state)
            .cloned()
            .collect();

        oldest_first(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn record_transition(
        &self,
        order_id: &str,
        transition: StateTransition,
    ) -> Result<(), StoreError> {
        if !self.orders.read().unwrap().contains_key(order_id) {
            return Err(StoreError::NotFound(order_id.to_string()));
        }

        self.transitions
            .write()
            .unwrap()
            .entry(order_id.to_string())
            .or_default()
            .push(transition);

        Ok(())
    }

    async fn history(&self, order_id: &str) -> Result<Vec<StateTransition>, StoreError> {
        Ok(self
            .transitions
            .read()
            .unwrap()
            .get(order_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

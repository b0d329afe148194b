use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::Coins;

// ═══════════════════════════════════════════════════════════════════════════
// SPEED POLICY
// ═══════════════════════════════════════════════════════════════════════════

/// Parameters of a drip-fed delivery.
///
/// The purchased quantity is cut into batches of `batch_size` views which are
/// spread evenly over `total_duration_ms`. The last batch carries the remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DripFeedParams {
    /// Time over which all batches are spread (milliseconds)
    pub total_duration_ms: u64,

    /// Views per batch
    pub batch_size: u64,

    /// Delay before the first batch (milliseconds)
    #[serde(default)]
    pub start_delay_ms: u64,
}

impl DripFeedParams {
    pub fn new(total_duration: Duration, batch_size: u64) -> Self {
        Self {
            total_duration_ms: total_duration.as_millis() as u64,
            batch_size,
            start_delay_ms: 0,
        }
    }

    /// Build params from a fixed cadence ("every `batch_interval`, `batch_size` views").
    ///
    /// The total duration is derived so that `batch_interval(quantity)` gives back
    /// the requested cadence.
    pub fn from_cadence(quantity: u64, batch_size: u64, batch_interval: Duration) -> Self {
        let batches = if batch_size == 0 {
            0
        } else {
            quantity.div_ceil(batch_size)
        };
        let total_ms = (batch_interval.as_millis() as u64).saturating_mul(batches);

        Self {
            total_duration_ms: total_ms,
            batch_size,
            start_delay_ms: 0,
        }
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.total_duration_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    /// Number of batches needed for `quantity` views
    pub fn batch_count(&self, quantity: u64) -> u64 {
        if self.batch_size == 0 {
            return 0;
        }
        quantity.div_ceil(self.batch_size)
    }

    /// Spacing between batches when delivering `quantity` views
    pub fn batch_interval(&self, quantity: u64) -> Duration {
        let batches = self.batch_count(quantity);
        if batches == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_duration().as_nanos() / u128::from(batches);
        Duration::from_nanos(nanos as u64)
    }
}

/// How fast an order is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpeedPolicy {
    /// Everything in a single dispatch, immediately
    Maximum,

    /// Provider-sized batches at a fixed, rate-limit friendly interval
    Slow,

    /// Batches spread over a chosen duration
    DripFeed(DripFeedParams),
}

impl SpeedPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            SpeedPolicy::Maximum => "maximum",
            SpeedPolicy::Slow => "slow",
            SpeedPolicy::DripFeed(_) => "drip_feed",
        }
    }

    pub fn drip_feed_params(&self) -> Option<&DripFeedParams> {
        match self {
            SpeedPolicy::DripFeed(params) => Some(params),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORDER STATE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    Created,
    Reserved,
    InProgress,
    PartiallyDelivered,
    Completed,
    Refunded,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Completed | OrderState::Refunded | OrderState::Rejected
        )
    }

    /// States an order can be resumed from after a restart
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;

        matches!(
            (self, next),
            (Created, Reserved)
                | (Created, Rejected)
                | (Reserved, InProgress)
                | (Reserved, PartiallyDelivered)
                | (InProgress, Completed)
                | (InProgress, PartiallyDelivered)
                | (PartiallyDelivered, Refunded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "Created",
            OrderState::Reserved => "Reserved",
            OrderState::InProgress => "InProgress",
            OrderState::PartiallyDelivered => "PartiallyDelivered",
            OrderState::Completed => "Completed",
            OrderState::Refunded => "Refunded",
            OrderState::Rejected => "Rejected",
        }
    }

    pub const ACTIVE: [OrderState; 4] = [
        OrderState::Created,
        OrderState::Reserved,
        OrderState::InProgress,
        OrderState::PartiallyDelivered,
    ];
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = OrderModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(OrderState::Created),
            "Reserved" => Ok(OrderState::Reserved),
            "InProgress" => Ok(OrderState::InProgress),
            "PartiallyDelivered" => Ok(OrderState::PartiallyDelivered),
            "Completed" => Ok(OrderState::Completed),
            "Refunded" => Ok(OrderState::Refunded),
            "Rejected" => Ok(OrderState::Rejected),
            other => Err(OrderModelError::UnknownState(other.to_string())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORDER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderModelError {
    #[error("invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: String,
        from: OrderState,
        to: OrderState,
    },

    #[error("order {order_id} is terminal ({state})")]
    Terminal { order_id: String, state: OrderState },

    #[error("order {order_id} is not delivering (state {state})")]
    NotDelivering { order_id: String, state: OrderState },

    #[error("cost overflow: {quantity} x {unit_price}")]
    CostOverflow { quantity: u64, unit_price: Coins },

    #[error("unknown order state: {0}")]
    UnknownState(String),
}

/// A purchase request as submitted by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user_id: String,
    pub target: String,
    pub quantity: u64,
    pub speed: SpeedPolicy,
}

impl OrderRequest {
    pub fn new(
        user_id: impl Into<String>,
        target: impl Into<String>,
        quantity: u64,
        speed: SpeedPolicy,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            target: target.into(),
            quantity,
            speed,
        }
    }

    /// Total cost at the given unit price, `None` on overflow
    pub fn cost(&self, unit_price: Coins) -> Option<Coins> {
        self.quantity.checked_mul(unit_price)
    }
}

/// A provider job that was accepted but has not reported a final count.
///
/// Persisted with the order so a restarted engine polls it instead of
/// submitting the same views again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingJob {
    pub job_ref: String,
    pub quantity: u64,
}

/// One purchase of views and its delivery progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub target: String,
    pub requested_quantity: u64,
    /// Coins per view, captured at submission
    pub unit_price: Coins,
    pub speed_policy: SpeedPolicy,
    pub state: OrderState,
    pub delivered_quantity: u64,
    /// Always `requested_quantity * unit_price`
    pub reserved_cost: Coins,
    pub refunded_amount: Coins,
    /// Job references returned by the provider, in dispatch order
    pub provider_refs: Vec<String>,
    #[serde(default)]
    pub pending_job: Option<PendingJob>,
    pub created_at: u64,
    pub updated_at: u64,
    pub completed_at: Option<u64>,
    pub error_message: Option<String>,
}

impl Order {
    pub fn new(
        order_id: impl Into<String>,
        request: &OrderRequest,
        unit_price: Coins,
        created_at: u64,
    ) -> Result<Self, OrderModelError> {
        let reserved_cost =
            request
                .cost(unit_price)
                .ok_or(OrderModelError::CostOverflow {
                    quantity: request.quantity,
                    unit_price,
                })?;

        Ok(Self {
            order_id: order_id.into(),
            user_id: request.user_id.clone(),
            target: request.target.clone(),
            requested_quantity: request.quantity,
            unit_price,
            speed_policy: request.speed,
            state: OrderState::Created,
            delivered_quantity: 0,
            reserved_cost,
            refunded_amount: 0,
            provider_refs: Vec::new(),
            pending_job: None,
            created_at,
            updated_at: created_at,
            completed_at: None,
            error_message: None,
        })
    }

    pub fn remaining_quantity(&self) -> u64 {
        self.requested_quantity.saturating_sub(self.delivered_quantity)
    }

    pub fn is_fully_delivered(&self) -> bool {
        self.delivered_quantity >= self.requested_quantity
    }

    /// Coins owed back for views that were paid for but never delivered
    pub fn shortfall_cost(&self) -> Coins {
        self.remaining_quantity() * self.unit_price
    }

    /// Move to `next`, returning the previous state
    pub fn transition(&mut self, next: OrderState, now: u64) -> Result<OrderState, OrderModelError> {
        if self.state.is_terminal() {
            return Err(OrderModelError::Terminal {
                order_id: self.order_id.clone(),
                state: self.state,
            });
        }
        if !self.state.can_transition_to(next) {
            return Err(OrderModelError::InvalidTransition {
                order_id: self.order_id.clone(),
                from: self.state,
                to: next,
            });
        }

        let previous = self.state;
        self.state = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(previous)
    }

    /// Apply views reported as delivered by the provider.
    ///
    /// Returns the amount actually credited to the order, which never pushes
    /// `delivered_quantity` past `requested_quantity`.
    pub fn record_delivery(&mut self, delivered: u64, now: u64) -> Result<u64, OrderModelError> {
        if self.state.is_terminal() {
            return Err(OrderModelError::Terminal {
                order_id: self.order_id.clone(),
                state: self.state,
            });
        }
        if self.state != OrderState::InProgress {
            return Err(OrderModelError::NotDelivering {
                order_id: self.order_id.clone(),
                state: self.state,
            });
        }

        let applied = delivered.min(self.remaining_quantity());
        self.delivered_quantity += applied;
        self.updated_at = now;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(quantity: u64) -> OrderRequest {
        OrderRequest::new("user-1", "https://t.me/channel/42", quantity, SpeedPolicy::Maximum)
    }

    #[test]
    fn test_new_order_fixes_cost() {
        let order = Order::new("order-1", &request(50), 10, 100).unwrap();
        assert_eq!(order.reserved_cost, 500);
        assert_eq!(order.state, OrderState::Created);
        assert_eq!(order.remaining_quantity(), 50);
    }

    #[test]
    fn test_cost_overflow_rejected() {
        let result = Order::new("order-1", &request(u64::MAX), 2, 100);
        assert!(matches!(result, Err(OrderModelError::CostOverflow { .. })));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut order = Order::new("order-1", &request(50), 10, 100).unwrap();

        assert_eq!(order.transition(OrderState::Reserved, 101).unwrap(), OrderState::Created);
        order.transition(OrderState::InProgress, 102).unwrap();
        order.record_delivery(50, 103).unwrap();
        order.transition(OrderState::Completed, 104).unwrap();

        assert_eq!(order.completed_at, Some(104));
        assert!(order.is_fully_delivered());
    }

    #[test]
    fn test_skipping_states_rejected() {
        let mut order = Order::new("order-1", &request(50), 10, 100).unwrap();

        let result = order.transition(OrderState::Completed, 101);
        assert!(matches!(result, Err(OrderModelError::InvalidTransition { .. })));

        order.transition(OrderState::Reserved, 101).unwrap();
        let result = order.transition(OrderState::Refunded, 102);
        assert!(matches!(result, Err(OrderModelError::InvalidTransition { .. })));
    }

    #[test]
    fn test_terminal_accepts_nothing() {
        let mut order = Order::new("order-1", &request(50), 10, 100).unwrap();
        order.transition(OrderState::Rejected, 101).unwrap();

        let result = order.transition(OrderState::Reserved, 102);
        assert!(matches!(result, Err(OrderModelError::Terminal { .. })));

        let result = order.record_delivery(10, 102);
        assert!(matches!(result, Err(OrderModelError::Terminal { .. })));
        assert_eq!(order.delivered_quantity, 0);
    }

    #[test]
    fn test_delivery_capped_at_requested() {
        let mut order = Order::new("order-1", &request(50), 10, 100).unwrap();
        order.transition(OrderState::Reserved, 101).unwrap();
        order.transition(OrderState::InProgress, 102).unwrap();

        assert_eq!(order.record_delivery(30, 103).unwrap(), 30);
        assert_eq!(order.record_delivery(30, 104).unwrap(), 20);
        assert_eq!(order.delivered_quantity, 50);
        assert_eq!(order.shortfall_cost(), 0);
    }

    #[test]
    fn test_delivery_requires_in_progress() {
        let mut order = Order::new("order-1", &request(50), 10, 100).unwrap();
        order.transition(OrderState::Reserved, 101).unwrap();

        let result = order.record_delivery(10, 102);
        assert!(matches!(result, Err(OrderModelError::NotDelivering { .. })));
    }

    #[test]
    fn test_shortfall_cost() {
        let mut order = Order::new("order-1", &request(100), 7, 100).unwrap();
        order.transition(OrderState::Reserved, 101).unwrap();
        order.transition(OrderState::InProgress, 102).unwrap();
        order.record_delivery(60, 103).unwrap();

        assert_eq!(order.shortfall_cost(), 40 * 7);
    }

    #[test]
    fn test_drip_feed_interval() {
        let params = DripFeedParams::new(Duration::from_secs(90), 30);
        assert_eq!(params.batch_count(100), 4);
        assert_eq!(params.batch_interval(100), Duration::from_millis(22_500));
    }

    #[test]
    fn test_drip_feed_from_cadence() {
        // every 3 minutes, 100 views, 1000 views total
        let params = DripFeedParams::from_cadence(1000, 100, Duration::from_secs(180));
        assert_eq!(params.batch_count(1000), 10);
        assert_eq!(params.batch_interval(1000), Duration::from_secs(180));
        assert_eq!(params.total_duration(), Duration::from_secs(1800));
    }

    #[test]
    fn test_speed_policy_serde() {
        let policy = SpeedPolicy::DripFeed(
            DripFeedParams::new(Duration::from_secs(60), 10).with_start_delay(Duration::from_secs(5)),
        );
        let json = serde_json::to_string(&policy).unwrap();
        let back: SpeedPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);

        let json = serde_json::to_string(&SpeedPolicy::Slow).unwrap();
        assert_eq!(json, r#"{"kind":"slow"}"#);
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            OrderState::Created,
            OrderState::Reserved,
            OrderState::InProgress,
            OrderState::PartiallyDelivered,
            OrderState::Completed,
            OrderState::Refunded,
            OrderState::Rejected,
        ] {
            assert_eq!(state.as_str().parse::<OrderState>().unwrap(), state);
        }
        assert!("Bogus".parse::<OrderState>().is_err());
    }
}

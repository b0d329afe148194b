use boostline_types::{LedgerReason, Order, OrderState};
use tracing::{info, warn};

use crate::engine::OrderEngine;
use crate::error::OrderError;

/// What startup recovery did with one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Delivery restarted from the delivered count on record
    Resumed { remaining: u64 },

    /// Interrupted between the reservation and its bookkeeping; funds found
    ReservationConfirmed,

    /// Interrupted before any funds moved
    Rejected,

    /// Delivery is over, the refund still has to land
    RefundPending { amount: u64 },

    /// A delivery task for this order is already running
    AlreadyRunning,

    /// Could not be inspected; left for the next recovery
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    pub order_id: String,
    pub state: OrderState,
    pub action: RecoveryAction,
}

/// Summary of a `resume_active` run
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub results: Vec<RecoveryResult>,
}

impl RecoveryReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Orders that went back to delivering
    pub fn resumed(&self) -> usize {
        self.count(|a| {
            matches!(
                a,
                RecoveryAction::Resumed { .. } | RecoveryAction::ReservationConfirmed
            )
        })
    }

    pub fn refunds_pending(&self) -> usize {
        self.count(|a| matches!(a, RecoveryAction::RefundPending { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|a| matches!(a, RecoveryAction::Rejected))
    }

    pub fn skipped(&self) -> usize {
        self.count(|a| matches!(a, RecoveryAction::Skipped { .. }))
    }

    pub fn action_for(&self, order_id: &str) -> Option<&RecoveryAction> {
        self.results
            .iter()
            .find(|r| r.order_id == order_id)
            .map(|r| &r.action)
    }

    fn count(&self, f: impl Fn(&RecoveryAction) -> bool) -> usize {
        self.results.iter().filter(|r| f(&r.action)).count()
    }
}

impl OrderEngine {
    /// Pick up every non-terminal order left behind by a previous process.
    ///
    /// Funds are never reserved again: an order either already holds its
    /// Purchase entry or is rejected.
    pub async fn resume_active(&self) -> Result<RecoveryReport, OrderError> {
        let orders = self.inner.store.list_active().await?;
        let mut report = RecoveryReport::default();

        for order in orders {
            let order_id = order.order_id.clone();
            let state = order.state;
            let action = self.recover(order).await;

            info!(order_id = %order_id, state = %state, action = ?action, "Recovered order");
            report.results.push(RecoveryResult {
                order_id,
                state,
                action,
            });
        }

        info!(
            total = report.len(),
            resumed = report.resumed(),
            refunds_pending = report.refunds_pending(),
            rejected = report.rejected(),
            skipped = report.skipped(),
            "Recovery finished"
        );
        Ok(report)
    }

    async fn recover(&self, mut order: Order) -> RecoveryAction {
        if self.is_running(&order.order_id) {
            return RecoveryAction::AlreadyRunning;
        }

        match order.state {
            OrderState::Created => match self.recover_created(&mut order).await {
                Ok(action) => action,
                Err(e) => {
                    warn!(order_id = %order.order_id, error = %e, "Could not recover created order");
                    RecoveryAction::Skipped {
                        reason: e.to_string(),
                    }
                }
            },
            OrderState::Reserved | OrderState::InProgress => {
                let remaining = order.remaining_quantity();
                self.spawn_delivery(order, false);
                RecoveryAction::Resumed { remaining }
            }
            OrderState::PartiallyDelivered => {
                let amount = order.shortfall_cost();
                self.spawn_delivery(order, false);
                RecoveryAction::RefundPending { amount }
            }
            state => RecoveryAction::Skipped {
                reason: format!("order is {state}"),
            },
        }
    }

    /// A Created order either reserved its funds before the crash or it did not
    async fn recover_created(&self, order: &mut Order) -> Result<RecoveryAction, OrderError> {
        let entries = self.inner.ledger.entries(&order.user_id).await?;
        let purchased = entries
            .iter()
            .any(|e| e.is_for_order(&order.order_id, LedgerReason::Purchase));

        if purchased {
            self.inner
                .advance(
                    order,
                    OrderState::Reserved,
                    Some("reservation found during recovery".to_string()),
                )
                .await?;
            self.spawn_delivery(order.clone(), false);
            Ok(RecoveryAction::ReservationConfirmed)
        } else {
            self.inner
                .advance(
                    order,
                    OrderState::Rejected,
                    Some("interrupted before funds were reserved".to_string()),
                )
                .await?;
            Ok(RecoveryAction::Rejected)
        }
    }
}

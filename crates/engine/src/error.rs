use boostline_ledger::LedgerError;
use boostline_types::{Coins, OrderModelError, OrderState};
use thiserror::Error;

use crate::store::StoreError;
use crate::validator::ValidationError;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order: {0}")]
    Validation(#[from] ValidationError),

    #[error("insufficient funds for order {order_id}: need {required}, have {available}")]
    InsufficientFunds {
        order_id: String,
        required: Coins,
        available: Coins,
    },

    #[error("order not found: {0}")]
    NotFound(String),

    #[error("order {order_id} does not belong to {user_id}")]
    NotOwner { order_id: String, user_id: String },

    #[error("order {order_id} already finished ({state})")]
    AlreadyTerminal { order_id: String, state: OrderState },

    #[error("order engine is shut down")]
    ShutDown,

    #[error(transparent)]
    Model(#[from] OrderModelError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Errors caused by the request rather than by the system
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            OrderError::Validation(_)
                | OrderError::InsufficientFunds { .. }
                | OrderError::NotFound(_)
                | OrderError::NotOwner { .. }
                | OrderError::AlreadyTerminal { .. }
        )
    }
}

/// Builder error
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("missing required field: {field}")]
    MissingField { field: String },
}

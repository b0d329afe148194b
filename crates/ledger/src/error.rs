use boostline_types::Coins;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds for {user_id}: need {required}, have {available}")]
    InsufficientFunds {
        user_id: String,
        required: Coins,
        available: Coins,
    },

    #[error("invalid amount: {amount}")]
    InvalidAmount { amount: Coins },

    #[error("order {order_id} already reserved {existing}, refusing to reserve {requested}")]
    ReservationMismatch {
        order_id: String,
        existing: Coins,
        requested: Coins,
    },

    #[error("no purchase recorded for order {order_id}")]
    NoPurchase { order_id: String },

    #[error("refund of {requested} for order {order_id} exceeds purchase of {purchased}")]
    RefundExceedsPurchase {
        order_id: String,
        requested: Coins,
        purchased: Coins,
    },

    #[error("ledger inconsistency for {user_id}: cached {cached}, log says {computed}")]
    Inconsistency {
        user_id: String,
        cached: i64,
        computed: i64,
    },

    #[error("balance of {user_id} would exceed {max} coins", max = i64::MAX)]
    BalanceOverflow { user_id: String },

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl LedgerError {
    /// Failures of the storage layer rather than of the request itself
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::DatabaseError(_) | LedgerError::ConnectionError(_)
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                LedgerError::ConnectionError(e.to_string())
            }
            other => LedgerError::DatabaseError(other.to_string()),
        }
    }
}

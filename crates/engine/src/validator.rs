use boostline_types::{Coins, OrderRequest, SpeedPolicy};
use thiserror::Error;
use url::Url;

/// Request validator run before any funds move
#[derive(Debug, Clone)]
pub struct OrderValidator {
    /// Smallest order accepted (views)
    min_quantity: u64,
    /// Largest order accepted (views)
    max_quantity: u64,
    /// Hosts targets may point at; empty accepts any host
    allowed_hosts: Vec<String>,
}

impl OrderValidator {
    pub fn new(min_quantity: u64, max_quantity: u64, allowed_hosts: Vec<String>) -> Self {
        Self {
            min_quantity,
            max_quantity,
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Create a validator with default settings
    pub fn default_config() -> Self {
        Self::new(100, 100_000, vec!["t.me".to_string()])
    }

    /// Accept any quantity above zero and any http(s) target
    pub fn permissive() -> Self {
        Self::new(1, u64::MAX, Vec::new())
    }

    pub fn validate(&self, request: &OrderRequest, unit_price: Coins) -> Result<(), ValidationError> {
        // 1. Check who is buying
        if request.user_id.trim().is_empty() {
            return Err(ValidationError::MissingUser);
        }

        // 2. Check quantity
        self.validate_quantity(request.quantity)?;

        // 3. Check target
        self.validate_target(&request.target)?;

        // 4. Check pacing
        self.validate_speed(&request.speed)?;

        // 5. Check price
        if unit_price == 0 {
            return Err(ValidationError::ZeroPrice);
        }
        if request.cost(unit_price).is_none() {
            return Err(ValidationError::CostOverflow {
                quantity: request.quantity,
                unit_price,
            });
        }

        Ok(())
    }

    pub fn validate_quantity(&self, quantity: u64) -> Result<(), ValidationError> {
        if quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        if quantity < self.min_quantity {
            return Err(ValidationError::QuantityTooSmall {
                quantity,
                minimum: self.min_quantity,
            });
        }
        if quantity > self.max_quantity {
            return Err(ValidationError::QuantityTooLarge {
                quantity,
                maximum: self.max_quantity,
            });
        }
        Ok(())
    }

    pub fn validate_target(&self, target: &str) -> Result<(), ValidationError> {
        let url = Url::parse(target.trim()).map_err(|e| ValidationError::InvalidTarget {
            target: target.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidTarget {
                target: target.to_string(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        let host = url
            .host_str()
            .ok_or_else(|| ValidationError::InvalidTarget {
                target: target.to_string(),
                reason: "missing host".to_string(),
            })?
            .to_ascii_lowercase();

        if !self.allowed_hosts.is_empty() && !self.allowed_hosts.contains(&host) {
            return Err(ValidationError::HostNotAllowed { host });
        }

        if url.path().trim_matches('/').is_empty() {
            return Err(ValidationError::InvalidTarget {
                target: target.to_string(),
                reason: "missing post path".to_string(),
            });
        }

        Ok(())
    }

    pub fn validate_speed(&self, speed: &SpeedPolicy) -> Result<(), ValidationError> {
        if let SpeedPolicy::DripFeed(params) = speed {
            if params.total_duration_ms == 0 {
                return Err(ValidationError::InvalidDripFeed {
                    reason: "total duration must be positive".to_string(),
                });
            }
            if params.batch_size == 0 {
                return Err(ValidationError::InvalidDripFeed {
                    reason: "batch size must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("user id is missing")]
    MissingUser,

    #[error("quantity must be positive")]
    ZeroQuantity,

    #[error("quantity {quantity} is below the minimum of {minimum}")]
    QuantityTooSmall { quantity: u64, minimum: u64 },

    #[error("quantity {quantity} is above the maximum of {maximum}")]
    QuantityTooLarge { quantity: u64, maximum: u64 },

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("target host {host} is not accepted")]
    HostNotAllowed { host: String },

    #[error("invalid drip feed parameters: {reason}")]
    InvalidDripFeed { reason: String },

    #[error("unit price must be positive")]
    ZeroPrice,

    #[error("cost of {quantity} views at {unit_price} overflows")]
    CostOverflow { quantity: u64, unit_price: Coins },
}

//! Coin-funded view delivery.
//!
//! Users pay for views on a post out of an internal coin balance; the order
//! engine reserves the coins, paces delivery through an external provider and
//! refunds whatever the provider could not deliver.

pub use boostline_config as config;
pub use boostline_engine as engine;
pub use boostline_ledger as ledger;
pub use boostline_metrics as metrics;
pub use boostline_provider as provider;
pub use boostline_ratelimit as ratelimit;
pub use boostline_scheduler as scheduler;
pub use boostline_types as types;

pub use boostline_engine::{OrderEngine, OrderError};
pub use boostline_types::{Order, OrderRequest, OrderState, SpeedPolicy};

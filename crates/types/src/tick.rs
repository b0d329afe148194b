use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One scheduled dispatch of views to the provider.
///
/// Ticks are generated on demand from an order and its speed policy and are
/// never stored; `scheduled_at` is an offset from the start of the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTick {
    pub order_id: String,
    pub sequence: u32,
    pub quantity: u64,
    pub scheduled_at: Duration,
}

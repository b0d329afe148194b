//! Delivery scheduling.
//!
//! A [`Scheduler`] turns what is left of an order into a lazy
//! [`DeliverySchedule`] of [`DispatchTick`]s. Schedules are always derived from
//! `requested_quantity - delivered_quantity`, so a restarted process resumes
//! by planning again instead of replaying a stored tick log.

use std::time::Duration;

use boostline_types::{DispatchTick, DripFeedParams, Order, SpeedPolicy};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pacing for the `Slow` policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Largest batch the provider accepts per dispatch
    pub slow_batch_size: u64,
    /// Spacing between slow batches
    pub slow_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slow_batch_size: 1_000,
            slow_interval: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Plan the remaining delivery of `order`
    pub fn plan(&self, order: &Order) -> DeliverySchedule {
        self.plan_remaining(
            &order.order_id,
            order.requested_quantity,
            order.delivered_quantity,
            &order.speed_policy,
        )
    }

    pub fn plan_remaining(
        &self,
        order_id: &str,
        requested_quantity: u64,
        delivered_quantity: u64,
        policy: &SpeedPolicy,
    ) -> DeliverySchedule {
        let remaining = requested_quantity.saturating_sub(delivered_quantity);

        let schedule = match policy {
            SpeedPolicy::Maximum => DeliverySchedule {
                order_id: order_id.to_string(),
                remaining,
                batch_size: remaining.max(1),
                interval: Duration::ZERO,
                first_at: Duration::ZERO,
                next_sequence: 0,
            },
            SpeedPolicy::Slow => DeliverySchedule {
                order_id: order_id.to_string(),
                remaining,
                batch_size: self.config.slow_batch_size.max(1),
                interval: self.config.slow_interval,
                first_at: Duration::ZERO,
                next_sequence: 0,
            },
            SpeedPolicy::DripFeed(params) => {
                drip_feed(order_id, requested_quantity, delivered_quantity, params)
            }
        };

        debug!(
            order_id = %order_id,
            policy = policy.name(),
            remaining,
            ticks = schedule.len(),
            interval_ms = schedule.interval.as_millis() as u64,
            "Planned delivery"
        );

        schedule
    }
}

// Spacing is fixed by the full purchased quantity so a resumed order keeps its
// original cadence; the start delay only applies before anything was delivered.
fn drip_feed(
    order_id: &str,
    requested_quantity: u64,
    delivered_quantity: u64,
    params: &DripFeedParams,
) -> DeliverySchedule {
    let first_at = if delivered_quantity == 0 {
        params.start_delay()
    } else {
        Duration::ZERO
    };

    DeliverySchedule {
        order_id: order_id.to_string(),
        remaining: requested_quantity.saturating_sub(delivered_quantity),
        batch_size: params.batch_size.max(1),
        interval: params.batch_interval(requested_quantity),
        first_at,
        next_sequence: 0,
    }
}

/// Lazily generated ticks for one order.
///
/// `scheduled_at` is an offset from the moment the schedule starts running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySchedule {
    order_id: String,
    remaining: u64,
    batch_size: u64,
    interval: Duration,
    first_at: Duration,
    next_sequence: u32,
}

impl DeliverySchedule {
    pub fn order_id(&self) -> &str {
        &self.order_id
    }

    /// Views not yet handed out as ticks
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Ticks left to emit
    pub fn len(&self) -> usize {
        self.remaining.div_ceil(self.batch_size) as usize
    }

    /// Offset of the next tick, if any
    pub fn next_at(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(self.offset_of(self.next_sequence))
    }

    fn offset_of(&self, sequence: u32) -> Duration {
        self.first_at
            .saturating_add(self.interval.saturating_mul(sequence))
    }
}

impl Iterator for DeliverySchedule {
    type Item = DispatchTick;

    fn next(&mut self) -> Option<DispatchTick> {
        if self.remaining == 0 {
            return None;
        }

        let quantity = self.remaining.min(self.batch_size);
        let tick = DispatchTick {
            order_id: self.order_id.clone(),
            sequence: self.next_sequence,
            quantity,
            scheduled_at: self.offset_of(self.next_sequence),
        };

        self.remaining -= quantity;
        self.next_sequence += 1;
        Some(tick)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.len();
        (len, Some(len))
    }
}

impl ExactSizeIterator for DeliverySchedule {}

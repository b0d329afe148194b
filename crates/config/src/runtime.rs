//! Turning configuration into the engine's runtime settings

use std::time::Duration;

use boostline_engine::{EngineConfig, OrderValidator};
use boostline_provider::SmmPanelConfig;
use boostline_ratelimit::{RateLimiter, RetryPolicy};
use boostline_scheduler::SchedulerConfig;

use crate::AppConfig;

impl AppConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            provider_timeout: Duration::from_secs(self.provider.timeout_secs),
            tick_retry: self.tick_retry_policy(),
            refund_retry: RetryPolicy::unbounded(
                Duration::from_millis(self.refund_retry.initial_backoff_ms),
                Duration::from_millis(self.refund_retry.max_backoff_ms),
            ),
            status_poll_interval: Duration::from_secs(self.provider.status_poll_interval_secs),
            max_status_polls: self.provider.max_status_polls,
            max_concurrent_calls: self.provider.max_concurrent_calls,
            scheduler: self.scheduler_config(),
        }
    }

    pub fn tick_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(
            self.retry.max_retries,
            Duration::from_millis(self.retry.initial_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
        )
        .with_multiplier(self.retry.multiplier)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            slow_batch_size: self.delivery.slow_batch_size,
            slow_interval: Duration::from_secs(self.delivery.slow_interval_secs),
        }
    }

    pub fn order_validator(&self) -> OrderValidator {
        OrderValidator::new(
            self.orders.min_quantity,
            self.orders.max_quantity,
            self.orders.allowed_hosts.clone(),
        )
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::per_second(self.provider.requests_per_second, self.provider.burst)
    }

    pub fn smm_panel_config(&self) -> SmmPanelConfig {
        SmmPanelConfig {
            api_url: self.provider.api_url.clone(),
            api_key: self.provider.api_key.clone(),
            service_id: self.provider.service_id.clone(),
            timeout: Duration::from_secs(self.provider.timeout_secs),
        }
    }
}

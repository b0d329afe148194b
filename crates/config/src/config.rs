//! Core configuration structures for the boostline daemon

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Process-level settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Fulfillment provider
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    /// Limits applied to incoming orders
    #[serde(default)]
    pub orders: OrderLimitsConfig,

    /// Pacing of the Slow speed
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Retries of failed ticks
    #[serde(default)]
    pub retry: RetryConfig,

    /// Retries of failed refunds
    #[serde(default)]
    pub refund_retry: RefundRetryConfig,
}

/// Process-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// SQLite database holding the ledger and the orders
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Enable the metrics endpoint
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Metrics server listen address
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

/// Fulfillment provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Panel API endpoint
    #[serde(default)]
    pub api_url: String,

    #[serde(default)]
    pub api_key: String,

    /// Panel service that delivers views
    #[serde(default)]
    pub service_id: String,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Provider calls in flight at once
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Request rate ceiling; 0 disables it
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Seconds between status checks of a queued job
    #[serde(default = "default_status_poll_interval_secs")]
    pub status_poll_interval_secs: u64,

    #[serde(default = "default_max_status_polls")]
    pub max_status_polls: u32,
}

/// Pricing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Coins per view
    #[serde(default = "default_unit_price")]
    pub unit_price: u64,
}

/// Order limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLimitsConfig {
    #[serde(default = "default_min_quantity")]
    pub min_quantity: u64,

    #[serde(default = "default_max_quantity")]
    pub max_quantity: u64,

    /// Hosts a target may point at; empty allows any host
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
}

/// Delivery pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Largest tick the Slow speed sends
    #[serde(default = "default_slow_batch_size")]
    pub slow_batch_size: u64,

    /// Seconds between Slow ticks
    #[serde(default = "default_slow_interval_secs")]
    pub slow_interval_secs: u64,
}

/// Tick retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

/// Refund retry policy; attempts are unbounded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRetryConfig {
    #[serde(default = "default_refund_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://boostline.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent_calls() -> usize {
    16
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_burst() -> u32 {
    10
}

fn default_status_poll_interval_secs() -> u64 {
    30
}

fn default_max_status_polls() -> u32 {
    120 // one hour at the default interval
}

fn default_unit_price() -> u64 {
    1
}

fn default_min_quantity() -> u64 {
    100
}

fn default_max_quantity() -> u64 {
    100_000
}

fn default_allowed_hosts() -> Vec<String> {
    vec!["t.me".to_string()]
}

fn default_slow_batch_size() -> u64 {
    1000
}

fn default_slow_interval_secs() -> u64 {
    1800 // 30 minutes
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    5000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_multiplier() -> u32 {
    2
}

fn default_refund_initial_backoff_ms() -> u64 {
    1000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            metrics_enabled: default_true(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            service_id: String::new(),
            timeout_secs: default_provider_timeout_secs(),
            max_concurrent_calls: default_max_concurrent_calls(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            status_poll_interval_secs: default_status_poll_interval_secs(),
            max_status_polls: default_max_status_polls(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            unit_price: default_unit_price(),
        }
    }
}

impl Default for OrderLimitsConfig {
    fn default() -> Self {
        Self {
            min_quantity: default_min_quantity(),
            max_quantity: default_max_quantity(),
            allowed_hosts: default_allowed_hosts(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            slow_batch_size: default_slow_batch_size(),
            slow_interval_secs: default_slow_interval_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl Default for RefundRetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_refund_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

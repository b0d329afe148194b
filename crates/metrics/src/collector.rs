use std::time::Duration;

use boostline_types::OrderState;
use prometheus::{Encoder, Registry, TextEncoder};

use crate::metrics::*;

/// Metrics collector for the order engine
pub struct MetricsCollector {
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Self {
        let registry = Registry::new();
        Self { registry }
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ORDER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record an accepted submission
    pub fn record_order_submitted(&self, quantity: u64) {
        ORDERS_SUBMITTED.inc();
        VIEWS_REQUESTED.inc_by(quantity);
    }

    /// Record an order rejected before any delivery
    pub fn record_order_rejected(&self, reason: RejectReason) {
        let reason_str = match reason {
            RejectReason::Validation => "validation",
            RejectReason::InsufficientFunds => "insufficient_funds",
            RejectReason::Ledger => "ledger",
        };

        ORDERS_REJECTED.with_label_values(&[reason_str]).inc();
    }

    /// Record an order entering `state`
    pub fn record_order_state(&self, state: OrderState) {
        let state_str = match state {
            OrderState::Created => "created",
            OrderState::Reserved => "reserved",
            OrderState::InProgress => "in_progress",
            OrderState::PartiallyDelivered => "partially_delivered",
            OrderState::Completed => "completed",
            OrderState::Refunded => "refunded",
            OrderState::Rejected => "rejected",
        };

        ORDER_STATE_COUNT.with_label_values(&[state_str]).inc();
    }

    /// Record how long an order took to reach a terminal state
    pub fn record_order_duration(&self, duration: Duration) {
        ORDER_DURATION.observe(duration.as_secs_f64());
    }

    /// Update the number of orders being delivered
    pub fn set_active_orders(&self, count: i64) {
        ACTIVE_ORDERS.set(count);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DELIVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_views_delivered(&self, views: u64) {
        VIEWS_DELIVERED.inc_by(views);
    }

    pub fn record_tick_retry(&self) {
        TICK_RETRIES.inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PROVIDER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a provider call with its outcome label (`ok`, `rejected`,
    /// `transient`, `permanent`, `timeout`)
    pub fn record_provider_call(&self, call: ProviderCall, outcome: &str, latency: Duration) {
        let call_str = match call {
            ProviderCall::Submit => "submit",
            ProviderCall::Status => "status",
        };

        PROVIDER_CALLS.with_label_values(&[call_str, outcome]).inc();
        PROVIDER_LATENCY
            .with_label_values(&[call_str])
            .observe(latency.as_millis() as f64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LEDGER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_coins_reserved(&self, coins: u64) {
        COINS_RESERVED.inc_by(coins);
    }

    pub fn record_coins_refunded(&self, coins: u64) {
        COINS_REFUNDED.inc_by(coins);
    }

    pub fn record_refund_retry(&self) {
        REFUND_RETRIES.inc();
    }

    pub fn record_ledger_inconsistency(&self) {
        LEDGER_INCONSISTENCIES.inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SYSTEM METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_error(&self, error_type: &str) {
        ERRORS.with_label_values(&[error_type]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export metrics in Prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut metric_families = prometheus::gather();
        metric_families.extend(self.registry.gather());
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Why an order never started delivering
#[derive(Debug, Clone, Copy)]
pub enum RejectReason {
    Validation,
    InsufficientFunds,
    Ledger,
}

/// Provider call type
#[derive(Debug, Clone, Copy)]
pub enum ProviderCall {
    Submit,
    Status,
}

/// Metrics error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
    #[error("registry error: {0}")]
    RegistryError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        assert!(collector.export_metrics().is_ok());
    }

    #[test]
    fn test_record_order_metrics() {
        let collector = MetricsCollector::new();

        collector.record_order_submitted(500);
        collector.record_order_rejected(RejectReason::InsufficientFunds);
        collector.record_order_state(OrderState::Reserved);
        collector.record_order_state(OrderState::Completed);
        collector.record_order_duration(Duration::from_secs(42));

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("boostline_orders_submitted_total"));
        assert!(metrics.contains("boostline_orders_rejected_total"));
        assert!(metrics.contains("state=\"completed\""));
        assert!(metrics.contains("boostline_order_duration_seconds"));
    }

    #[test]
    fn test_record_provider_metrics() {
        let collector = MetricsCollector::new();

        collector.record_provider_call(ProviderCall::Submit, "ok", Duration::from_millis(120));
        collector.record_provider_call(ProviderCall::Status, "timeout", Duration::from_secs(60));

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("boostline_provider_calls_total"));
        assert!(metrics.contains("boostline_provider_latency_ms"));
    }

    #[test]
    fn test_record_ledger_metrics() {
        let collector = MetricsCollector::new();

        collector.record_coins_reserved(500);
        collector.record_coins_refunded(200);
        collector.record_refund_retry();
        collector.record_ledger_inconsistency();

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("boostline_coins_reserved_total"));
        assert!(metrics.contains("boostline_coins_refunded_total"));
        assert!(metrics.contains("boostline_ledger_inconsistencies_total"));
    }
}

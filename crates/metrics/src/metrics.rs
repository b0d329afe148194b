use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // ORDER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Total number of orders submitted
    pub static ref ORDERS_SUBMITTED: IntCounter = register_int_counter!(
        "boostline_orders_submitted_total",
        "Total number of orders submitted"
    )
    .unwrap();

    /// Orders rejected before delivery, by reason
    pub static ref ORDERS_REJECTED: IntCounterVec = register_int_counter_vec!(
        "boostline_orders_rejected_total",
        "Total orders rejected by reason",
        &["reason"]
    )
    .unwrap();

    /// State transitions, by target state
    pub static ref ORDER_STATE_COUNT: IntCounterVec = register_int_counter_vec!(
        "boostline_order_state_total",
        "Total order transitions by state entered",
        &["state"]
    )
    .unwrap();

    /// Orders with a running delivery task
    pub static ref ACTIVE_ORDERS: IntGauge = register_int_gauge!(
        "boostline_orders_active",
        "Current number of orders being delivered"
    )
    .unwrap();

    /// Time from submission to a terminal state (seconds)
    pub static ref ORDER_DURATION: Histogram = register_histogram!(
        "boostline_order_duration_seconds",
        "Order lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 21600.0, 86400.0]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // DELIVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Views requested across all accepted orders
    pub static ref VIEWS_REQUESTED: IntCounter = register_int_counter!(
        "boostline_views_requested_total",
        "Total views purchased"
    )
    .unwrap();

    /// Views the provider reported as delivered
    pub static ref VIEWS_DELIVERED: IntCounter = register_int_counter!(
        "boostline_views_delivered_total",
        "Total views delivered"
    )
    .unwrap();

    /// Tick dispatch retries after provider failures
    pub static ref TICK_RETRIES: IntCounter = register_int_counter!(
        "boostline_tick_retries_total",
        "Total tick dispatch retries"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // PROVIDER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Provider calls by call type and outcome
    pub static ref PROVIDER_CALLS: IntCounterVec = register_int_counter_vec!(
        "boostline_provider_calls_total",
        "Total provider calls",
        &["call", "outcome"]
    )
    .unwrap();

    /// Provider call latency (in milliseconds)
    pub static ref PROVIDER_LATENCY: HistogramVec = register_histogram_vec!(
        "boostline_provider_latency_ms",
        "Provider call latency in milliseconds",
        &["call"],
        vec![50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0, 60000.0]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // LEDGER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Coins debited for orders
    pub static ref COINS_RESERVED: IntCounter = register_int_counter!(
        "boostline_coins_reserved_total",
        "Total coins reserved for orders"
    )
    .unwrap();

    /// Coins returned for undelivered views
    pub static ref COINS_REFUNDED: IntCounter = register_int_counter!(
        "boostline_coins_refunded_total",
        "Total coins refunded"
    )
    .unwrap();

    /// Refund attempts that had to be retried
    pub static ref REFUND_RETRIES: IntCounter = register_int_counter!(
        "boostline_refund_retries_total",
        "Total refund retries"
    )
    .unwrap();

    /// Balance cache mismatches found and rebuilt from the log
    pub static ref LEDGER_INCONSISTENCIES: IntCounter = register_int_counter!(
        "boostline_ledger_inconsistencies_total",
        "Total ledger cache inconsistencies detected"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // SYSTEM METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Error-level events by `error_type` field
    pub static ref ERRORS: IntCounterVec = register_int_counter_vec!(
        "boostline_errors_total",
        "Total error events by type",
        &["error_type"]
    )
    .unwrap();
}

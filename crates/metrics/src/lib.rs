//! Metrics and monitoring for boostline
//!
//! Prometheus counters for orders, deliveries, provider calls and the coin
//! ledger, an HTTP endpoint for scraping them, and tracing setup with
//! per-order correlation ids.
//!
//! # Example
//!
//! ```no_run
//! use boostline_metrics::{MetricsCollector, MetricsServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let collector = Arc::new(MetricsCollector::new());
//!     collector.record_order_submitted(500);
//!
//!     let server = MetricsServer::new(collector.clone(), "0.0.0.0:9090".to_string());
//!     server
//!         .serve_with_shutdown(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod collector;
pub mod http;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError, ProviderCall, RejectReason};
pub use http::{MetricsServer, MetricsServerError};
pub use tracing::{
    init_tracing, init_tracing_with_metrics, CorrelationId, LogFormat, OrderSpan,
    TracingError,
};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{field::Visit, Event, Level, Subscriber};
use tracing_subscriber::{
    fmt as tracing_fmt,
    layer::{Context, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::collector::MetricsCollector;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(TracingError::InvalidFormat(other.to_string())),
        }
    }
}

/// Initialize tracing. `RUST_LOG` takes precedence over `level`.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<(), TracingError> {
    init_tracing_with_metrics(level, format, Arc::new(MetricsCollector::new()))
}

/// Initialize tracing with metrics integration
pub fn init_tracing_with_metrics(
    level: &str,
    format: LogFormat,
    collector: Arc<MetricsCollector>,
) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (json_layer, pretty_layer) = match format {
        LogFormat::Json => (
            Some(
                tracing_fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .json(),
            ),
            None,
        ),
        LogFormat::Pretty => (None, Some(tracing_fmt::layer().with_target(true))),
    };

    let metrics_layer = MetricsLayer::new(collector);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(metrics_layer)
        .try_init()
        .map_err(|e| TracingError::InitError(e.to_string()))?;

    Ok(())
}

/// Tracing layer that counts error events by their `error_type` field
pub struct MetricsLayer {
    collector: Arc<MetricsCollector>,
}

impl MetricsLayer {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }
}

impl<S> Layer<S> for MetricsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = ErrorTypeVisitor::default();
        event.record(&mut visitor);

        let error_type = visitor.error_type.as_deref().unwrap_or("unclassified");
        self.collector.record_error(error_type);
    }
}

/// Visitor to extract the `error_type` field from events
#[derive(Default)]
struct ErrorTypeVisitor {
    error_type: Option<String>,
}

impl Visit for ErrorTypeVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "error_type" {
            self.error_type = Some(format!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "error_type" {
            self.error_type = Some(value.to_string());
        }
    }
}

/// Correlation ID for following one order's delivery across log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    /// Generate a new correlation ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the correlation ID as a string
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for one order's delivery
#[derive(Debug, Clone)]
pub struct OrderSpan {
    pub correlation_id: CorrelationId,
    pub order_id: String,
    pub user_id: String,
}

impl OrderSpan {
    pub fn new(order_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            order_id: order_id.into(),
            user_id: user_id.into(),
        }
    }

    /// The `order` span, for `Instrument::instrument`
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "order",
            correlation_id = %self.correlation_id,
            order_id = %self.order_id,
            user_id = %self.user_id,
        )
    }

    /// Enter a tracing span for this order
    pub fn enter(&self) -> tracing::span::EnteredSpan {
        self.span().entered()
    }
}

/// Tracing error types
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),
    #[error("unknown log format: {0}")]
    InvalidFormat(String),
}

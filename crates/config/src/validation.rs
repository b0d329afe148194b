//! Configuration validation

use crate::{AppConfig, ConfigError, Result};
use std::net::SocketAddr;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration, reporting every problem at once
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let errors = collect_errors(config);

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Every problem found in `config`
pub fn collect_errors(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // Service
    if let Err(e) = validate_log_level(&config.service.log_level) {
        errors.push(e);
    }

    if !matches!(config.service.log_format.as_str(), "json" | "pretty") {
        errors.push(ValidationError::new(
            "service.log_format",
            format!("invalid log format '{}', must be json or pretty", config.service.log_format),
        ));
    }

    if !config.service.database_url.starts_with("sqlite:") {
        errors.push(ValidationError::new(
            "service.database_url",
            "must be a sqlite: URL",
        ));
    }

    if config.service.metrics_enabled && config.service.metrics_addr.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "service.metrics_addr",
            format!("'{}' is not a socket address", config.service.metrics_addr),
        ));
    }

    // Provider
    if let Err(e) = validate_url(&config.provider.api_url) {
        errors.push(ValidationError::new("provider.api_url", e));
    }

    if config.provider.api_key.is_empty() {
        errors.push(ValidationError::new("provider.api_key", "api key is required"));
    }

    if config.provider.service_id.is_empty() {
        errors.push(ValidationError::new(
            "provider.service_id",
            "service id is required",
        ));
    }

    for (field, value) in [
        ("provider.timeout_secs", config.provider.timeout_secs),
        (
            "provider.max_concurrent_calls",
            config.provider.max_concurrent_calls as u64,
        ),
        (
            "provider.status_poll_interval_secs",
            config.provider.status_poll_interval_secs,
        ),
        (
            "provider.max_status_polls",
            u64::from(config.provider.max_status_polls),
        ),
        ("pricing.unit_price", config.pricing.unit_price),
        ("orders.min_quantity", config.orders.min_quantity),
        ("delivery.slow_batch_size", config.delivery.slow_batch_size),
        ("delivery.slow_interval_secs", config.delivery.slow_interval_secs),
        ("retry.initial_backoff_ms", config.retry.initial_backoff_ms),
        ("retry.multiplier", u64::from(config.retry.multiplier)),
        (
            "refund_retry.initial_backoff_ms",
            config.refund_retry.initial_backoff_ms,
        ),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.provider.requests_per_second > 0 && config.provider.burst == 0 {
        errors.push(ValidationError::new(
            "provider.burst",
            "must be greater than 0 when a request rate is set",
        ));
    }

    // Orders
    if config.orders.min_quantity > config.orders.max_quantity {
        errors.push(ValidationError::new(
            "orders.max_quantity",
            format!(
                "must be at least min_quantity ({})",
                config.orders.min_quantity
            ),
        ));
    }

    for (idx, host) in config.orders.allowed_hosts.iter().enumerate() {
        if host.trim().is_empty() || host.contains('/') {
            errors.push(ValidationError::new(
                format!("orders.allowed_hosts[{idx}]"),
                format!("'{host}' is not a host name"),
            ));
        }
    }

    // Retries
    if config.retry.max_backoff_ms < config.retry.initial_backoff_ms {
        errors.push(ValidationError::new(
            "retry.max_backoff_ms",
            "must be at least initial_backoff_ms",
        ));
    }

    if config.refund_retry.max_backoff_ms < config.refund_retry.initial_backoff_ms {
        errors.push(ValidationError::new(
            "refund_retry.max_backoff_ms",
            "must be at least initial_backoff_ms",
        ));
    }

    errors
}

/// Validate an http(s) URL
pub fn validate_url(url: &str) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }

    let parsed = url::Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err("URL must start with http:// or https://".to_string());
    }

    Ok(())
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "service.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}

//! Client for SMM-panel style APIs (`/api/v2` with form-encoded `action`s).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{JobStatus, ProviderError, ProviderGateway, SubmitReceipt};

#[derive(Debug, Clone)]
pub struct SmmPanelConfig {
    pub api_url: String,
    pub api_key: String,
    pub service_id: String,
    pub timeout: Duration,
}

/// SMM panel provider.
///
/// Panel orders are asynchronous: `submit` returns a job reference of the form
/// `<panel order id>/<quantity>` so that `status` can turn the panel's
/// `remains` into a delivered count without any local bookkeeping.
pub struct SmmPanelClient {
    config: SmmPanelConfig,
    client: reqwest::Client,
}

impl SmmPanelClient {
    pub fn new(config: SmmPanelConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Transient(format!("failed to build http client: {e}")))?;

        Ok(Self { config, client })
    }

    async fn post(&self, form: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(&self.config.api_url)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.config.timeout)
                } else {
                    ProviderError::Transient(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("SMM panel error: {} - {}", status, body);
            return Err(ProviderError::Transient(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("Failed to parse response: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    order: Option<Value>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: Option<String>,
    remains: Option<Value>,
    error: Option<String>,
}

fn job_ref(panel_order: &str, quantity: u64) -> String {
    format!("{panel_order}/{quantity}")
}

fn parse_job_ref(job_ref: &str) -> Result<(&str, u64), ProviderError> {
    let (panel_order, quantity) = job_ref
        .rsplit_once('/')
        .ok_or_else(|| ProviderError::Permanent(format!("malformed job reference: {job_ref}")))?;
    let quantity = quantity
        .parse()
        .map_err(|_| ProviderError::Permanent(format!("malformed job reference: {job_ref}")))?;
    Ok((panel_order, quantity))
}

// Panels disagree on whether numbers are sent as numbers or strings
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn interpret_add(body: Value, quantity: u64) -> Result<SubmitReceipt, ProviderError> {
    let parsed: AddResponse = serde_json::from_value(body.clone())
        .map_err(|e| ProviderError::Transient(format!("unexpected add response {body}: {e}")))?;

    if let Some(order) = parsed.order.as_ref().and_then(as_text) {
        return Ok(SubmitReceipt::queued(job_ref(&order, quantity)));
    }
    if let Some(error) = parsed.error {
        return Err(ProviderError::Permanent(error));
    }
    Err(ProviderError::Transient(format!("unexpected add response: {body}")))
}

fn interpret_status(body: Value, quantity: u64) -> Result<JobStatus, ProviderError> {
    let parsed: StatusResponse = serde_json::from_value(body.clone())
        .map_err(|e| ProviderError::Transient(format!("unexpected status response {body}: {e}")))?;

    if let Some(error) = parsed.error {
        return Err(ProviderError::Permanent(error));
    }
    let status = parsed
        .status
        .ok_or_else(|| ProviderError::Transient(format!("unexpected status response: {body}")))?;

    let remains = parsed.remains.as_ref().and_then(as_count);
    let is_final = matches!(
        status.to_ascii_lowercase().as_str(),
        "completed" | "partial" | "canceled" | "cancelled"
    );

    let delivered_so_far = match (status.to_ascii_lowercase().as_str(), remains) {
        (_, Some(remains)) => quantity.saturating_sub(remains),
        ("completed", None) => quantity,
        _ => 0,
    };

    Ok(JobStatus {
        delivered_so_far,
        is_final,
    })
}

#[async_trait]
impl ProviderGateway for SmmPanelClient {
    async fn submit(&self, target: &str, quantity: u64) -> Result<SubmitReceipt, ProviderError> {
        let quantity_str = quantity.to_string();
        let form = [
            ("key", self.config.api_key.as_str()),
            ("action", "add"),
            ("service", self.config.service_id.as_str()),
            ("link", target),
            ("quantity", quantity_str.as_str()),
        ];

        debug!(target = %target, quantity, "Submitting panel order");
        let body = self.post(&form).await?;
        interpret_add(body, quantity)
    }

    async fn status(&self, job_ref: &str) -> Result<JobStatus, ProviderError> {
        let (panel_order, quantity) = parse_job_ref(job_ref)?;
        let form = [
            ("key", self.config.api_key.as_str()),
            ("action", "status"),
            ("order", panel_order),
        ];

        debug!(job_ref = %job_ref, "Checking panel order status");
        let body = self.post(&form).await?;
        interpret_status(body, quantity)
    }

    fn name(&self) -> &str {
        "smm-panel"
    }
}

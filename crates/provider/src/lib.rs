//! Provider gateway.
//!
//! The order engine only sees [`ProviderGateway`]: submit a quantity of views
//! for a target and, when the provider works asynchronously, poll the returned
//! job reference. Delivered counts are always taken from what the provider
//! reports, never assumed.

pub mod mock;
pub mod smm;

pub use mock::{ScriptedProvider, ScriptedSubmit, SubmitCall};
pub use smm::{SmmPanelClient, SmmPanelConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Answer to a submit call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Reference to poll with [`ProviderGateway::status`]; `None` when the
    /// provider answered synchronously
    pub job_ref: Option<String>,
    /// Views delivered as part of this call
    pub delivered: u64,
    pub accepted: bool,
}

impl SubmitReceipt {
    /// Delivered synchronously
    pub fn delivered(delivered: u64) -> Self {
        Self {
            job_ref: None,
            delivered,
            accepted: true,
        }
    }

    /// Accepted for asynchronous delivery
    pub fn queued(job_ref: impl Into<String>) -> Self {
        Self {
            job_ref: Some(job_ref.into()),
            delivered: 0,
            accepted: true,
        }
    }

    pub fn rejected() -> Self {
        Self {
            job_ref: None,
            delivered: 0,
            accepted: false,
        }
    }
}

/// Progress of an asynchronous job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub delivered_so_far: u64,
    /// No further progress will be reported
    pub is_final: bool,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Transport failure, 5xx, unreadable response
    #[error("provider unavailable: {0}")]
    Transient(String),

    /// Explicit rejection by the provider
    #[error("provider rejected request: {0}")]
    Permanent(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Permanent(_))
    }

    /// Label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Transient(_) => "transient",
            ProviderError::Permanent(_) => "permanent",
            ProviderError::Timeout(_) => "timeout",
        }
    }
}

#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn submit(&self, target: &str, quantity: u64) -> Result<SubmitReceipt, ProviderError>;

    async fn status(&self, job_ref: &str) -> Result<JobStatus, ProviderError>;

    fn name(&self) -> &str {
        "provider"
    }
}

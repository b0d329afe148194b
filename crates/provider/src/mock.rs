//! Scripted provider for tests and local runs

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::{JobStatus, ProviderError, ProviderGateway, SubmitReceipt};

/// What the next submit call does
#[derive(Debug, Clone)]
pub enum ScriptedSubmit {
    /// Deliver everything asked for
    Full,
    /// Deliver at most this many views
    Partial(u64),
    /// Accept and hand out a job reference to poll
    Job(String),
    /// Answer with `accepted = false`
    Reject,
    Fail(ProviderError),
    /// Answer after a delay
    Delayed(Duration, Box<ScriptedSubmit>),
    /// Never answer
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitCall {
    pub target: String,
    pub quantity: u64,
}

/// Provider whose answers are queued up front.
///
/// Submits pop from the queue and fall back to `fallback` when it runs dry.
/// Status calls pop from a per-job queue; the last answer repeats.
pub struct ScriptedProvider {
    submits: Mutex<VecDeque<ScriptedSubmit>>,
    fallback: ScriptedSubmit,
    statuses: Mutex<HashMap<String, VecDeque<Result<JobStatus, ProviderError>>>>,
    submit_calls: Mutex<Vec<SubmitCall>>,
    status_calls: Mutex<Vec<String>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    /// Delivers everything unless told otherwise
    pub fn new() -> Self {
        Self::with_fallback(ScriptedSubmit::Full)
    }

    pub fn with_fallback(fallback: ScriptedSubmit) -> Self {
        Self {
            submits: Mutex::new(VecDeque::new()),
            fallback,
            statuses: Mutex::new(HashMap::new()),
            submit_calls: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_submit(&self, step: ScriptedSubmit) -> &Self {
        self.submits.lock().unwrap().push_back(step);
        self
    }

    pub fn push_status(&self, job_ref: &str, status: Result<JobStatus, ProviderError>) -> &Self {
        self.statuses
            .lock()
            .unwrap()
            .entry(job_ref.to_string())
            .or_default()
            .push_back(status);
        self
    }

    pub fn submit_calls(&self) -> Vec<SubmitCall> {
        self.submit_calls.lock().unwrap().clone()
    }

    pub fn submitted_quantities(&self) -> Vec<u64> {
        self.submit_calls().iter().map(|c| c.quantity).collect()
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().unwrap().clone()
    }

    fn next_submit(&self) -> ScriptedSubmit {
        self.submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

async fn play(mut step: ScriptedSubmit, quantity: u64) -> Result<SubmitReceipt, ProviderError> {
    loop {
        match step {
            ScriptedSubmit::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                step = *inner;
            }
            ScriptedSubmit::Full => return Ok(SubmitReceipt::delivered(quantity)),
            ScriptedSubmit::Partial(n) => return Ok(SubmitReceipt::delivered(n.min(quantity))),
            ScriptedSubmit::Job(job_ref) => return Ok(SubmitReceipt::queued(job_ref)),
            ScriptedSubmit::Reject => return Ok(SubmitReceipt::rejected()),
            ScriptedSubmit::Fail(error) => return Err(error),
            ScriptedSubmit::Hang => return std::future::pending().await,
        }
    }
}

#[async_trait]
impl ProviderGateway for ScriptedProvider {
    async fn submit(&self, target: &str, quantity: u64) -> Result<SubmitReceipt, ProviderError> {
        self.submit_calls.lock().unwrap().push(SubmitCall {
            target: target.to_string(),
            quantity,
        });
        let step = self.next_submit();
        play(step, quantity).await
    }

    async fn status(&self, job_ref: &str) -> Result<JobStatus, ProviderError> {
        self.status_calls.lock().unwrap().push(job_ref.to_string());

        let mut statuses = self.statuses.lock().unwrap();
        let queue = statuses.get_mut(job_ref).ok_or_else(|| {
            ProviderError::Permanent(format!("unknown job reference: {job_ref}"))
        })?;

        if queue.len() > 1 {
            if let Some(status) = queue.pop_front() {
                return status;
            }
        }
        queue
            .front()
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::Transient("no scripted status".into())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

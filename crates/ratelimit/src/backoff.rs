use std::time::Duration;

/// How often and how patiently a failed operation is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `None` retries forever
    pub max_retries: Option<u32>,
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn bounded(max_retries: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            initial,
            max,
            multiplier: 2,
        }
    }

    pub fn unbounded(initial: Duration, max: Duration) -> Self {
        Self {
            max_retries: None,
            initial,
            max,
            multiplier: 2,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(*self)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bounded(3, Duration::from_secs(5), Duration::from_secs(60))
    }
}

/// Per-operation retry state
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
        }
    }

    /// Delay before the next retry, or `None` once the retry budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max_retries) = self.policy.max_retries {
            if self.current_attempt >= max_retries {
                return None;
            }
        }

        let delay = self.delay_for(self.current_attempt);
        self.current_attempt = self.current_attempt.saturating_add(1);
        Some(delay)
    }

    /// `initial * multiplier^attempt`, capped at `max`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = u128::from(self.policy.multiplier).checked_pow(attempt);
        let delay_ms = factor.and_then(|f| self.policy.initial.as_millis().checked_mul(f));

        match delay_ms {
            Some(ms) if ms < self.policy.max.as_millis() => Duration::from_millis(ms as u64),
            _ => self.policy.max,
        }
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.policy.max_retries, Some(max) if self.current_attempt >= max)
    }
}

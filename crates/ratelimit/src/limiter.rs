use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Request-rate limiter for provider calls.
///
/// Generic cell rate algorithm: every acquisition pushes a theoretical arrival
/// time forward by one emission interval, and callers wait until they are no
/// more than `burst` intervals ahead of it.
pub struct RateLimiter {
    emission_interval: Option<Duration>,
    burst_tolerance: Duration,
    theoretical_arrival: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `requests_per_second == 0` disables limiting
    pub fn per_second(requests_per_second: u32, burst: u32) -> Self {
        if requests_per_second == 0 {
            return Self::unlimited();
        }

        let interval = Duration::from_secs(1) / requests_per_second;
        Self {
            emission_interval: Some(interval),
            burst_tolerance: interval * burst.saturating_sub(1),
            theoretical_arrival: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            emission_interval: None,
            burst_tolerance: Duration::ZERO,
            theoretical_arrival: Mutex::new(None),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.emission_interval.is_none()
    }

    /// Wait for a slot
    pub async fn acquire(&self) {
        let Some(interval) = self.emission_interval else {
            return;
        };

        let ready_at = {
            let mut tat = self.theoretical_arrival.lock().await;
            let now = Instant::now();
            let arrival = tat.map_or(now, |t| t.max(now));
            let ready_at = arrival
                .checked_sub(self.burst_tolerance)
                .map_or(now, |t| t.max(now));
            *tat = Some(arrival + interval);
            ready_at
        };

        if ready_at > Instant::now() {
            trace!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "rate limited");
            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Take a slot only if one is free right now
    pub async fn try_acquire(&self) -> bool {
        let Some(interval) = self.emission_interval else {
            return true;
        };

        let mut tat = self.theoretical_arrival.lock().await;
        let now = Instant::now();
        let arrival = tat.map_or(now, |t| t.max(now));
        let ready_at = arrival.checked_sub(self.burst_tolerance).unwrap_or(now);
        if ready_at > now {
            return false;
        }
        *tat = Some(arrival + interval);
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

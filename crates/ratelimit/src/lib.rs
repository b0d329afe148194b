//! Pacing and retry primitives for calls to the views provider
//!
//! - `RetryPolicy` / `ExponentialBackoff`: bounded (or unbounded) retries with capped exponential delays
//! - `RateLimiter`: request-rate limit with a small burst allowance
//! - `ConcurrencyGate`: ceiling on provider calls in flight across all orders

pub mod backoff;
pub mod backpressure;
pub mod limiter;

pub use backoff::{ExponentialBackoff, RetryPolicy};
pub use backpressure::{ConcurrencyGate, GateError};
pub use limiter::RateLimiter;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_gate_and_limiter_together() {
        let limiter = Arc::new(RateLimiter::per_second(4, 1));
        let gate = Arc::new(ConcurrencyGate::new(2));
        let start = Instant::now();

        let mut handles = vec![];
        for i in 0..4u64 {
            let limiter = limiter.clone();
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                limiter.acquire().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
                i
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        // 4 requests at 4/s with no burst: the last one starts at 750ms
        assert!(start.elapsed() >= Duration::from_millis(750));
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_loop_exhausts() {
        let policy = RetryPolicy::bounded(3, Duration::from_millis(100), Duration::from_secs(1));
        let mut backoff = policy.backoff();
        let start = Instant::now();

        let mut attempts = 1;
        while let Some(delay) = backoff.next_delay() {
            tokio::time::sleep(delay).await;
            attempts += 1;
        }

        assert_eq!(attempts, 4);
        assert!(start.elapsed() >= Duration::from_millis(100 + 200 + 400));
    }
}

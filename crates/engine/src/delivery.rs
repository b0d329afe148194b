//! Per-order delivery task: ticks, provider calls, reconciliation and refunds

use std::future::Future;

use boostline_ledger::{LedgerError, RefundOutcome};
use boostline_metrics::ProviderCall;
use boostline_provider::ProviderError;
use boostline_types::{Order, OrderState, PendingJob};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::EngineInner;
use crate::error::OrderError;

/// Result of dispatching one tick
struct TickOutcome {
    delivered: u64,
    halt: Option<String>,
}

impl TickOutcome {
    fn delivered(delivered: u64) -> Self {
        Self {
            delivered,
            halt: None,
        }
    }

    fn halt(reason: impl Into<String>) -> Self {
        Self {
            delivered: 0,
            halt: Some(reason.into()),
        }
    }
}

/// What polling learned about a provider job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JobReport {
    delivered: u64,
    /// The provider gave a final count
    settled: bool,
}

fn unsettled(job: &PendingJob) -> String {
    format!("provider job {} never reported a final count", job.job_ref)
}

enum Wake {
    Deadline,
    Cancelled,
    Orphaned,
}

/// Drive `order` from wherever it stands to a terminal state.
///
/// The stored snapshot takes precedence over `snapshot`; an order that is
/// already terminal in the store is left alone.
pub(crate) async fn run(
    inner: &EngineInner,
    snapshot: Order,
    mut cancel: watch::Receiver<bool>,
) -> Result<Order, OrderError> {
    let mut order = inner
        .store
        .load(&snapshot.order_id)
        .await?
        .unwrap_or(snapshot);
    if order.state.is_terminal() {
        debug!(state = %order.state, "Order already finished, nothing to do");
        return Ok(order);
    }

    if order.state == OrderState::Reserved {
        if *cancel.borrow() {
            inner
                .advance(
                    &mut order,
                    OrderState::PartiallyDelivered,
                    Some("cancelled before delivery started".to_string()),
                )
                .await?;
        } else {
            inner.advance(&mut order, OrderState::InProgress, None).await?;
        }
    }

    if order.state == OrderState::InProgress {
        let halted = deliver(inner, &mut order, &mut cancel).await?;
        if order.is_fully_delivered() {
            inner.advance(&mut order, OrderState::Completed, None).await?;
        } else {
            let reason = halted.unwrap_or_else(|| "provider under-delivered".to_string());
            inner
                .advance(&mut order, OrderState::PartiallyDelivered, Some(reason))
                .await?;
        }
    }

    if order.state == OrderState::PartiallyDelivered {
        settle_refund(inner, &mut order).await?;
    }

    Ok(order)
}

/// Dispatch ticks until the order is delivered or delivery halts.
///
/// Returns the halt reason, if any.
async fn deliver(
    inner: &EngineInner,
    order: &mut Order,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Option<String>, OrderError> {
    // a job accepted before a restart is reconciled, never resubmitted
    if let Some(job) = order.pending_job.clone() {
        info!(job_ref = %job.job_ref, quantity = job.quantity, "Reconciling pending provider job");
        let report = poll_job(inner, &job).await?;
        apply_delivery(inner, order, report.delivered).await?;
        if !report.settled {
            return Ok(Some(unsettled(&job)));
        }
    }

    let schedule = inner.scheduler.plan(order);
    debug!(
        ticks = schedule.len(),
        remaining = schedule.remaining(),
        interval_ms = schedule.interval().as_millis() as u64,
        "Delivery planned"
    );

    let max_carries = inner.config.tick_retry.max_retries.unwrap_or(u32::MAX);
    let start = Instant::now();
    let mut carry = 0u64;
    let mut carries = 0u32;

    for tick in schedule {
        if sleep_or_cancel(start + tick.scheduled_at, cancel).await {
            return Ok(Some("cancelled".to_string()));
        }

        let quantity = (tick.quantity + carry).min(order.remaining_quantity());
        if quantity == 0 {
            continue;
        }

        debug!(sequence = tick.sequence, quantity, carried = carry, "Dispatching tick");
        let outcome = dispatch(inner, order, quantity, cancel).await?;
        if let Some(reason) = outcome.halt {
            return Ok(Some(reason));
        }

        let (next_carry, next_carries) = carry_forward(quantity - outcome.delivered, carry, carries, max_carries);
        carry = next_carry;
        carries = next_carries;
    }

    // views still owed once the schedule ran out
    let mut backoff = inner.config.tick_retry.backoff();
    while carry > 0 && order.remaining_quantity() > 0 {
        let Some(delay) = backoff.next_delay() else {
            break;
        };
        inner.metrics.record_tick_retry();
        if sleep_or_cancel(Instant::now() + delay, cancel).await {
            return Ok(Some("cancelled".to_string()));
        }

        let quantity = carry.min(order.remaining_quantity());
        debug!(quantity, "Dispatching make-up tick");
        let outcome = dispatch(inner, order, quantity, cancel).await?;
        if let Some(reason) = outcome.halt {
            return Ok(Some(reason));
        }
        carry = quantity - outcome.delivered;
    }

    Ok(None)
}

/// Roll a tick's shortfall into the next tick until it has been carried
/// `max_carries` times in a row, then give it up to the refund.
fn carry_forward(shortfall: u64, carry: u64, carries: u32, max_carries: u32) -> (u64, u32) {
    if shortfall == 0 {
        return (0, 0);
    }
    let carries = if carry > 0 { carries + 1 } else { 0 };
    if carries >= max_carries {
        warn!(shortfall, "Shortfall carried too often, leaving it for the refund");
        return (0, 0);
    }
    (shortfall, carries)
}

/// Submit one tick, retrying transient provider failures with backoff
async fn dispatch(
    inner: &EngineInner,
    order: &mut Order,
    quantity: u64,
    cancel: &mut watch::Receiver<bool>,
) -> Result<TickOutcome, OrderError> {
    let mut backoff = inner.config.tick_retry.backoff();

    loop {
        let result = call_provider(
            inner,
            ProviderCall::Submit,
            inner.provider.submit(&order.target, quantity),
        )
        .await?;

        let error = match result {
            Ok(receipt) if !receipt.accepted => {
                warn!(quantity, "Provider refused the order");
                return Ok(TickOutcome::halt("provider refused the order"));
            }
            Ok(receipt) => {
                let Some(job_ref) = receipt.job_ref else {
                    let applied =
                        apply_delivery(inner, order, receipt.delivered.min(quantity)).await?;
                    return Ok(TickOutcome::delivered(applied));
                };

                let job = PendingJob {
                    job_ref: job_ref.clone(),
                    quantity,
                };
                order.provider_refs.push(job_ref);
                order.pending_job = Some(job.clone());
                inner.save_durably(order).await?;

                let report = poll_job(inner, &job).await?;
                let delivered = report.delivered.max(receipt.delivered).min(quantity);
                let applied = apply_delivery(inner, order, delivered).await?;
                if !report.settled {
                    // no make-up for views the job may still deliver
                    return Ok(TickOutcome {
                        delivered: applied,
                        halt: Some(unsettled(&job)),
                    });
                }
                return Ok(TickOutcome::delivered(applied));
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            warn!(error = %error, quantity, "Provider failed permanently");
            return Ok(TickOutcome::halt(format!("provider failed: {error}")));
        }

        match backoff.next_delay() {
            Some(delay) => {
                inner.metrics.record_tick_retry();
                warn!(
                    error = %error,
                    attempt = backoff.current_attempt(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Provider call failed, retrying"
                );
                if sleep_or_cancel(Instant::now() + delay, cancel).await {
                    return Ok(TickOutcome::halt("cancelled"));
                }
            }
            None => {
                error!(
                    error = %error,
                    error_type = "provider",
                    attempts = backoff.current_attempt() + 1,
                    "Provider retries exhausted"
                );
                return Ok(TickOutcome::halt(format!(
                    "provider unavailable after retries: {error}"
                )));
            }
        }
    }
}

/// Poll a queued job until it reports a final count or polling runs out.
///
/// An unsettled report carries the last count the provider reported.
async fn poll_job(inner: &EngineInner, job: &PendingJob) -> Result<JobReport, OrderError> {
    let mut last = 0u64;

    for poll in 1..=inner.config.max_status_polls {
        tokio::time::sleep(inner.config.status_poll_interval).await;

        match call_provider(inner, ProviderCall::Status, inner.provider.status(&job.job_ref)).await? {
            Ok(status) => {
                last = status.delivered_so_far.min(job.quantity);
                debug!(job_ref = %job.job_ref, poll, delivered = last, is_final = status.is_final, "Job status");
                if status.is_final {
                    return Ok(JobReport {
                        delivered: last,
                        settled: true,
                    });
                }
            }
            Err(e) if e.is_retryable() => {
                debug!(job_ref = %job.job_ref, poll, error = %e, "Job status unavailable");
            }
            Err(e) => {
                warn!(job_ref = %job.job_ref, error = %e, delivered = last, "Job status failed permanently");
                return Ok(JobReport {
                    delivered: last,
                    settled: false,
                });
            }
        }
    }

    warn!(
        job_ref = %job.job_ref,
        delivered = last,
        "Job never reported a final status, stopping delivery at the last reported count"
    );
    Ok(JobReport {
        delivered: last,
        settled: false,
    })
}

/// Credit delivered views to the order and persist it
async fn apply_delivery(
    inner: &EngineInner,
    order: &mut Order,
    delivered: u64,
) -> Result<u64, OrderError> {
    let applied = order.record_delivery(delivered, crate::now_secs())?;
    order.pending_job = None;
    inner.save_durably(order).await?;
    inner.metrics.record_views_delivered(applied);

    debug!(
        delivered = applied,
        total = order.delivered_quantity,
        requested = order.requested_quantity,
        "Delivery recorded"
    );
    Ok(applied)
}

/// Refund the undelivered remainder and close the order.
///
/// The ledger refunds at most once per order, so storage failures are retried
/// until it answers. A refund the ledger refuses outright leaves the order in
/// `PartiallyDelivered` for an operator.
async fn settle_refund(inner: &EngineInner, order: &mut Order) -> Result<(), OrderError> {
    let amount = order.shortfall_cost();
    let mut backoff = inner.config.refund_retry.backoff();

    let refunded = loop {
        match inner
            .ledger
            .refund(&order.user_id, amount, &order.order_id)
            .await
        {
            Ok(RefundOutcome::Applied(entry)) => {
                inner.metrics.record_coins_refunded(amount);
                info!(amount, entry_id = %entry.entry_id, "Refund applied");
                break amount;
            }
            Ok(RefundOutcome::AlreadyRefunded(entry)) => {
                info!(entry_id = %entry.entry_id, "Refund already applied");
                break entry.delta.unsigned_abs();
            }
            Ok(RefundOutcome::NothingOwed) => break 0,
            Err(e) if !e.is_retryable() && !matches!(e, LedgerError::Inconsistency { .. }) => {
                error!(
                    error = %e,
                    error_type = "refund_refused",
                    amount,
                    "Ledger refused the refund"
                );
                return Err(OrderError::Ledger(e));
            }
            Err(e) => {
                if matches!(e, LedgerError::Inconsistency { .. }) {
                    inner.metrics.record_ledger_inconsistency();
                }
                inner.metrics.record_refund_retry();
                let delay = backoff
                    .next_delay()
                    .unwrap_or(inner.config.refund_retry.max);
                error!(
                    error = %e,
                    error_type = "refund",
                    amount,
                    retry_in_ms = delay.as_millis() as u64,
                    "Refund failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    };

    order.refunded_amount = refunded;
    let details = format!(
        "refunded {refunded} coins for {} undelivered views",
        order.remaining_quantity()
    );
    inner
        .advance(order, OrderState::Refunded, Some(details))
        .await
}

/// Run a provider call behind the concurrency gate, rate limiter and timeout
async fn call_provider<T, F>(
    inner: &EngineInner,
    call: ProviderCall,
    fut: F,
) -> Result<Result<T, ProviderError>, OrderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let _permit = inner.gate.acquire().await.map_err(|_| OrderError::ShutDown)?;
    inner.limiter.acquire().await;

    let started = Instant::now();
    let timeout = inner.config.provider_timeout;
    let result = match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout)),
    };

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    inner
        .metrics
        .record_provider_call(call, outcome, started.elapsed());
    Ok(result)
}

/// Sleep until `deadline`; true if the order was cancelled first
async fn sleep_or_cancel(deadline: Instant, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }

    let wake = tokio::select! {
        _ = tokio::time::sleep_until(deadline) => Wake::Deadline,
        res = cancel.wait_for(|cancelled| *cancelled) => {
            if res.is_ok() { Wake::Cancelled } else { Wake::Orphaned }
        }
    };

    match wake {
        Wake::Deadline => *cancel.borrow(),
        Wake::Cancelled => true,
        Wake::Orphaned => {
            tokio::time::sleep_until(deadline).await;
            false
        }
    }
}

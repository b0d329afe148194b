//! Economic safety: coins are never created, lost or spent twice, whatever the
//! provider reports and however often operations are replayed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boostline::engine::{
    EngineConfig, InMemoryOrderStore, OrderEngine, OrderError, OrderStore, OrderValidator,
    PriceCatalog, RecoveryAction, ValidationError,
};
use boostline::ledger::{CoinLedger, InMemoryLedger, LedgerError, RefundOutcome};
use boostline::provider::{
    JobStatus, ProviderError, ProviderGateway, ScriptedProvider, ScriptedSubmit, SubmitReceipt,
};
use boostline::ratelimit::RetryPolicy;
use boostline::scheduler::SchedulerConfig;
use boostline::types::{LedgerReason, Order, OrderRequest, OrderState, SpeedPolicy};

const TARGET: &str = "https://t.me/channel/99";

fn config() -> EngineConfig {
    EngineConfig {
        provider_timeout: Duration::from_secs(5),
        tick_retry: RetryPolicy::bounded(2, Duration::from_secs(1), Duration::from_secs(4)),
        refund_retry: RetryPolicy::unbounded(Duration::from_millis(100), Duration::from_secs(1)),
        status_poll_interval: Duration::from_secs(1),
        max_status_polls: 3,
        max_concurrent_calls: 4,
        scheduler: SchedulerConfig {
            slow_batch_size: 25,
            slow_interval: Duration::from_secs(60),
        },
    }
}

fn build(
    ledger: Arc<InMemoryLedger>,
    store: Arc<InMemoryOrderStore>,
    provider: Arc<dyn ProviderGateway>,
) -> OrderEngine {
    OrderEngine::builder()
        .with_ledger(ledger)
        .with_store(store)
        .with_provider(provider)
        .with_validator(OrderValidator::permissive())
        .with_catalog(PriceCatalog::new(10))
        .with_config(config())
        .build()
        .unwrap()
}

fn request(user: &str, quantity: u64, speed: SpeedPolicy) -> OrderRequest {
    OrderRequest::new(user, TARGET, quantity, speed)
}

/// Claims to have delivered far more than it was asked for
struct InflatingProvider;

#[async_trait]
impl ProviderGateway for InflatingProvider {
    async fn submit(&self, _target: &str, quantity: u64) -> Result<SubmitReceipt, ProviderError> {
        Ok(SubmitReceipt::delivered(quantity * 3))
    }

    async fn status(&self, _job_ref: &str) -> Result<JobStatus, ProviderError> {
        Ok(JobStatus {
            delivered_so_far: u64::MAX,
            is_final: true,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LEDGER REPLAYS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_refund_replay_pays_once() {
    let ledger = InMemoryLedger::new();
    ledger.credit("u", 1000).await.unwrap();
    ledger.reserve("u", 500, "o1").await.unwrap();

    let first = ledger.refund("u", 200, "o1").await.unwrap();
    let second = ledger.refund("u", 200, "o1").await.unwrap();

    assert!(matches!(first, RefundOutcome::Applied(_)));
    assert!(matches!(second, RefundOutcome::AlreadyRefunded(_)));
    assert_eq!(ledger.balance("u").await.unwrap(), 700);
}

#[tokio::test]
async fn test_refund_cannot_exceed_purchase() {
    let ledger = InMemoryLedger::new();
    ledger.credit("u", 1000).await.unwrap();
    ledger.reserve("u", 100, "o1").await.unwrap();

    let err = ledger.refund("u", 101, "o1").await.unwrap_err();
    assert!(matches!(err, LedgerError::RefundExceedsPurchase { .. }));

    let err = ledger.refund("u", 50, "never-bought").await.unwrap_err();
    assert!(matches!(err, LedgerError::NoPurchase { .. }));
    assert_eq!(ledger.balance("u").await.unwrap(), 900);
}

#[tokio::test]
async fn test_reserve_replay_charges_once() {
    let ledger = InMemoryLedger::new();
    ledger.credit("u", 1000).await.unwrap();

    let first = ledger.reserve("u", 300, "o1").await.unwrap();
    let replay = ledger.reserve("u", 300, "o1").await.unwrap();
    assert_eq!(first, replay);

    let err = ledger.reserve("u", 999, "o1").await.unwrap_err();
    assert!(matches!(err, LedgerError::ReservationMismatch { .. }));
    assert_eq!(ledger.balance("u").await.unwrap(), 700);
}

#[tokio::test]
async fn test_zero_and_oversized_amounts_are_refused() {
    let ledger = InMemoryLedger::new();

    assert!(matches!(
        ledger.credit("u", 0).await,
        Err(LedgerError::InvalidAmount { .. })
    ));
    assert!(matches!(
        ledger.credit("u", u64::MAX).await,
        Err(LedgerError::InvalidAmount { .. })
    ));
    assert_eq!(ledger.balance("u").await.unwrap(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// PROVIDER MISREPORTING
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_inflated_delivery_reports_are_capped() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.credit("u", 1000).await.unwrap();
    let engine = build(
        ledger.clone(),
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(InflatingProvider),
    );

    let order = engine
        .submit(request("u", 60, SpeedPolicy::Slow))
        .await
        .unwrap();
    let order = engine.wait_for(&order.order_id).await.unwrap();

    assert_eq!(order.state, OrderState::Completed);
    assert_eq!(order.delivered_quantity, 60);
    assert_eq!(order.refunded_amount, 0);
    assert_eq!(ledger.balance("u").await.unwrap(), 400);
}

#[tokio::test(start_paused = true)]
async fn test_inflated_job_status_is_capped() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.credit("u", 1000).await.unwrap();
    let provider = ScriptedProvider::new();
    provider.push_submit(ScriptedSubmit::Job("job-x".into())).push_status(
        "job-x",
        Ok(JobStatus {
            delivered_so_far: 1_000_000,
            is_final: true,
        }),
    );
    let engine = build(
        ledger.clone(),
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(provider),
    );

    let order = engine
        .submit(request("u", 40, SpeedPolicy::Maximum))
        .await
        .unwrap();
    let order = engine.wait_for(&order.order_id).await.unwrap();

    assert_eq!(order.delivered_quantity, 40);
    assert_eq!(ledger.balance("u").await.unwrap(), 600);
}

#[test]
fn test_late_delivery_after_terminal_state_is_refused() {
    let mut order = Order::new("o1", &request("u", 100, SpeedPolicy::Maximum), 10, 1).unwrap();
    order.transition(OrderState::Reserved, 2).unwrap();
    order.transition(OrderState::InProgress, 2).unwrap();
    order.record_delivery(30, 3).unwrap();
    order.transition(OrderState::PartiallyDelivered, 4).unwrap();
    order.transition(OrderState::Refunded, 5).unwrap();

    assert!(order.record_delivery(70, 6).is_err());
    assert_eq!(order.delivered_quantity, 30);
    assert!(order.transition(OrderState::Completed, 7).is_err());
}

// ═══════════════════════════════════════════════════════════════════════════
// CANCELLATION AND RECOVERY
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_tick_refunds_in_full() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.credit("u", 1000).await.unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let engine = build(
        ledger.clone(),
        Arc::new(InMemoryOrderStore::new()),
        provider.clone(),
    );

    let order = engine
        .submit(request("u", 50, SpeedPolicy::Maximum))
        .await
        .unwrap();
    engine.cancel(&order.order_id).await.unwrap();
    let order = engine.wait_for(&order.order_id).await.unwrap();

    assert_eq!(order.state, OrderState::Refunded);
    assert_eq!(order.delivered_quantity, 0);
    assert_eq!(order.refunded_amount, 500);
    assert!(provider.submit_calls().is_empty());
    assert_eq!(ledger.balance("u").await.unwrap(), 1000);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_cancels_refund_once() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.credit("u", 1000).await.unwrap();
    let engine = build(
        ledger.clone(),
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(ScriptedProvider::new()),
    );

    let order = engine
        .submit(request("u", 75, SpeedPolicy::Slow))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    engine.cancel(&order.order_id).await.unwrap();
    match engine.cancel(&order.order_id).await {
        Ok(_) | Err(OrderError::AlreadyTerminal { .. }) => {}
        Err(other) => panic!("unexpected cancel error: {other}"),
    }
    let done = engine.wait_for(&order.order_id).await.unwrap();

    let err = engine.cancel(&order.order_id).await.unwrap_err();
    assert!(matches!(err, OrderError::AlreadyTerminal { .. }));

    assert_eq!(done.state, OrderState::Refunded);
    assert_eq!(done.delivered_quantity, 25);
    assert_eq!(done.refunded_amount, 500);

    let refunds = ledger
        .entries("u")
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.reason == LedgerReason::Refund)
        .count();
    assert_eq!(refunds, 1);
    assert_eq!(ledger.balance("u").await.unwrap(), 1000 - 750 + 500);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_never_reserves_again() {
    let ledger = Arc::new(InMemoryLedger::new());
    let store = Arc::new(InMemoryOrderStore::new());
    ledger.credit("u", 1000).await.unwrap();

    let mut order = Order::new("o-crashed", &request("u", 40, SpeedPolicy::Maximum), 10, 1).unwrap();
    order.transition(OrderState::Reserved, 2).unwrap();
    ledger.reserve("u", order.reserved_cost, &order.order_id).await.unwrap();
    store.save(&order).await.unwrap();

    // two restarts in a row
    for _ in 0..2 {
        let engine = build(ledger.clone(), store.clone(), Arc::new(ScriptedProvider::new()));
        engine.resume_active().await.unwrap();
        engine.wait_for("o-crashed").await.unwrap();
    }

    let order = store.load("o-crashed").await.unwrap().unwrap();
    assert_eq!(order.state, OrderState::Completed);

    let purchases = ledger
        .entries("u")
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.reason == LedgerReason::Purchase)
        .count();
    assert_eq!(purchases, 1);
    assert_eq!(ledger.balance("u").await.unwrap(), 600);
}

#[tokio::test(start_paused = true)]
async fn test_unpaid_created_order_is_not_delivered() {
    let ledger = Arc::new(InMemoryLedger::new());
    let store = Arc::new(InMemoryOrderStore::new());
    ledger.credit("u", 1000).await.unwrap();

    let order = Order::new("o-unpaid", &request("u", 40, SpeedPolicy::Maximum), 10, 1).unwrap();
    store.save(&order).await.unwrap();

    let provider = Arc::new(ScriptedProvider::new());
    let engine = build(ledger.clone(), store.clone(), provider.clone());
    let report = engine.resume_active().await.unwrap();

    assert_eq!(report.action_for("o-unpaid"), Some(&RecoveryAction::Rejected));
    assert!(provider.submit_calls().is_empty());
    assert_eq!(ledger.balance("u").await.unwrap(), 1000);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONSERVATION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_coins_are_conserved_across_outcomes() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.credit("u", 100_000).await.unwrap();

    let provider = ScriptedProvider::with_fallback(ScriptedSubmit::Partial(7));
    provider
        .push_submit(ScriptedSubmit::Full)
        .push_submit(ScriptedSubmit::Reject)
        .push_submit(ScriptedSubmit::Fail(ProviderError::Permanent("banned".into())))
        .push_submit(ScriptedSubmit::Partial(13));
    let engine = build(
        ledger.clone(),
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(provider),
    );

    let mut ids = Vec::new();
    for quantity in [50, 60, 70, 80, 90] {
        let order = engine
            .submit(request("u", quantity, SpeedPolicy::Maximum))
            .await
            .unwrap();
        ids.push(order.order_id);
    }

    let mut delivered_cost = 0;
    for id in &ids {
        let order = engine.wait_for(id).await.unwrap();
        assert!(order.state.is_terminal());
        assert_eq!(
            order.refunded_amount,
            order.reserved_cost - order.delivered_quantity * order.unit_price
        );
        delivered_cost += order.delivered_quantity * order.unit_price;
    }

    // every coin either paid for a delivered view or came back
    assert_eq!(ledger.balance("u").await.unwrap(), 100_000 - delivered_cost);
}

#[tokio::test]
async fn test_overflowing_cost_is_a_validation_error() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.credit("u", 1000).await.unwrap();
    let engine = build(
        ledger.clone(),
        Arc::new(InMemoryOrderStore::new()),
        Arc::new(ScriptedProvider::new()),
    );

    let err = engine
        .submit(request("u", u64::MAX, SpeedPolicy::Maximum))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::Validation(ValidationError::CostOverflow { .. })
    ));
    assert_eq!(ledger.entries("u").await.unwrap().len(), 1);
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use boostline_ledger::{CoinLedger, LedgerError};
use boostline_metrics::{MetricsCollector, OrderSpan, RejectReason};
use boostline_provider::ProviderGateway;
use boostline_ratelimit::{ConcurrencyGate, RateLimiter, RetryPolicy};
use boostline_scheduler::{Scheduler, SchedulerConfig};
use boostline_types::{Order, OrderRequest, OrderState};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::catalog::PriceCatalog;
use crate::delivery;
use crate::error::{BuilderError, OrderError};
use crate::store::{OrderStore, StateTransition, StoreError};
use crate::validator::OrderValidator;

/// Configuration for the order engine
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound on a single provider call
    pub provider_timeout: Duration,

    /// Retries of a failed tick dispatch, and of undelivered remainders
    pub tick_retry: RetryPolicy,

    /// Retries of refunds and of order snapshots that failed to save
    pub refund_retry: RetryPolicy,

    /// Wait between status checks of an asynchronous provider job
    pub status_poll_interval: Duration,

    /// Status checks before the last reported count is taken as final
    pub max_status_polls: u32,

    /// Provider calls in flight across all orders
    pub max_concurrent_calls: usize,

    pub scheduler: SchedulerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(60),
            tick_retry: RetryPolicy::bounded(3, Duration::from_secs(5), Duration::from_secs(60)),
            refund_retry: RetryPolicy::unbounded(Duration::from_secs(1), Duration::from_secs(60)),
            status_poll_interval: Duration::from_secs(30),
            max_status_polls: 120,
            max_concurrent_calls: 16,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Builder for OrderEngine
pub struct OrderEngineBuilder {
    ledger: Option<Arc<dyn CoinLedger>>,
    store: Option<Arc<dyn OrderStore>>,
    provider: Option<Arc<dyn ProviderGateway>>,
    validator: OrderValidator,
    catalog: PriceCatalog,
    rate_limiter: RateLimiter,
    metrics: Arc<MetricsCollector>,
    config: EngineConfig,
}

impl OrderEngineBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            ledger: None,
            store: None,
            provider: None,
            validator: OrderValidator::default_config(),
            catalog: PriceCatalog::default(),
            rate_limiter: RateLimiter::unlimited(),
            metrics: Arc::new(MetricsCollector::new()),
            config: EngineConfig::default(),
        }
    }

    /// Set the coin ledger
    pub fn with_ledger(mut self, ledger: Arc<dyn CoinLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Set the order store
    pub fn with_store(mut self, store: Arc<dyn OrderStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the provider gateway
    pub fn with_provider(mut self, provider: Arc<dyn ProviderGateway>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the request validator
    pub fn with_validator(mut self, validator: OrderValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Set the price catalog
    pub fn with_catalog(mut self, catalog: PriceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Set the provider-wide rate limiter
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the OrderEngine, validating that all required fields are set
    pub fn build(self) -> Result<OrderEngine, BuilderError> {
        let ledger = self.ledger.ok_or_else(|| BuilderError::MissingField {
            field: "ledger".to_string(),
        })?;

        let store = self.store.ok_or_else(|| BuilderError::MissingField {
            field: "store".to_string(),
        })?;

        let provider = self.provider.ok_or_else(|| BuilderError::MissingField {
            field: "provider".to_string(),
        })?;

        let inner = EngineInner {
            ledger,
            store,
            provider,
            scheduler: Scheduler::new(self.config.scheduler),
            validator: self.validator,
            catalog: self.catalog,
            gate: ConcurrencyGate::new(self.config.max_concurrent_calls),
            limiter: self.rate_limiter,
            metrics: self.metrics,
            config: self.config,
            tasks: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        };

        Ok(OrderEngine {
            inner: Arc::new(inner),
        })
    }
}

impl Default for OrderEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct DeliveryHandle {
    cancel: watch::Sender<bool>,
    done: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

pub(crate) struct EngineInner {
    pub(crate) ledger: Arc<dyn CoinLedger>,
    pub(crate) store: Arc<dyn OrderStore>,
    pub(crate) provider: Arc<dyn ProviderGateway>,
    pub(crate) scheduler: Scheduler,
    pub(crate) validator: OrderValidator,
    pub(crate) catalog: PriceCatalog,
    pub(crate) gate: ConcurrencyGate,
    pub(crate) limiter: RateLimiter,
    pub(crate) metrics: Arc<MetricsCollector>,
    pub(crate) config: EngineConfig,
    tasks: Mutex<HashMap<String, DeliveryHandle>>,
    shut_down: AtomicBool,
}

impl EngineInner {
    /// Save `order`, retrying until the store accepts it.
    ///
    /// Fails only when the stored snapshot is already terminal.
    pub(crate) async fn save_durably(&self, order: &Order) -> Result<(), OrderError> {
        let mut backoff = self.config.refund_retry.backoff();
        loop {
            match self.store.save(order).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Finalized { order_id, state }) => {
                    warn!(
                        order_id = %order_id,
                        stored = %state,
                        attempted = %order.state,
                        "Refusing to overwrite a finished order"
                    );
                    return Err(OrderError::AlreadyTerminal { order_id, state });
                }
                Err(e) => {
                    let delay = backoff.next_delay().unwrap_or(self.config.refund_retry.max);
                    error!(
                        order_id = %order.order_id,
                        error = %e,
                        error_type = "store",
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to save order"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Move `order` to `next` and make the new state durable
    pub(crate) async fn advance(
        &self,
        order: &mut Order,
        next: OrderState,
        details: Option<String>,
    ) -> Result<(), OrderError> {
        let now = crate::now_secs();
        let previous = order.transition(next, now)?;
        if matches!(next, OrderState::Rejected | OrderState::PartiallyDelivered) {
            order.error_message = details.clone();
        }

        self.save_durably(order).await?;

        let mut transition = StateTransition::new(previous, next, now);
        if let Some(details) = details {
            transition = transition.with_details(details);
        }
        if let Err(e) = self.store.record_transition(&order.order_id, transition).await {
            warn!(order_id = %order.order_id, error = %e, "Failed to record transition");
        }

        self.metrics.record_order_state(next);
        if next.is_terminal() {
            self.metrics
                .record_order_duration(Duration::from_secs(now.saturating_sub(order.created_at)));
        }

        info!(
            order_id = %order.order_id,
            from = %previous,
            to = %next,
            delivered = order.delivered_quantity,
            requested = order.requested_quantity,
            "Order state changed"
        );
        Ok(())
    }

    fn finish_task(&self, order_id: &str) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.remove(order_id);
        self.metrics.set_active_orders(tasks.len() as i64);
    }
}

/// Drives orders from submission to a terminal state.
///
/// Every accepted order gets its own delivery task; ticks of one order are
/// dispatched strictly one after another while different orders proceed
/// independently.
#[derive(Clone)]
pub struct OrderEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl OrderEngine {
    pub fn builder() -> OrderEngineBuilder {
        OrderEngineBuilder::new()
    }

    pub fn catalog(&self) -> &PriceCatalog {
        &self.inner.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Validate, reserve funds and start delivery.
    ///
    /// Returns the order in `Reserved`. Validation failures and insufficient
    /// funds are reported here; provider problems only ever show up as the
    /// order's eventual state.
    pub async fn submit(&self, request: OrderRequest) -> Result<Order, OrderError> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(OrderError::ShutDown);
        }

        let unit_price = self.inner.catalog.unit_price();
        if let Err(e) = self.inner.validator.validate(&request, unit_price) {
            self.inner.metrics.record_order_rejected(RejectReason::Validation);
            warn!(user_id = %request.user_id, error = %e, "Order request rejected");
            return Err(e.into());
        }

        let mut order = Order::new(new_order_id(), &request, unit_price, crate::now_secs())?;
        self.inner.store.save(&order).await?;
        self.inner.metrics.record_order_state(OrderState::Created);

        info!(
            order_id = %order.order_id,
            user_id = %order.user_id,
            quantity = order.requested_quantity,
            speed = order.speed_policy.name(),
            cost = order.reserved_cost,
            "Order created"
        );

        let reserved = self
            .inner
            .ledger
            .reserve(&order.user_id, order.reserved_cost, &order.order_id)
            .await;

        if let Err(e) = reserved {
            let details = e.to_string();
            let (reason, err) = match e {
                LedgerError::InsufficientFunds {
                    required,
                    available,
                    ..
                } => (
                    RejectReason::InsufficientFunds,
                    OrderError::InsufficientFunds {
                        order_id: order.order_id.clone(),
                        required,
                        available,
                    },
                ),
                other => {
                    if matches!(other, LedgerError::Inconsistency { .. }) {
                        self.inner.metrics.record_ledger_inconsistency();
                    }
                    (RejectReason::Ledger, OrderError::Ledger(other))
                }
            };

            self.inner
                .advance(&mut order, OrderState::Rejected, Some(details))
                .await?;
            self.inner.metrics.record_order_rejected(reason);
            return Err(err);
        }

        self.inner.metrics.record_coins_reserved(order.reserved_cost);
        self.inner.metrics.record_order_submitted(order.requested_quantity);
        self.inner
            .advance(&mut order, OrderState::Reserved, None)
            .await?;

        self.spawn_delivery(order.clone(), false);
        Ok(order)
    }

    /// Stop generating ticks for an order and refund what was not delivered.
    ///
    /// A provider call already in flight is allowed to finish.
    pub async fn cancel(&self, order_id: &str) -> Result<Order, OrderError> {
        let order = self
            .inner
            .store
            .load(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;

        if order.state.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                order_id: order.order_id,
                state: order.state,
            });
        }

        let signalled = {
            let tasks = self.inner.tasks.lock().unwrap();
            match tasks.get(order_id) {
                Some(handle) => {
                    handle.cancel.send_replace(true);
                    true
                }
                None => false,
            }
        };

        if !signalled {
            // the task may have finished while the snapshot was loading
            let current = self
                .inner
                .store
                .load(order_id)
                .await?
                .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;
            if current.state.is_terminal() {
                return Err(OrderError::AlreadyTerminal {
                    order_id: current.order_id,
                    state: current.state,
                });
            }
            // not running in this process; run it straight to the refund
            self.spawn_delivery(current, true);
        }

        info!(order_id = %order_id, state = %order.state, "Order cancellation requested");
        Ok(order)
    }

    /// Cancel on behalf of the order's owner
    pub async fn cancel_for_user(&self, order_id: &str, user_id: &str) -> Result<Order, OrderError> {
        let order = self
            .inner
            .store
            .load(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))?;

        if order.user_id != user_id {
            return Err(OrderError::NotOwner {
                order_id: order_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        self.cancel(order_id).await
    }

    pub async fn order(&self, order_id: &str) -> Result<Option<Order>, OrderError> {
        Ok(self.inner.store.load(order_id).await?)
    }

    /// A user's orders, newest first
    pub async fn orders_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Order>, OrderError> {
        Ok(self.inner.store.list_by_user(user_id, limit).await?)
    }

    pub async fn history(&self, order_id: &str) -> Result<Vec<StateTransition>, OrderError> {
        Ok(self.inner.store.history(order_id).await?)
    }

    /// Wait until the order's delivery task has finished, then return it
    pub async fn wait_for(&self, order_id: &str) -> Result<Order, OrderError> {
        let done = self
            .inner
            .tasks
            .lock()
            .unwrap()
            .get(order_id)
            .map(|handle| handle.done.clone());

        if let Some(mut done) = done {
            // an aborted task drops its sender; the stored snapshot is all there is
            let _ = done.wait_for(|finished| *finished).await;
        }

        self.order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    /// Orders with a running delivery task
    pub fn active_orders(&self) -> usize {
        self.inner.tasks.lock().unwrap().len()
    }

    pub fn is_running(&self, order_id: &str) -> bool {
        self.inner.tasks.lock().unwrap().contains_key(order_id)
    }

    /// Stop every delivery task where it stands.
    ///
    /// Nothing is rolled back; a later `resume_active` on a fresh engine picks
    /// the orders up from their last saved state.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.gate.close();

        let handles: Vec<_> = self.inner.tasks.lock().unwrap().drain().collect();
        for (order_id, handle) in handles {
            debug!(order_id = %order_id, "Stopping delivery task");
            handle.task.abort();
        }
        self.inner.metrics.set_active_orders(0);
        info!("Order engine shut down");
    }

    /// Start a delivery task unless one is already running for this order
    pub(crate) fn spawn_delivery(&self, order: Order, cancelled: bool) -> bool {
        let mut tasks = self.inner.tasks.lock().unwrap();
        if tasks.contains_key(&order.order_id) {
            return false;
        }

        let (cancel_tx, cancel_rx) = watch::channel(cancelled);
        let (done_tx, done_rx) = watch::channel(false);
        let span = OrderSpan::new(&order.order_id, &order.user_id).span();
        let order_id = order.order_id.clone();
        let inner = self.inner.clone();

        let task = tokio::spawn(
            async move {
                let order_id = order.order_id.clone();
                match delivery::run(&inner, order, cancel_rx).await {
                    Ok(order) => debug!(state = %order.state, "Delivery finished"),
                    Err(e) => error!(
                        error = %e,
                        error_type = "delivery",
                        "Delivery stopped before a terminal state"
                    ),
                }
                inner.finish_task(&order_id);
                let _ = done_tx.send(true);
            }
            .instrument(span),
        );

        tasks.insert(
            order_id,
            DeliveryHandle {
                cancel: cancel_tx,
                done: done_rx,
                task,
            },
        );
        self.inner.metrics.set_active_orders(tasks.len() as i64);
        true
    }
}

fn new_order_id() -> String {
    format!("ord-{}", uuid::Uuid::new_v4().simple())
}

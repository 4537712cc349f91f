//! Per-venue autobuy controller.
//!
//! State machine: `Idle -> Running` on [`AutobuyController::start`],
//! `Running -> Stopping` on [`AutobuyController::stop`], and
//! `Stopping -> Idle` once the poll task observes the signal and exits.
//!
//! Each poll iteration applies the price rule to every candidate, marks the
//! item seen (the single serialization point against double purchase), always
//! notifies, and buys unless running dry.

use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::filter::CategoryFilter;
use crate::notify::{NotificationKind, Notifier};
use crate::poller::{BatchOutcome, BatchedPoller};
use crate::retry::RetryingCallExecutor;
use crate::seen::SeenRegistry;
use crate::types::{AutobuyParams, Item, PriceMode, RunState, VenueId};
use crate::venue::VenueError;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1500;
const DEFAULT_BATCH_SIZE: usize = 8;
const DEFAULT_ERROR_COOLDOWN_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Detect and notify, never call buy
    pub dry_run: bool,
    /// Sleep between batches
    pub pacing: Duration,
    pub batch_size: usize,
    /// Sleep after a failed iteration
    pub error_cooldown: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            dry_run: true,
            pacing: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            error_cooldown: Duration::from_millis(DEFAULT_ERROR_COOLDOWN_MS),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("{0} autobuyer already {1}; stop it first")]
    AlreadyRunning(VenueId, RunState),
    #[error("{0}: no categories to monitor (no name filter and empty category table)")]
    NoCategories(VenueId),
    #[error("{0}: no auth token or credentials configured")]
    MissingCredentials(VenueId),
}

/// Whether `price` qualifies under the run's price rule.
///
/// Threshold mode: `price <= max_price`. Floor mode: `price < floor`; an
/// item without a numeric floor never qualifies.
pub fn matches_price_rule(params: &AutobuyParams, price: Decimal, floor: Option<Decimal>) -> bool {
    match params.mode {
        PriceMode::Threshold => price <= params.max_price,
        PriceMode::BelowFloor => floor.map(|f| price < f).unwrap_or(false),
    }
}

/// Categories swept by a run: the name filter alone, or the whole table.
pub fn resolve_categories(params: &AutobuyParams, filter: &CategoryFilter) -> Vec<String> {
    match &params.name_filter {
        Some(name) => vec![name.trim().to_string()],
        None => filter.categories().to_vec(),
    }
}

struct ControllerInner {
    state: RunState,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    seen: Arc<SeenRegistry>,
    notifier: Option<Notifier>,
}

fn lock(inner: &Mutex<ControllerInner>) -> MutexGuard<'_, ControllerInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct AutobuyController {
    venue_id: VenueId,
    poller: Arc<BatchedPoller>,
    buy_executor: RetryingCallExecutor,
    settings: ControllerSettings,
    inner: Arc<Mutex<ControllerInner>>,
    // Buys hold a read guard from their cancellation check to completion;
    // stop() takes the write side so no buy begins after it returns.
    buy_gate: Arc<RwLock<()>>,
}

impl AutobuyController {
    pub fn new(
        poller: Arc<BatchedPoller>,
        buy_executor: RetryingCallExecutor,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            venue_id: poller.venue().id().clone(),
            poller,
            buy_executor,
            settings,
            inner: Arc::new(Mutex::new(ControllerInner {
                state: RunState::Idle,
                shutdown: CancellationToken::new(),
                task: None,
                seen: Arc::new(SeenRegistry::new()),
                notifier: None,
            })),
            buy_gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn venue_id(&self) -> &VenueId {
        &self.venue_id
    }

    pub fn poller(&self) -> &Arc<BatchedPoller> {
        &self.poller
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn state(&self) -> RunState {
        lock(&self.inner).state
    }

    /// Items marked seen in the current (or last) run.
    pub fn seen_count(&self) -> usize {
        lock(&self.inner).seen.len()
    }

    /// Check that a run with `params` could start, without starting it.
    pub fn validate(&self, params: &AutobuyParams) -> Result<Vec<String>, StartError> {
        if !self.poller.auth().is_configured() {
            return Err(StartError::MissingCredentials(self.venue_id.clone()));
        }
        let categories = resolve_categories(params, self.poller.filter());
        if categories.is_empty() {
            return Err(StartError::NoCategories(self.venue_id.clone()));
        }
        Ok(categories)
    }

    /// Launch the poll loop. Must be called inside a tokio runtime.
    pub fn start(&self, params: AutobuyParams, notifier: Notifier) -> Result<(), StartError> {
        let mut inner = lock(&self.inner);
        if inner.state != RunState::Idle {
            return Err(StartError::AlreadyRunning(self.venue_id.clone(), inner.state));
        }
        let categories = self.validate(&params)?;

        let notifier = notifier.for_venue(self.venue_id.clone());
        let seen = Arc::new(SeenRegistry::new());
        let shutdown = CancellationToken::new();

        inner.seen = seen.clone();
        inner.shutdown = shutdown.clone();
        inner.notifier = Some(notifier.clone());
        inner.state = RunState::Running;

        info!(
            venue = %self.venue_id,
            max_price = %params.max_price,
            mode = ?params.mode,
            categories = categories.len(),
            dry_run = self.settings.dry_run,
            "autobuy starting"
        );

        let run = PollRun {
            venue_id: self.venue_id.clone(),
            poller: self.poller.clone(),
            buy_executor: self.buy_executor.clone(),
            settings: self.settings.clone(),
            params,
            notifier,
            seen,
            shutdown,
            buy_gate: self.buy_gate.clone(),
            inner: self.inner.clone(),
        };
        inner.task = Some(tokio::spawn(run.run(categories)));
        Ok(())
    }

    /// Signal the poll loop to stop (`Running -> Stopping`).
    ///
    /// Waits up to `timeout` for a buy already in flight to finish. Returns
    /// `true` once no purchase can begin anymore; `false` means a buy still
    /// held the gate at the deadline and [`join`](Self::join) has to abort
    /// the task. Idempotent.
    pub async fn stop(&self, timeout: Duration) -> bool {
        {
            let mut inner = lock(&self.inner);
            if inner.state == RunState::Running {
                inner.state = RunState::Stopping;
                info!("[{}] stop requested", self.venue_id);
            }
            inner.shutdown.cancel();
        }
        match tokio::time::timeout(timeout, self.buy_gate.write()).await {
            Ok(_gate) => true,
            Err(_) => {
                warn!(
                    "[{}] buy still in flight after {}ms",
                    self.venue_id,
                    timeout.as_millis()
                );
                false
            }
        }
    }

    /// Wait for the poll task to exit, up to `timeout`. A task still running
    /// after that is aborted. Returns `true` when the task exited on its own.
    pub async fn join(&self, timeout: Duration) -> bool {
        let task = lock(&self.inner).task.take();
        let Some(mut task) = task else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("[{}] poll task ended abnormally: {}", self.venue_id, e);
                self.force_idle("poll task crashed");
                true
            }
            Err(_) => {
                task.abort();
                // Resolves once the task is dropped, releasing any buy guard
                let _ = task.await;
                warn!(
                    "[{}] poll task did not stop within {}ms, aborted",
                    self.venue_id,
                    timeout.as_millis()
                );
                self.force_idle("autobuyer force-stopped after shutdown timeout");
                false
            }
        }
    }

    fn force_idle(&self, reason: &str) {
        let mut inner = lock(&self.inner);
        inner.state = RunState::Idle;
        if let Some(notifier) = &inner.notifier {
            notifier.send(NotificationKind::Stopped, reason.to_string());
        }
    }
}

/// Everything one monitoring run needs, moved into the spawned task.
struct PollRun {
    venue_id: VenueId,
    poller: Arc<BatchedPoller>,
    buy_executor: RetryingCallExecutor,
    settings: ControllerSettings,
    params: AutobuyParams,
    notifier: Notifier,
    seen: Arc<SeenRegistry>,
    shutdown: CancellationToken,
    buy_gate: Arc<RwLock<()>>,
    inner: Arc<Mutex<ControllerInner>>,
}

impl PollRun {
    async fn run(self, categories: Vec<String>) {
        self.notifier.send(
            NotificationKind::Started,
            format!(
                "autobuyer started. max_price={}, gift={}, mode={:?}, dry_run={}",
                self.params.max_price,
                self.params.filter_label(),
                self.params.mode,
                self.settings.dry_run
            ),
        );

        let this = &self;
        let batches = self
            .poller
            .run_loop(
                &categories,
                self.settings.batch_size,
                self.settings.pacing,
                self.settings.error_cooldown,
                &self.shutdown,
                move |outcome| this.handle_batch(outcome),
            )
            .await;

        info!(
            "[{}] poll loop exited after {} batches, {} items seen",
            self.venue_id,
            batches,
            self.seen.len()
        );
        self.notifier
            .send(NotificationKind::Stopped, "autobuyer stopped.");
        lock(&self.inner).state = RunState::Idle;
    }

    async fn handle_batch(&self, outcome: BatchOutcome) -> anyhow::Result<()> {
        let detail = outcome
            .failures
            .iter()
            .map(|(category, e)| format!("{}: {}", category, e))
            .collect::<Vec<_>>()
            .join("; ");
        if outcome.all_failed() {
            self.notifier
                .error(format!("Loop error: {}", detail), true);
            self.reauth().await;
            anyhow::bail!("all {} categories in batch failed", outcome.failures.len());
        }
        if !outcome.failures.is_empty() {
            self.notifier.error(
                format!(
                    "Search failed for {} of {} categories: {}",
                    outcome.failures.len(),
                    outcome.items.len(),
                    detail
                ),
                true,
            );
        }

        for item in outcome.items.values().flatten() {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.evaluate(item).await;
        }
        Ok(())
    }

    /// Invalidate and refresh auth after a failed iteration.
    async fn reauth(&self) {
        let auth = self.poller.auth();
        if auth.has_override() {
            return;
        }
        match auth.refresh().await {
            Ok(_) => self
                .notifier
                .send(NotificationKind::AuthRefreshed, "auth refreshed."),
            Err(e) => warn!("[{}] re-auth after loop error failed: {}", self.venue_id, e),
        }
    }

    async fn evaluate(&self, item: &Item) {
        let Some(price) = item.price_value() else {
            debug!(
                venue = %self.venue_id,
                item_id = %item.id,
                raw_price = ?item.price,
                "skipping item: price missing or not numeric"
            );
            return;
        };
        if !matches_price_rule(&self.params, price, item.floor_value()) {
            return;
        }
        if !self.seen.mark_if_new(&item.id) {
            return;
        }

        info!(
            venue = %self.venue_id,
            item_id = %item.id,
            price = %price,
            "match found"
        );
        self.notifier.found(item);

        if self.settings.dry_run {
            return;
        }
        self.purchase(item, price).await;
    }

    async fn purchase(&self, item: &Item, price: Decimal) {
        let _gate = self.buy_gate.read().await;
        if self.shutdown.is_cancelled() {
            info!("[{}] stopping, buy of {} skipped", self.venue_id, item.id);
            return;
        }

        let venue = self.poller.venue();
        let auth = self.poller.auth();
        let shutdown = &self.shutdown;
        let op = format!("buy:{}:{}", self.venue_id, item.id);

        let result = self
            .buy_executor
            .execute(&op, move || async move {
                if shutdown.is_cancelled() {
                    return Err(VenueError::Rejected("monitoring stopped".to_string()));
                }
                let token = auth
                    .get()
                    .await
                    .map_err(|e| VenueError::Rejected(format!("auth unavailable: {}", e)))?;
                match venue.buy(item, price, &token.value).await {
                    Err(e) if e.is_auth() => {
                        auth.invalidate().await;
                        Err(e)
                    }
                    other => other,
                }
            })
            .await;

        match result {
            Ok(receipt) => {
                info!(venue = %self.venue_id, item_id = %item.id, price = %price, "purchase submitted");
                self.notifier.send(
                    NotificationKind::PurchaseAttempted,
                    format!(
                        "✅ Purchase submitted: {}\nResponse: {}",
                        item.display_line(None),
                        receipt
                    ),
                );
            }
            Err(failure) => {
                warn!(venue = %self.venue_id, item_id = %item.id, "purchase failed: {}", failure);
                self.notifier.send(
                    NotificationKind::PurchaseFailed,
                    format!(
                        "❌ Purchase failed, gave up: {} ({})",
                        item.display_line(None),
                        failure
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max: i64, mode: PriceMode) -> AutobuyParams {
        AutobuyParams::threshold(Decimal::from(max), None).with_mode(mode)
    }

    #[test]
    fn test_threshold_rule_is_inclusive() {
        let p = params(10, PriceMode::Threshold);
        assert!(matches_price_rule(&p, Decimal::from(10), None));
        assert!(matches_price_rule(&p, Decimal::from(3), None));
        assert!(!matches_price_rule(&p, Decimal::new(1001, 2), None));
    }

    #[test]
    fn test_floor_rule_is_strict_and_needs_floor() {
        let p = params(0, PriceMode::BelowFloor);
        assert!(matches_price_rule(&p, Decimal::from(9), Some(Decimal::from(10))));
        assert!(!matches_price_rule(&p, Decimal::from(10), Some(Decimal::from(10))));
        assert!(!matches_price_rule(&p, Decimal::from(1), None));
    }

    #[test]
    fn test_resolve_categories() {
        let table = CategoryFilter::from_map(vec![("b", vec!["x"]), ("a", vec![])]);
        let all = params(1, PriceMode::Threshold);
        assert_eq!(resolve_categories(&all, &table), vec!["a", "b"]);

        let named = AutobuyParams::threshold(Decimal::ONE, Some(" Toy Bear ".into()));
        assert_eq!(resolve_categories(&named, &table), vec!["Toy Bear"]);

        assert!(resolve_categories(&all, &CategoryFilter::default()).is_empty());
    }
}

//! Control plane: start/stop all venues as one operation, and run
//! cross-venue ranking queries.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::autobuy::{AutobuyController, StartError};
use crate::merge::{merge_cheapest, RankedItem};
use crate::notify::Notifier;
use crate::types::{AutobuyParams, RunState, VenueId};

const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// How each controller ended during `stop_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Exited on their own within the timeout
    pub stopped: Vec<VenueId>,
    /// Still running at the deadline and aborted
    pub aborted: Vec<VenueId>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty()
    }
}

/// Result of a cross-venue ranking query.
#[derive(Debug, Clone, Default)]
pub struct CheapestReport {
    pub ranked: Vec<RankedItem>,
    /// Venues whose search failed, with the error description
    pub failed: Vec<(VenueId, String)>,
}

pub struct ControlPlane {
    controllers: Vec<Arc<AutobuyController>>,
    shutdown_timeout: Duration,
    // Serializes start_all/stop_all so they act as single transitions
    ops: Mutex<()>,
}

impl ControlPlane {
    pub fn new(controllers: Vec<Arc<AutobuyController>>, shutdown_timeout: Duration) -> Self {
        Self {
            controllers,
            shutdown_timeout,
            ops: Mutex::new(()),
        }
    }

    pub fn default_shutdown_timeout() -> Duration {
        Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS)
    }

    pub fn controllers(&self) -> &[Arc<AutobuyController>] {
        &self.controllers
    }

    pub fn states(&self) -> Vec<(VenueId, RunState)> {
        self.controllers
            .iter()
            .map(|c| (c.venue_id().clone(), c.state()))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.controllers.iter().any(|c| c.state() != RunState::Idle)
    }

    /// Start every venue with the same parameters.
    ///
    /// Refuses if any controller is not idle. Configuration errors are
    /// checked for every venue before anything starts, so either all venues
    /// start or none do.
    pub async fn start_all(&self, params: AutobuyParams, notifier: Notifier) -> Result<(), StartError> {
        let _op = self.ops.lock().await;

        if let Some(busy) = self.controllers.iter().find(|c| c.state() != RunState::Idle) {
            return Err(StartError::AlreadyRunning(busy.venue_id().clone(), busy.state()));
        }
        for controller in &self.controllers {
            controller.validate(&params)?;
        }

        for (started, controller) in self.controllers.iter().enumerate() {
            if let Err(e) = controller.start(params.clone(), notifier.clone()) {
                warn!("[{}] start failed, rolling back: {}", controller.venue_id(), e);
                for previous in &self.controllers[..started] {
                    previous.stop(self.shutdown_timeout).await;
                    previous.join(self.shutdown_timeout).await;
                }
                return Err(e);
            }
        }
        info!(
            venues = self.controllers.len(),
            max_price = %params.max_price,
            gift = params.filter_label(),
            "autobuy started on all venues"
        );
        Ok(())
    }

    /// Signal every controller, then wait for all of them concurrently.
    /// The whole call is bounded by the shutdown timeout; stragglers,
    /// including tasks stuck in a buy, are aborted.
    pub async fn stop_all(&self) -> StopReport {
        let _op = self.ops.lock().await;
        let deadline = Instant::now() + self.shutdown_timeout;

        join_all(self.controllers.iter().map(|c| c.stop(self.shutdown_timeout))).await;

        let timeout = deadline.saturating_duration_since(Instant::now());
        let outcomes = join_all(self.controllers.iter().map(|c| async move {
            (c.venue_id().clone(), c.join(timeout).await)
        }))
        .await;

        let mut report = StopReport::default();
        for (venue, graceful) in outcomes {
            if graceful {
                report.stopped.push(venue);
            } else {
                report.aborted.push(venue);
            }
        }
        info!(
            stopped = report.stopped.len(),
            aborted = report.aborted.len(),
            "stop_all complete"
        );
        report
    }

    /// Cheapest listings across all venues, `limit_per_venue` from each,
    /// merged into one ranking of up to `limit_per_venue * venues` entries.
    /// A failing venue contributes nothing and is reported.
    pub async fn cheapest(&self, name: Option<&str>, limit_per_venue: usize) -> CheapestReport {
        let name = name.map(str::trim).unwrap_or("");
        let results = join_all(self.controllers.iter().map(|c| async move {
            let venue = c.venue_id().clone();
            let result = c.poller().fetch_cheapest(name, limit_per_venue).await;
            (venue, result)
        }))
        .await;

        let mut per_venue = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for (venue, result) in results {
            match result {
                Ok(items) => per_venue.push((venue, items)),
                Err(e) => {
                    warn!("[{}] cheapest query failed: {}", venue, e);
                    failed.push((venue, e));
                }
            }
        }

        CheapestReport {
            ranked: merge_cheapest(&per_venue, limit_per_venue * self.controllers.len()),
            failed,
        }
    }
}

//! Gift marketplace monitor and autobuyer.
//!
//! Wires one poller and autobuy controller per configured venue behind a
//! control plane, then reads operator commands from stdin:
//!
//! ```text
//! /autobuy 31.5 "toy bear"    start on every venue
//! /cheapest toy bear          combined cheapest listings
//! /stop                       stop every venue
//! ```
//!
//! Notifications are printed to stdout; logs go to stderr and `LOG_DIR`.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, info_span, warn};

use gift_autobuy::auth::AuthTokenCache;
use gift_autobuy::autobuy::AutobuyController;
use gift_autobuy::command::{help_text, Command, CommandError};
use gift_autobuy::config::{EngineConfig, VenueConfig};
use gift_autobuy::control::ControlPlane;
use gift_autobuy::filter::CategoryFilter;
use gift_autobuy::logging::{self, LogConfig};
use gift_autobuy::notify::{self, chunk_lines, Notifier, MAX_MESSAGE_CHARS};
use gift_autobuy::poller::BatchedPoller;
use gift_autobuy::retry::RetryingCallExecutor;
use gift_autobuy::venue::http::HttpVenue;
use gift_autobuy::venue::Venue;

fn load_filter(config: &EngineConfig) -> Result<CategoryFilter> {
    match &config.category_filter_path {
        Some(path) => CategoryFilter::load_from(path),
        None => {
            warn!("CATEGORY_FILTER_PATH not set: only named /autobuy runs can start");
            Ok(CategoryFilter::default())
        }
    }
}

fn build_controller(
    venue_config: &VenueConfig,
    config: &EngineConfig,
    filter: &Arc<CategoryFilter>,
) -> Result<Arc<AutobuyController>> {
    let base_url = venue_config
        .base_url
        .as_deref()
        .with_context(|| format!("{}_BASE_URL not set", venue_config.id))?;
    let adapter = HttpVenue::new(venue_config.id.clone(), base_url, venue_config.send_owner_ref)
        .with_context(|| format!("building HTTP client for {}", venue_config.id))?;
    let venue = Venue::new(Arc::new(adapter));

    let auth = Arc::new(AuthTokenCache::new(
        venue.clone(),
        venue_config.credentials.clone(),
        venue_config.auth_override.clone(),
        config.auth_ttl,
        RetryingCallExecutor::new(config.search_retry.clone()),
    ));
    let poller = Arc::new(BatchedPoller::new(
        venue,
        auth,
        RetryingCallExecutor::new(config.search_retry.clone()),
        filter.clone(),
        config.poller.clone(),
    ));
    Ok(Arc::new(AutobuyController::new(
        poller,
        RetryingCallExecutor::new(config.buy_retry.clone()),
        config.controller.clone(),
    )))
}

/// Handle one stdin line. Returns `false` when the console should exit.
async fn handle_line(line: &str, plane: &ControlPlane, config: &EngineConfig, notifier: &Notifier) -> bool {
    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(CommandError::NotACommand) if line.trim().eq_ignore_ascii_case("quit") => return false,
        Err(CommandError::NotACommand) => {
            notifier.info("Commands start with / ! or . (try /start)");
            return true;
        }
        Err(e) => {
            notifier.info(e.to_string());
            return true;
        }
    };

    match &command {
        Command::Help => notifier.info(help_text(
            config.controller.dry_run,
            config.controller.pacing.as_millis() as u64,
        )),
        Command::Autobuy { .. } => {
            let params = match command.autobuy_params(&config.defaults) {
                Some(Ok(params)) => params,
                Some(Err(e)) => {
                    notifier.info(e.to_string());
                    return true;
                }
                None => return true,
            };
            match plane.start_all(params.clone(), notifier.clone()).await {
                Ok(()) => notifier.info(format!(
                    "🚀 Autobuy started on all venues. max_price={}, gift={}, DRY_RUN={}\n/stop to stop all",
                    params.max_price,
                    params.filter_label(),
                    config.controller.dry_run
                )),
                Err(e) => notifier.info(format!("Not started: {}", e)),
            }
        }
        Command::Stop => {
            notifier.info("Stopping all venues…");
            let report = plane.stop_all().await;
            if !report.is_clean() {
                let aborted: Vec<String> = report.aborted.iter().map(|v| v.to_string()).collect();
                notifier.info(format!("Force-stopped: {}", aborted.join(", ")));
            }
        }
        Command::Cheapest { name } => {
            let name = name.clone().or_else(|| config.defaults.gift_name.clone());
            let report = plane
                .cheapest(name.as_deref(), config.cheapest_limit_per_venue)
                .await;
            for (venue, e) in &report.failed {
                notifier.info(format!("[{}] search failed: {}", venue, e));
            }
            if report.ranked.is_empty() {
                notifier.info("Nothing found.");
                return true;
            }
            let lines: Vec<String> = report
                .ranked
                .iter()
                .enumerate()
                .map(|(i, ranked)| ranked.display_line(i + 1))
                .collect();
            for chunk in chunk_lines(&lines, MAX_MESSAGE_CHARS) {
                notifier.info(chunk);
            }
        }
        Command::Status => {
            let lines: Vec<String> = plane
                .states()
                .iter()
                .map(|(venue, state)| format!("[{}] {}", venue, state))
                .collect();
            notifier.info(lines.join("\n"));
        }
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before any config is read
    dotenvy::dotenv().ok();

    let log_config = LogConfig::from_env();
    let _log_guard = logging::init_logging(&log_config);

    let config = EngineConfig::from_env().context("loading configuration")?;

    let root_span = info_span!(
        "gift_autobuy",
        run_id = %log_config.run_id,
        version = env!("CARGO_PKG_VERSION"),
        dry_run = config.controller.dry_run,
    );
    let _enter = root_span.enter();

    info!("🚀 Gift autobuy v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "   Mode: {}",
        if config.controller.dry_run {
            "DRY RUN (no purchases)"
        } else {
            "LIVE"
        }
    );
    info!(
        "   Poll interval: {}ms, batch size: {}, call timeout: {}ms",
        config.controller.pacing.as_millis(),
        config.controller.batch_size,
        config.search_retry.call_timeout_ms
    );

    let filter = Arc::new(load_filter(&config)?);

    let mut controllers = Vec::new();
    for venue_config in &config.venues {
        if !venue_config.is_enabled() {
            warn!(
                "[{}] skipped: needs {}_BASE_URL and {}_AUTH or {}_CREDENTIALS",
                venue_config.id, venue_config.id, venue_config.id, venue_config.id
            );
            continue;
        }
        controllers.push(build_controller(venue_config, &config, &filter)?);
        info!("[{}] ready", venue_config.id);
    }
    if controllers.is_empty() {
        bail!("no venue configured");
    }

    let plane = ControlPlane::new(controllers, config.shutdown_timeout);

    let (notifier, mut notifications) = notify::channel();
    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.recv().await {
            println!("{}", notification);
        }
    });

    notifier.info(help_text(
        config.controller.dry_run,
        config.controller.pacing.as_millis() as u64,
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if !handle_line(&line, &plane, &config, &notifier).await {
                        break;
                    }
                }
                Ok(None) => {
                    info!("stdin closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    }

    if plane.is_running() {
        let report = plane.stop_all().await;
        if !report.is_clean() {
            warn!("aborted on shutdown: {:?}", report.aborted);
        }
    }

    drop(notifier);
    drop(plane);
    if let Err(e) = printer.await {
        error!("notification printer failed: {}", e);
    }
    info!("Shutdown complete");
    Ok(())
}

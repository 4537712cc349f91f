//! Batched category polling.
//!
//! The category list is partitioned into fixed-size batches which are swept
//! round-robin. Every category in a batch is searched concurrently; a failure
//! in one category yields an empty result for it and never fails the batch.
//! Results are cached briefly so overlapping sweeps and ranking queries
//! issued within the refresh window do not repeat the same remote search.

use futures_util::future::join_all;
use governor::{
    clock::DefaultClock, middleware::NoOpMiddleware, state::NotKeyed, Quota, RateLimiter,
};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthTokenCache;
use crate::filter::{normalize, CategoryFilter};
use crate::retry::RetryingCallExecutor;
use crate::types::Item;
use crate::venue::{SearchQuery, SortOrder, Venue, VenueError};

const DEFAULT_SEARCH_LIMIT: usize = 50;
const DEFAULT_POLL_CACHE_TTL_MS: u64 = 1500;
const DEFAULT_SEARCH_CONCURRENCY: usize = 8;
const DEFAULT_SEARCH_RPS: u32 = 10;

/// Type alias for the per-venue search rate limiter
type SearchRateLimiter =
    RateLimiter<NotKeyed, governor::state::InMemoryState, DefaultClock, NoOpMiddleware>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSettings {
    /// Result limit for monitoring searches
    pub search_limit: usize,
    pub cache_ttl: Duration,
    /// Max in-flight searches for this venue
    pub concurrency: usize,
    /// Searches per second; 0 disables rate limiting
    pub rate_per_sec: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            search_limit: DEFAULT_SEARCH_LIMIT,
            cache_ttl: Duration::from_millis(DEFAULT_POLL_CACHE_TTL_MS),
            concurrency: DEFAULT_SEARCH_CONCURRENCY,
            rate_per_sec: DEFAULT_SEARCH_RPS,
        }
    }
}

impl PollerSettings {
    pub fn from_env() -> Self {
        fn env<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
        }
        Self {
            search_limit: env::<usize>("SEARCH_LIMIT")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_SEARCH_LIMIT),
            cache_ttl: Duration::from_millis(
                env::<u64>("POLL_CACHE_TTL_MS").unwrap_or(DEFAULT_POLL_CACHE_TTL_MS),
            ),
            concurrency: env::<usize>("SEARCH_CONCURRENCY")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_SEARCH_CONCURRENCY),
            rate_per_sec: env::<u32>("SEARCH_RPS").unwrap_or(DEFAULT_SEARCH_RPS),
        }
    }
}

/// Recently fetched (unfiltered) search results for one category.
#[derive(Debug, Clone)]
pub struct PollCacheEntry {
    pub category: String,
    pub fetched_at: Instant,
    pub items: Vec<Item>,
}

impl PollCacheEntry {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Results of one batch fetch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// category -> filtered items; failed categories map to an empty list
    pub items: BTreeMap<String, Vec<Item>>,
    /// (category, error description) for categories whose search failed
    pub failures: Vec<(String, String)>,
}

impl BatchOutcome {
    /// True when the batch had categories and every one of them failed.
    pub fn all_failed(&self) -> bool {
        !self.items.is_empty() && self.failures.len() == self.items.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }
}

/// Split categories into batches of `batch_size`, dropping duplicates
/// (after normalization) so one sweep visits each category exactly once.
pub fn partition_batches(categories: &[String], batch_size: usize) -> Vec<Vec<String>> {
    let mut seen = rustc_hash::FxHashSet::default();
    let unique: Vec<String> = categories
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| seen.insert(normalize(c)))
        .collect();
    unique
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

pub struct BatchedPoller {
    venue: Venue,
    auth: Arc<AuthTokenCache>,
    executor: RetryingCallExecutor,
    filter: Arc<CategoryFilter>,
    settings: PollerSettings,
    cache: Mutex<FxHashMap<(String, usize), PollCacheEntry>>,
    limiter: Option<Arc<SearchRateLimiter>>,
    semaphore: Arc<Semaphore>,
}

impl BatchedPoller {
    pub fn new(
        venue: Venue,
        auth: Arc<AuthTokenCache>,
        executor: RetryingCallExecutor,
        filter: Arc<CategoryFilter>,
        settings: PollerSettings,
    ) -> Self {
        let limiter = NonZeroU32::new(settings.rate_per_sec)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        Self {
            venue,
            auth,
            executor,
            filter,
            settings,
            cache: Mutex::new(FxHashMap::default()),
            limiter,
            semaphore,
        }
    }

    pub fn venue(&self) -> &Venue {
        &self.venue
    }

    pub fn auth(&self) -> &Arc<AuthTokenCache> {
        &self.auth
    }

    pub fn filter(&self) -> &CategoryFilter {
        &self.filter
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    fn lock_cache(&self) -> MutexGuard<'_, FxHashMap<(String, usize), PollCacheEntry>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cached(&self, key: &(String, usize)) -> Option<Vec<Item>> {
        let cache = self.lock_cache();
        cache
            .get(key)
            .filter(|entry| entry.is_fresh(self.settings.cache_ttl))
            .map(|entry| entry.items.clone())
    }

    fn store(&self, key: (String, usize), items: &[Item]) {
        let mut cache = self.lock_cache();
        let ttl = self.settings.cache_ttl;
        cache.retain(|_, entry| entry.is_fresh(ttl));
        cache.insert(
            key.clone(),
            PollCacheEntry {
                category: key.0,
                fetched_at: Instant::now(),
                items: items.to_vec(),
            },
        );
    }

    /// Search one category (cheapest first), reusing a fresh cache entry.
    ///
    /// Auth failures invalidate the token cache before the retry so the next
    /// attempt runs with a refreshed token.
    pub async fn search(&self, category: &str, limit: usize) -> Result<Vec<Item>, String> {
        let key = (normalize(category), limit);
        if let Some(items) = self.cached(&key) {
            debug!(venue = %self.venue.id(), category = %key.0, "poll cache hit");
            return Ok(items);
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| format!("semaphore closed: {}", e))?;
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let query = SearchQuery {
            sort: SortOrder::PriceAsc,
            name: category.trim().to_string(),
            limit,
        };
        let venue = &self.venue;
        let auth = &self.auth;
        let query_ref = &query;
        let op = format!("search:{}:{}", venue.id(), key.0);

        let result = self
            .executor
            .execute(&op, move || async move {
                let token = auth
                    .get()
                    .await
                    .map_err(|e| VenueError::Rejected(format!("auth unavailable: {}", e)))?;
                match venue.search(query_ref, &token.value).await {
                    Err(e) if e.is_auth() => {
                        auth.invalidate().await;
                        Err(e)
                    }
                    other => other,
                }
            })
            .await;

        match result {
            Ok(items) => {
                self.store(key, &items);
                Ok(items)
            }
            Err(failure) => Err(failure.to_string()),
        }
    }

    /// Fetch every category concurrently and apply the category filter.
    pub async fn fetch_categories(&self, categories: &[String]) -> BatchOutcome {
        let limit = self.settings.search_limit;
        let results = join_all(categories.iter().map(|category| async move {
            (category.clone(), self.search(category, limit).await)
        }))
        .await;

        let mut outcome = BatchOutcome::default();
        for (category, result) in results {
            match result {
                Ok(items) => {
                    let total = items.len();
                    let kept: Vec<Item> = items
                        .into_iter()
                        .filter(|item| self.filter.allows(&category, item))
                        .collect();
                    debug!(
                        venue = %self.venue.id(),
                        category = %category,
                        total,
                        kept = kept.len(),
                        "category fetched"
                    );
                    outcome.items.insert(category, kept);
                }
                Err(e) => {
                    warn!("[{}] search failed for '{}': {}", self.venue.id(), category, e);
                    outcome.items.insert(category.clone(), Vec::new());
                    outcome.failures.push((category, e));
                }
            }
        }
        outcome
    }

    /// Cheapest listings for a name (unfiltered), for ranking queries.
    pub async fn fetch_cheapest(&self, name: &str, limit: usize) -> Result<Vec<Item>, String> {
        self.search(name, limit).await
    }

    /// Sweep `categories` batch by batch until `shutdown` is cancelled.
    ///
    /// `on_batch` receives each batch's results. When it returns an error the
    /// loop waits `error_cooldown` instead of `pacing`. Both waits end early on
    /// cancellation. Returns the number of batches handed to `on_batch`.
    pub async fn run_loop<F, Fut>(
        &self,
        categories: &[String],
        batch_size: usize,
        pacing: Duration,
        error_cooldown: Duration,
        shutdown: &CancellationToken,
        mut on_batch: F,
    ) -> u64
    where
        F: FnMut(BatchOutcome) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let batches = partition_batches(categories, batch_size);
        if batches.is_empty() {
            warn!("[{}] nothing to poll: empty category list", self.venue.id());
            return 0;
        }
        info!(
            "[{}] polling {} categories in {} batches (pacing={}ms)",
            self.venue.id(),
            batches.iter().map(Vec::len).sum::<usize>(),
            batches.len(),
            pacing.as_millis()
        );

        let mut cursor = 0usize;
        let mut handed = 0u64;
        while !shutdown.is_cancelled() {
            let batch = &batches[cursor % batches.len()];
            cursor += 1;

            let outcome = self.fetch_categories(batch).await;
            // Stop may have arrived while the searches were in flight
            if shutdown.is_cancelled() {
                break;
            }
            handed += 1;

            let delay = match on_batch(outcome).await {
                Ok(()) => pacing,
                Err(e) => {
                    warn!("[{}] batch handler failed: {:#}", self.venue.id(), e);
                    error_cooldown
                }
            };
            if cursor % batches.len() == 0 {
                debug!(venue = %self.venue.id(), sweeps = cursor / batches.len(), "sweep complete");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        handed
    }
}

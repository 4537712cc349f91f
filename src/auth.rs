//! Per-venue auth token cache.
//!
//! `get()` hands out the cached token while it is fresh and refreshes it
//! through the venue otherwise. A failed refresh falls back to the stale
//! token when one exists; downstream auth failures on that token are retried
//! by the caller after `invalidate()`.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::retry::{CallFailure, RetryingCallExecutor};
use crate::types::AuthToken;
use crate::venue::Venue;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}: no auth token or credentials configured")]
    MissingCredentials(String),
    #[error("auth refresh failed: {0}")]
    Refresh(#[from] CallFailure),
}

#[derive(Debug, Default)]
struct CacheState {
    token: Option<AuthToken>,
    /// Set by `invalidate()`; forces the next `get()` to refresh.
    invalidated: bool,
}

pub struct AuthTokenCache {
    venue: Venue,
    credentials: Option<String>,
    /// Hard-coded token: never expires, bypasses refresh.
    fixed: Option<AuthToken>,
    ttl: Duration,
    executor: RetryingCallExecutor,
    // Held across the refresh call so concurrent callers share one refresh
    state: Mutex<CacheState>,
}

impl AuthTokenCache {
    pub fn new(
        venue: Venue,
        credentials: Option<String>,
        override_token: Option<String>,
        ttl: Duration,
        executor: RetryingCallExecutor,
    ) -> Self {
        let fixed = override_token
            .filter(|t| !t.trim().is_empty())
            .map(|t| AuthToken::permanent(venue.id().clone(), t));
        Self {
            venue,
            credentials: credentials.filter(|c| !c.trim().is_empty()),
            fixed,
            ttl,
            executor,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Whether `get()` can ever produce a token.
    pub fn is_configured(&self) -> bool {
        self.fixed.is_some() || self.credentials.is_some()
    }

    pub fn has_override(&self) -> bool {
        self.fixed.is_some()
    }

    /// Current token, refreshing first if it is missing, expired or invalidated.
    pub async fn get(&self) -> Result<AuthToken, AuthError> {
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        let credentials = self
            .credentials
            .as_deref()
            .ok_or_else(|| AuthError::MissingCredentials(self.venue.id().to_string()))?;

        let mut state = self.state.lock().await;
        if let Some(token) = &state.token {
            if !state.invalidated && !token.is_expired() {
                return Ok(token.clone());
            }
        }

        let venue = &self.venue;
        let op = format!("auth:{}", venue.id());
        match self
            .executor
            .execute(&op, move || venue.refresh_auth(credentials))
            .await
        {
            Ok(fresh) => {
                let token = AuthToken::issued(venue.id().clone(), fresh.value, self.ttl);
                info!("[{}] auth token refreshed (ttl={}s)", venue.id(), self.ttl.as_secs());
                state.token = Some(token.clone());
                state.invalidated = false;
                Ok(token)
            }
            Err(failure) => match &state.token {
                Some(stale) => {
                    warn!(
                        "[{}] auth refresh failed, reusing stale token: {}",
                        venue.id(),
                        failure
                    );
                    Ok(stale.clone())
                }
                None => Err(AuthError::Refresh(failure)),
            },
        }
    }

    /// Force the next `get()` to refresh regardless of TTL.
    pub async fn invalidate(&self) {
        if self.fixed.is_some() {
            return;
        }
        debug!("[{}] auth token invalidated", self.venue.id());
        self.state.lock().await.invalidated = true;
    }

    /// Invalidate and immediately fetch a new token.
    pub async fn refresh(&self) -> Result<AuthToken, AuthError> {
        self.invalidate().await;
        self.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::types::{Item, Receipt, VenueId};
    use crate::venue::{BuyRequest, SearchQuery, VenueAdapter, VenueError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct AuthOnly {
        refreshes: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl VenueAdapter for AuthOnly {
        fn venue_id(&self) -> VenueId {
            VenueId::new("auth-test")
        }

        async fn search(&self, _: &SearchQuery, _: &str) -> Result<Vec<Item>, VenueError> {
            Ok(vec![])
        }

        async fn buy(&self, _: &BuyRequest, _: &str) -> Result<Receipt, VenueError> {
            Err(VenueError::Rejected("unused".into()))
        }

        async fn refresh_auth(&self, credentials: &str) -> Result<AuthToken, VenueError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing.load(Ordering::SeqCst) {
                return Err(VenueError::Transient("auth down".into()));
            }
            Ok(AuthToken::issued(
                self.venue_id(),
                format!("{}-{}", credentials, n),
                Duration::from_secs(1),
            ))
        }
    }

    fn cache(adapter: Arc<AuthOnly>, ttl: Duration, override_token: Option<&str>) -> AuthTokenCache {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter_ms: 0,
            call_timeout_ms: 100,
        };
        AuthTokenCache::new(
            Venue::new(adapter),
            Some("creds".into()),
            override_token.map(str::to_string),
            ttl,
            RetryingCallExecutor::new(policy),
        )
    }

    #[tokio::test]
    async fn test_cached_until_expiry() {
        let adapter = Arc::new(AuthOnly::default());
        let cache = cache(adapter.clone(), Duration::from_millis(50), None);

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();
        assert_eq!(first.value, "creds-1");
        assert_eq!(second.value, "creds-1");
        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let third = cache.get().await.unwrap();
        assert_eq!(third.value, "creds-2");
        assert!(!third.is_expired());
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let adapter = Arc::new(AuthOnly::default());
        let cache = cache(adapter.clone(), Duration::from_secs(60), None);

        cache.get().await.unwrap();
        cache.invalidate().await;
        assert_eq!(cache.get().await.unwrap().value, "creds-2");
        assert_eq!(cache.refresh().await.unwrap().value, "creds-3");
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_stale_token() {
        let adapter = Arc::new(AuthOnly::default());
        let cache = cache(adapter.clone(), Duration::from_millis(10), None);

        let original = cache.get().await.unwrap();
        adapter.failing.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stale = cache.get().await.unwrap();
        assert_eq!(stale.value, original.value);
    }

    #[tokio::test]
    async fn test_failed_refresh_without_token_is_error() {
        let adapter = Arc::new(AuthOnly::default());
        adapter.failing.store(true, Ordering::SeqCst);
        let cache = cache(adapter.clone(), Duration::from_secs(60), None);

        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, AuthError::Refresh(ref f) if f.attempts == 2));
    }

    #[tokio::test]
    async fn test_override_token_bypasses_refresh() {
        let adapter = Arc::new(AuthOnly::default());
        let cache = cache(adapter.clone(), Duration::from_millis(1), Some("fixed"));

        cache.invalidate().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get().await.unwrap().value, "fixed");
        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let adapter = Arc::new(AuthOnly::default());
        let cache = AuthTokenCache::new(
            Venue::new(adapter),
            None,
            None,
            Duration::from_secs(1),
            RetryingCallExecutor::new(RetryPolicy::default()),
        );
        assert!(!cache.is_configured());
        assert!(matches!(
            cache.get().await,
            Err(AuthError::MissingCredentials(_))
        ));
    }
}

//! Venue adapter contract.
//!
//! Each marketplace is reached through a [`VenueAdapter`]. The engine never
//! talks to a marketplace any other way; wire formats live in the adapter.

pub mod http;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{AuthToken, Item, Receipt, VenueId};

/// Failure reported by a single remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VenueError {
    /// Credential rejected or expired; the caller should re-authenticate.
    #[error("auth rejected: {0}")]
    Auth(String),
    /// Network error, rate limit or upstream 5xx.
    #[error("transient upstream error: {0}")]
    Transient(String),
    #[error("call timed out after {0}ms")]
    Timeout(u64),
    /// The venue refused the request (listing gone, price changed, bad input).
    #[error("rejected: {0}")]
    Rejected(String),
    /// Response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl VenueError {
    /// Whether another attempt of the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VenueError::Auth(_) | VenueError::Transient(_) | VenueError::Timeout(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, VenueError::Auth(_))
    }

    /// Classify an HTTP status code.
    ///
    /// 401/403 are auth failures; 408, 425, 429 and 5xx are transient;
    /// every other 4xx is a rejection.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => VenueError::Auth(format!("HTTP {}: {}", status, message)),
            408 | 425 | 429 | 500..=599 => {
                VenueError::Transient(format!("HTTP {}: {}", status, message))
            }
            _ => VenueError::Rejected(format!("HTTP {}: {}", status, message)),
        }
    }
}

/// Search ordering. Only ascending price is used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    PriceAsc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::PriceAsc => "price_asc",
        }
    }
}

/// One search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub sort: SortOrder,
    /// Category or free-text name; empty searches everything.
    pub name: String,
    pub limit: usize,
}

/// One purchase request.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyRequest {
    pub item_id: String,
    pub price: Decimal,
    pub owner_ref: Option<serde_json::Value>,
}

/// Remote operations a marketplace must provide.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue_id(&self) -> VenueId;

    async fn search(&self, query: &SearchQuery, token: &str) -> Result<Vec<Item>, VenueError>;

    /// Submit a purchase. `owner_ref` is only passed when
    /// [`accepts_owner_ref`](Self::accepts_owner_ref) returns true.
    async fn buy(&self, request: &BuyRequest, token: &str) -> Result<Receipt, VenueError>;

    async fn refresh_auth(&self, credentials: &str) -> Result<AuthToken, VenueError>;

    /// Whether `buy` understands an owner reference.
    fn accepts_owner_ref(&self) -> bool {
        false
    }
}

/// An adapter plus its capabilities, probed once at construction.
#[derive(Clone)]
pub struct Venue {
    id: VenueId,
    adapter: Arc<dyn VenueAdapter>,
    accepts_owner_ref: bool,
}

impl Venue {
    pub fn new(adapter: Arc<dyn VenueAdapter>) -> Self {
        let id = adapter.venue_id();
        let accepts_owner_ref = adapter.accepts_owner_ref();
        tracing::debug!(venue = %id, accepts_owner_ref, "venue adapter registered");
        Self {
            id,
            adapter,
            accepts_owner_ref,
        }
    }

    pub fn id(&self) -> &VenueId {
        &self.id
    }

    pub fn accepts_owner_ref(&self) -> bool {
        self.accepts_owner_ref
    }

    pub async fn search(&self, query: &SearchQuery, token: &str) -> Result<Vec<Item>, VenueError> {
        self.adapter.search(query, token).await
    }

    /// Buy `item` at `price`, attaching the owner reference only when the
    /// adapter supports it.
    pub async fn buy(&self, item: &Item, price: Decimal, token: &str) -> Result<Receipt, VenueError> {
        let request = BuyRequest {
            item_id: item.id.clone(),
            price,
            owner_ref: if self.accepts_owner_ref {
                item.owner_ref.clone()
            } else {
                None
            },
        };
        self.adapter.buy(&request, token).await
    }

    pub async fn refresh_auth(&self, credentials: &str) -> Result<AuthToken, VenueError> {
        self.adapter.refresh_auth(credentials).await
    }
}

impl std::fmt::Debug for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Venue")
            .field("id", &self.id)
            .field("accepts_owner_ref", &self.accepts_owner_ref)
            .finish()
    }
}

//! Core data types shared by the polling, autobuy and ranking paths.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Marketplace identifier, rendered upper-case in notifications ("PORTALS", "TONNEL").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueId(String);

impl VenueId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attribute type used for allow-listing within a category.
pub const BACKDROP_ATTRIBUTE: &str = "backdrop";

/// One `(type, value)` pair attached to a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Attribute {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// A listing returned by a venue search. Never mutated once returned.
///
/// Prices hold the raw text the venue reported; parse with
/// [`Item::price_value`] / [`Item::floor_value`] at the point of use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    /// Human-facing serial number (`#1234`), if the venue reports one.
    pub number: Option<String>,
    pub price: Option<String>,
    pub floor_price: Option<String>,
    pub category: String,
    pub attributes: Vec<Attribute>,
    /// Opaque owner reference some venues require on buy.
    pub owner_ref: Option<serde_json::Value>,
}

impl Item {
    /// Numeric price, or `None` when missing or not a number.
    pub fn price_value(&self) -> Option<Decimal> {
        self.price.as_deref().and_then(parse_decimal)
    }

    /// Numeric floor reference price, or `None` when missing or not a number.
    pub fn floor_value(&self) -> Option<Decimal> {
        self.floor_price.as_deref().and_then(parse_decimal)
    }

    /// First attribute value of the given type.
    pub fn attribute(&self, kind: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.kind.eq_ignore_ascii_case(kind))
            .map(|a| a.value.as_str())
    }

    pub fn backdrop(&self) -> Option<&str> {
        self.attribute(BACKDROP_ATTRIBUTE)
    }
}

/// Parse a venue price string. Accepts plain and scientific notation.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Credential issued by a venue's auth endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub venue: VenueId,
    pub value: String,
    pub issued_at: Instant,
    /// `None` for a hard-coded override token, which never expires.
    pub ttl: Option<Duration>,
}

impl AuthToken {
    pub fn issued(venue: VenueId, value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            venue,
            value: value.into(),
            issued_at: Instant::now(),
            ttl: Some(ttl),
        }
    }

    pub fn permanent(venue: VenueId, value: impl Into<String>) -> Self {
        Self {
            venue,
            value: value.into(),
            issued_at: Instant::now(),
            ttl: None,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.issued_at) >= ttl,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// Per-venue controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Running => f.write_str("running"),
            RunState::Stopping => f.write_str("stopping"),
        }
    }
}

/// Which price rule selects items for notification/purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceMode {
    /// `price <= max_price`
    #[default]
    Threshold,
    /// `price < floor_price`
    BelowFloor,
}

/// Arguments of a monitoring run.
#[derive(Debug, Clone, PartialEq)]
pub struct AutobuyParams {
    pub max_price: Decimal,
    /// Single category/name to sweep; `None` sweeps the whole filter table.
    pub name_filter: Option<String>,
    pub mode: PriceMode,
}

impl AutobuyParams {
    pub fn threshold(max_price: Decimal, name_filter: Option<String>) -> Self {
        Self {
            max_price,
            name_filter: name_filter.filter(|n| !n.trim().is_empty()),
            mode: PriceMode::Threshold,
        }
    }

    pub fn with_mode(mut self, mode: PriceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Name filter as shown to the operator.
    pub fn filter_label(&self) -> &str {
        self.name_filter.as_deref().unwrap_or("ANY")
    }
}

/// Venue response to a buy call, kept opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt(pub serde_json::Value);

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! JSON-over-HTTP venue adapter.
//!
//! Talks to a marketplace gateway exposing three endpoints under a base URL:
//!
//! - `GET  {base}/search?sort=price_asc&name=..&limit=..` returning a listing
//!   array or `{"results": [..]}`
//! - `POST {base}/buy` with `{"id", "price", "owner_id"?}`
//! - `POST {base}/auth` with `{"credentials"}` returning `{"token"}`
//!
//! Requests carry `Authorization: tma <token>`.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{BuyRequest, SearchQuery, VenueAdapter, VenueError};
use crate::item::parse_items;
use crate::types::{AuthToken, Item, Receipt, VenueId};

const AUTH_SCHEME: &str = "tma";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
// Error bodies are echoed into logs; keep them short
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct BuyBody<'a> {
    id: &'a str,
    price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_id: Option<&'a Value>,
}

#[derive(Debug, Serialize)]
struct AuthBody<'a> {
    credentials: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: Option<String>,
}

pub struct HttpVenue {
    id: VenueId,
    base_url: String,
    accepts_owner_ref: bool,
    http: Client,
}

impl HttpVenue {
    pub fn new(id: VenueId, base_url: impl Into<String>, accepts_owner_ref: bool) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            id,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            accepts_owner_ref,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn search_url(&self, query: &SearchQuery) -> Result<Url, VenueError> {
        let limit = query.limit.to_string();
        let mut params = vec![("sort", query.sort.as_str()), ("limit", limit.as_str())];
        if !query.name.trim().is_empty() {
            params.push(("name", query.name.trim()));
        }
        Url::parse_with_params(&format!("{}/search", self.base_url), &params)
            .map_err(|e| VenueError::Rejected(format!("bad search url: {}", e)))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn auth_header(token: &str) -> String {
        format!("{} {}", AUTH_SCHEME, token)
    }

    /// Decode a JSON body, classifying non-2xx statuses first.
    async fn read_json(resp: Response) -> Result<Value, VenueError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(VenueError::from_status(status.as_u16(), truncate(&body)));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| VenueError::Malformed(e.to_string()))
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{}…", head)
}

/// Connection-level failures are always worth retrying.
fn transport_error(e: reqwest::Error) -> VenueError {
    if e.is_timeout() {
        VenueError::Transient(format!("request timed out: {}", e))
    } else if let Some(status) = e.status() {
        VenueError::from_status(status.as_u16(), e.to_string())
    } else {
        VenueError::Transient(e.to_string())
    }
}

#[async_trait]
impl VenueAdapter for HttpVenue {
    fn venue_id(&self) -> VenueId {
        self.id.clone()
    }

    async fn search(&self, query: &SearchQuery, token: &str) -> Result<Vec<Item>, VenueError> {
        let url = self.search_url(query)?;
        debug!(venue = %self.id, %url, "search");
        let resp = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, Self::auth_header(token))
            .send()
            .await
            .map_err(transport_error)?;
        let body = Self::read_json(resp).await?;
        parse_items(&body, query.name.trim())
    }

    async fn buy(&self, request: &BuyRequest, token: &str) -> Result<Receipt, VenueError> {
        let body = BuyBody {
            id: &request.item_id,
            price: request.price.normalize().to_string(),
            owner_id: request.owner_ref.as_ref(),
        };
        let resp = self
            .http
            .post(self.endpoint("buy"))
            .header(reqwest::header::AUTHORIZATION, Self::auth_header(token))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_json(resp).await.map(Receipt)
    }

    async fn refresh_auth(&self, credentials: &str) -> Result<AuthToken, VenueError> {
        let resp = self
            .http
            .post(self.endpoint("auth"))
            .json(&AuthBody { credentials })
            .send()
            .await
            .map_err(transport_error)?;
        let body = Self::read_json(resp).await?;
        let parsed: AuthResponse =
            serde_json::from_value(body).map_err(|e| VenueError::Malformed(e.to_string()))?;
        match parsed.token.filter(|t| !t.trim().is_empty()) {
            Some(token) => Ok(AuthToken::permanent(self.id.clone(), token)),
            None => Err(VenueError::Malformed("auth response without token".to_string())),
        }
    }

    fn accepts_owner_ref(&self) -> bool {
        self.accepts_owner_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::SortOrder;
    use rust_decimal::Decimal;

    fn venue() -> HttpVenue {
        HttpVenue::new(VenueId::new("portals"), "https://gw.example/api/", true).unwrap()
    }

    #[test]
    fn test_search_url_encodes_name() {
        let query = SearchQuery {
            sort: SortOrder::PriceAsc,
            name: " Toy Bear ".into(),
            limit: 50,
        };
        let url = venue().search_url(&query).unwrap();
        assert_eq!(url.path(), "/api/search");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("sort".into(), "price_asc".into())));
        assert!(pairs.contains(&("limit".into(), "50".into())));
        assert!(pairs.contains(&("name".into(), "Toy Bear".into())));
    }

    #[test]
    fn test_search_url_omits_empty_name() {
        let query = SearchQuery {
            sort: SortOrder::PriceAsc,
            name: "".into(),
            limit: 25,
        };
        let url = venue().search_url(&query).unwrap();
        assert!(!url.query_pairs().any(|(k, _)| k == "name"));
    }

    #[test]
    fn test_buy_body_shape() {
        let owner = serde_json::json!(777);
        let body = BuyBody {
            id: "nft-1",
            price: Decimal::new(3150, 2).normalize().to_string(),
            owner_id: Some(&owner),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"id": "nft-1", "price": "31.5", "owner_id": 777}));

        let bare = BuyBody {
            id: "nft-2",
            price: "1".into(),
            owner_id: None,
        };
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("owner_id").is_none());
    }

    #[test]
    fn test_base_url_and_capabilities() {
        let v = venue();
        assert_eq!(v.base_url(), "https://gw.example/api");
        assert_eq!(v.endpoint("buy"), "https://gw.example/api/buy");
        assert!(v.accepts_owner_ref());
        assert_eq!(v.venue_id().as_str(), "PORTALS");
    }

    #[test]
    fn test_truncate_error_body() {
        assert_eq!(truncate("short"), "short");
        let long = "x".repeat(500);
        assert_eq!(truncate(&long).chars().count(), MAX_ERROR_BODY_CHARS + 1);
    }
}

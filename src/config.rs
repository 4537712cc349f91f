//! Engine configuration.
//!
//! Everything is read from environment variables (a `.env` file is loaded by
//! the binary first). Invalid values are logged and replaced by defaults.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::autobuy::ControllerSettings;
use crate::command::CommandDefaults;
use crate::poller::PollerSettings;
use crate::retry::RetryPolicy;
use crate::types::{parse_decimal, VenueId};

/// Venues wired by default, in display order
pub const KNOWN_VENUES: &[&str] = &["PORTALS", "TONNEL"];

const DEFAULT_POLL_INTERVAL_MS: u64 = 1500;
const DEFAULT_BATCH_SIZE: usize = 8;
const DEFAULT_ERROR_COOLDOWN_MS: u64 = 2000;
const DEFAULT_AUTH_TOKEN_TTL_SECS: u64 = 1800;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CHEAPEST_LIMIT_PER_VENUE: usize = 25;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Parse `raw` as `T`, warning and returning `None` when it does not parse.
fn parse_or_warn<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Failed to parse {}='{}', using default", name, raw);
            None
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    parse_or_warn(name, env_var(name))
}

/// `1/true/yes/on` and `0/false/no/off`, case-insensitive.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Poll interval in ms. `POLL_INTERVAL_MS` wins over the legacy
/// `POLL_INTERVAL_SEC` (fractional seconds allowed).
pub fn poll_interval_ms(ms: Option<String>, sec: Option<String>) -> u64 {
    if let Some(ms) = parse_or_warn::<u64>("POLL_INTERVAL_MS", ms).filter(|&n| n > 0) {
        return ms;
    }
    parse_or_warn::<f64>("POLL_INTERVAL_SEC", sec)
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| (s * 1000.0).round() as u64)
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
}

/// Connection settings for one venue.
#[derive(Clone, PartialEq, Eq)]
pub struct VenueConfig {
    pub id: VenueId,
    pub base_url: Option<String>,
    /// Hard-coded token, bypasses refresh
    pub auth_override: Option<String>,
    pub credentials: Option<String>,
    /// Whether buy requests should carry the listing's owner reference
    pub send_owner_ref: bool,
}

// Secrets stay out of logs
impl std::fmt::Debug for VenueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueConfig")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("auth_override", &self.auth_override.as_ref().map(|_| "***"))
            .field("credentials", &self.credentials.as_ref().map(|_| "***"))
            .field("send_owner_ref", &self.send_owner_ref)
            .finish()
    }
}

impl VenueConfig {
    /// `<NAME>_BASE_URL`, `<NAME>_AUTH`, `<NAME>_CREDENTIALS`, `<NAME>_OWNER_REF`.
    pub fn from_env(name: &str) -> Self {
        Self::from_lookup(name, env_var)
    }

    pub fn from_lookup(name: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let id = VenueId::new(name);
        let key = |suffix: &str| format!("{}_{}", id.as_str(), suffix);
        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            base_url: non_empty(lookup(&key("BASE_URL"))),
            auth_override: non_empty(lookup(&key("AUTH"))),
            credentials: non_empty(lookup(&key("CREDENTIALS"))),
            send_owner_ref: lookup(&key("OWNER_REF"))
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
            id,
        }
    }

    /// Usable when it has somewhere to connect and some way to authenticate.
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some() && (self.auth_override.is_some() || self.credentials.is_some())
    }
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub controller: ControllerSettings,
    pub poller: PollerSettings,
    pub search_retry: RetryPolicy,
    pub buy_retry: RetryPolicy,
    pub auth_ttl: Duration,
    pub shutdown_timeout: Duration,
    pub cheapest_limit_per_venue: usize,
    pub category_filter_path: Option<PathBuf>,
    pub defaults: CommandDefaults,
    pub venues: Vec<VenueConfig>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let dry_run = match env_var("DRY_RUN") {
            Some(raw) => parse_bool(&raw)
                .with_context(|| format!("DRY_RUN='{}' is not a boolean", raw))?,
            None => true,
        };

        let controller = ControllerSettings {
            dry_run,
            pacing: Duration::from_millis(poll_interval_ms(
                env_var("POLL_INTERVAL_MS"),
                env_var("POLL_INTERVAL_SEC"),
            )),
            batch_size: env_parse::<usize>("BATCH_SIZE")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_BATCH_SIZE),
            error_cooldown: Duration::from_millis(
                env_parse::<u64>("ERROR_COOLDOWN_MS").unwrap_or(DEFAULT_ERROR_COOLDOWN_MS),
            ),
        };

        let max_price = match env_var("DEFAULT_MAX_PRICE") {
            Some(raw) => parse_decimal(raw.trim())
                .with_context(|| format!("DEFAULT_MAX_PRICE='{}' is not a number", raw))?,
            None => Decimal::ZERO,
        };

        Ok(Self {
            controller,
            poller: PollerSettings::from_env(),
            search_retry: RetryPolicy::search_from_env(),
            buy_retry: RetryPolicy::buy_from_env(),
            auth_ttl: Duration::from_secs(
                env_parse::<u64>("AUTH_TOKEN_TTL_SECS")
                    .filter(|&n| n > 0)
                    .unwrap_or(DEFAULT_AUTH_TOKEN_TTL_SECS),
            ),
            shutdown_timeout: Duration::from_millis(
                env_parse::<u64>("SHUTDOWN_TIMEOUT_MS")
                    .filter(|&n| n > 0)
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            ),
            cheapest_limit_per_venue: env_parse::<usize>("CHEAPEST_LIMIT_PER_VENUE")
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_CHEAPEST_LIMIT_PER_VENUE),
            category_filter_path: env_var("CATEGORY_FILTER_PATH").map(PathBuf::from),
            defaults: CommandDefaults {
                max_price,
                gift_name: env_var("DEFAULT_GIFT_NAME").map(|s| s.trim().to_string()),
            },
            venues: KNOWN_VENUES.iter().map(|name| VenueConfig::from_env(name)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 1 "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_poll_interval_precedence() {
        assert_eq!(poll_interval_ms(None, None), DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(poll_interval_ms(Some("700".into()), Some("3".into())), 700);
        assert_eq!(poll_interval_ms(None, Some("1.5".into())), 1500);
        assert_eq!(poll_interval_ms(Some("junk".into()), Some("2".into())), 2000);
        assert_eq!(poll_interval_ms(Some("0".into()), None), DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(poll_interval_ms(None, Some("-1".into())), DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_venue_config_from_lookup() {
        let cfg = VenueConfig::from_lookup(
            "portals",
            lookup(&[
                ("PORTALS_BASE_URL", "https://gw.example"),
                ("PORTALS_AUTH", "  "),
                ("PORTALS_CREDENTIALS", "query_id=1"),
                ("PORTALS_OWNER_REF", "yes"),
            ]),
        );
        assert_eq!(cfg.id.as_str(), "PORTALS");
        assert_eq!(cfg.base_url.as_deref(), Some("https://gw.example"));
        assert_eq!(cfg.auth_override, None);
        assert!(cfg.send_owner_ref);
        assert!(cfg.is_enabled());

        let bare = VenueConfig::from_lookup("tonnel", lookup(&[("TONNEL_BASE_URL", "x")]));
        assert!(!bare.is_enabled());
        assert!(!bare.send_owner_ref);
    }

    #[test]
    fn test_venue_config_debug_hides_secrets() {
        let cfg = VenueConfig::from_lookup(
            "tonnel",
            lookup(&[("TONNEL_AUTH", "secret-token"), ("TONNEL_CREDENTIALS", "hunter2")]),
        );
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}

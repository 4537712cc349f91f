//! Operator command parsing.
//!
//! Accepted forms (prefix `/`, `!` or `.`):
//!
//! - `/autobuy <max_price> [name]` or `/autobuy floor [name]`
//! - `/stop`
//! - `/cheapest [name]`
//! - `/status`
//! - `/start` (help)

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{parse_decimal, AutobuyParams, PriceMode};

const PREFIXES: [char; 3] = ['/', '!', '.'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("not a command")]
    NotACommand,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("first argument must be a price, e.g. /autobuy 32.5 (got '{0}')")]
    InvalidPrice(String),
    #[error("max price must be positive, e.g. /autobuy 32.5 \"toy bear\"")]
    NonPositivePrice,
}

/// Fallbacks for `/autobuy` and `/cheapest` without arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandDefaults {
    pub max_price: Decimal,
    pub gift_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `max_price: None` means "use the configured default".
    Autobuy {
        max_price: Option<Decimal>,
        name: Option<String>,
        mode: PriceMode,
    },
    Stop,
    Cheapest {
        name: Option<String>,
    },
    Status,
    Help,
}

/// Join the remaining words into a name, dropping surrounding quotes.
fn join_name(words: &[&str]) -> Option<String> {
    let joined = words.join(" ");
    let name = joined.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
    (!name.is_empty()).then(|| name.to_string())
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let body = line
            .strip_prefix(|c: char| PREFIXES.contains(&c))
            .ok_or(CommandError::NotACommand)?;

        let words: Vec<&str> = body.split_whitespace().collect();
        let Some((head, args)) = words.split_first() else {
            return Err(CommandError::NotACommand);
        };
        // Telegram-style "/cmd@botname"
        let head = head.split('@').next().unwrap_or_default().to_lowercase();

        match head.as_str() {
            "autobuy" => match args.first() {
                None => Ok(Command::Autobuy {
                    max_price: None,
                    name: None,
                    mode: PriceMode::Threshold,
                }),
                Some(first) if first.eq_ignore_ascii_case("floor") => Ok(Command::Autobuy {
                    max_price: None,
                    name: join_name(&args[1..]),
                    mode: PriceMode::BelowFloor,
                }),
                Some(first) => {
                    let price = parse_decimal(first)
                        .ok_or_else(|| CommandError::InvalidPrice(first.to_string()))?;
                    if price <= Decimal::ZERO {
                        return Err(CommandError::NonPositivePrice);
                    }
                    Ok(Command::Autobuy {
                        max_price: Some(price),
                        name: join_name(&args[1..]),
                        mode: PriceMode::Threshold,
                    })
                }
            },
            "stop" => Ok(Command::Stop),
            "cheapest" => Ok(Command::Cheapest {
                name: join_name(args),
            }),
            "status" => Ok(Command::Status),
            "start" | "help" => Ok(Command::Help),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }

    /// Build run parameters for an `Autobuy` command, filling gaps from
    /// `defaults`. Returns `None` for any other command.
    pub fn autobuy_params(&self, defaults: &CommandDefaults) -> Option<Result<AutobuyParams, CommandError>> {
        let Command::Autobuy { max_price, name, mode } = self else {
            return None;
        };
        let name = match (max_price, name) {
            // Bare "/autobuy" takes both defaults; an explicit price runs on ANY
            // unless a name was given too
            (None, None) => defaults.gift_name.clone(),
            _ => name.clone(),
        };
        let params = match mode {
            PriceMode::Threshold => {
                let max_price = max_price.unwrap_or(defaults.max_price);
                if max_price <= Decimal::ZERO {
                    return Some(Err(CommandError::NonPositivePrice));
                }
                AutobuyParams::threshold(max_price, name)
            }
            PriceMode::BelowFloor => AutobuyParams::threshold(defaults.max_price, name)
                .with_mode(PriceMode::BelowFloor),
        };
        Some(Ok(params))
    }
}

/// Help text for `/start`.
pub fn help_text(dry_run: bool, poll_interval_ms: u64) -> String {
    format!(
        "Bot is alive.\n\
         \x20 /cheapest [name] - combined cheapest listings across venues\n\
         \x20 /autobuy <price> [name] - one autobuy for all venues\n\
         \x20 /autobuy floor [name] - buy anything listed below its floor\n\
         \x20 /status - per-venue state\n\
         \x20 /stop - stop all venues\n\
         DRY_RUN={}, POLL_INTERVAL={}ms",
        dry_run, poll_interval_ms
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> CommandDefaults {
        CommandDefaults {
            max_price: Decimal::from(20),
            gift_name: Some("Toy Bear".into()),
        }
    }

    #[test]
    fn test_prefixes() {
        for line in ["/stop", "!stop", ".stop", "  /STOP  ", "/stop@gift_bot"] {
            assert_eq!(Command::parse(line), Ok(Command::Stop), "{}", line);
        }
        assert_eq!(Command::parse("stop"), Err(CommandError::NotACommand));
        assert_eq!(Command::parse("/"), Err(CommandError::NotACommand));
        assert_eq!(
            Command::parse("/sell"),
            Err(CommandError::Unknown("sell".into()))
        );
    }

    #[test]
    fn test_autobuy_with_price_and_quoted_name() {
        let cmd = Command::parse("/autobuy 31.5 \"toy bear\"").unwrap();
        assert_eq!(
            cmd,
            Command::Autobuy {
                max_price: Some(Decimal::new(315, 1)),
                name: Some("toy bear".into()),
                mode: PriceMode::Threshold,
            }
        );
        let params = cmd.autobuy_params(&defaults()).unwrap().unwrap();
        assert_eq!(params.max_price, Decimal::new(315, 1));
        assert_eq!(params.name_filter.as_deref(), Some("toy bear"));
    }

    #[test]
    fn test_autobuy_price_only_runs_on_any() {
        let cmd = Command::parse("/autobuy 5").unwrap();
        let params = cmd.autobuy_params(&defaults()).unwrap().unwrap();
        assert_eq!(params.name_filter, None);
        assert_eq!(params.filter_label(), "ANY");
    }

    #[test]
    fn test_autobuy_rejects_bad_prices() {
        assert_eq!(
            Command::parse("/autobuy cheap"),
            Err(CommandError::InvalidPrice("cheap".into()))
        );
        assert_eq!(Command::parse("/autobuy 0"), Err(CommandError::NonPositivePrice));
        assert_eq!(Command::parse("/autobuy -3"), Err(CommandError::NonPositivePrice));
    }

    #[test]
    fn test_autobuy_without_args_uses_defaults() {
        let cmd = Command::parse("/autobuy").unwrap();
        let params = cmd.autobuy_params(&defaults()).unwrap().unwrap();
        assert_eq!(params.max_price, Decimal::from(20));
        assert_eq!(params.name_filter.as_deref(), Some("Toy Bear"));

        let unset = CommandDefaults::default();
        assert_eq!(
            cmd.autobuy_params(&unset),
            Some(Err(CommandError::NonPositivePrice))
        );
    }

    #[test]
    fn test_autobuy_floor_mode() {
        let cmd = Command::parse("/autobuy floor Lol Pop").unwrap();
        let params = cmd.autobuy_params(&CommandDefaults::default()).unwrap().unwrap();
        assert_eq!(params.mode, PriceMode::BelowFloor);
        assert_eq!(params.name_filter.as_deref(), Some("Lol Pop"));
    }

    #[test]
    fn test_cheapest_and_help() {
        assert_eq!(
            Command::parse("/cheapest").unwrap(),
            Command::Cheapest { name: None }
        );
        assert_eq!(
            Command::parse(".cheapest  Toy   Bear ").unwrap(),
            Command::Cheapest {
                name: Some("Toy Bear".into())
            }
        );
        assert_eq!(Command::parse("/start").unwrap(), Command::Help);
        assert_eq!(Command::Stop.autobuy_params(&defaults()), None);
        assert!(help_text(true, 1500).contains("DRY_RUN=true, POLL_INTERVAL=1500ms"));
    }
}

//! Gateway configuration from environment variables.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use auction_engine::admission::AdmissionConfig;
use auction_engine::metadata::DEFAULT_GATEWAY_TEMPLATE;
use auction_engine::snapshot::SnapshotConfig;
use event_broker::BrokerConfig;
use thiserror::Error;
use types::numeric::Amount;
use types::retry::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// Pinning API base; in-memory store when unset
    pub content_store_url: Option<String>,
    pub content_api_key: Option<String>,
    pub content_api_secret: Option<String>,
    /// Read URL for a content id, `{cid}` is substituted
    pub gateway_template: String,
    /// Ledger relay base; in-memory ledger when unset
    pub ledger_url: Option<String>,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
    pub heartbeat_interval: Duration,
    pub stale_timeout: Duration,
    pub queue_capacity: usize,
    pub default_min_bid_increment: Amount,
    /// How often active auctions are checked for having ended
    pub lifecycle_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            content_store_url: None,
            content_api_key: None,
            content_api_secret: None,
            gateway_template: DEFAULT_GATEWAY_TEMPLATE.to_string(),
            ledger_url: None,
            fetch_timeout: Duration::from_secs(15),
            retry: RetryPolicy::content_fetch(),
            heartbeat_interval: Duration::from_secs(30),
            stale_timeout: Duration::from_secs(90),
            queue_capacity: 256,
            default_min_bid_increment: Amount::from_u64(1),
            lifecycle_interval: Duration::from_secs(5),
        }
    }
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `AUCTION_BIND_ADDR` (default: 0.0.0.0:8080)
    /// - `CONTENT_STORE_URL`, `CONTENT_STORE_API_KEY`, `CONTENT_STORE_API_SECRET`
    /// - `CONTENT_GATEWAY_TEMPLATE` (default: https://gateway.pinata.cloud/ipfs/{cid})
    /// - `LEDGER_URL`
    /// - `FETCH_TIMEOUT_SECS` (default: 15)
    /// - `RETRY_MAX_ATTEMPTS` (default: 3)
    /// - `RETRY_BASE_DELAY_MS` (default: 1000)
    /// - `RETRY_MAX_DELAY_MS` (default: 5000)
    /// - `WS_HEARTBEAT_SECS` (default: 30)
    /// - `WS_STALE_TIMEOUT_SECS` (default: 90)
    /// - `WS_QUEUE_CAPACITY` (default: 256)
    /// - `DEFAULT_MIN_BID_INCREMENT` (default: 1)
    /// - `LIFECYCLE_TICK_SECS` (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`GatewayConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let text = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            bind_addr: parse(&lookup, "AUCTION_BIND_ADDR", defaults.bind_addr)?,
            content_store_url: text("CONTENT_STORE_URL"),
            content_api_key: text("CONTENT_STORE_API_KEY"),
            content_api_secret: text("CONTENT_STORE_API_SECRET"),
            gateway_template: text("CONTENT_GATEWAY_TEMPLATE").unwrap_or(defaults.gateway_template),
            ledger_url: text("LEDGER_URL"),
            fetch_timeout: positive_secs(&lookup, "FETCH_TIMEOUT_SECS", 15)?,
            retry: RetryPolicy::new(
                parse(&lookup, "RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                Duration::from_millis(parse(&lookup, "RETRY_BASE_DELAY_MS", 1000)?),
                Duration::from_millis(parse(&lookup, "RETRY_MAX_DELAY_MS", 5000)?),
            ),
            heartbeat_interval: positive_secs(&lookup, "WS_HEARTBEAT_SECS", 30)?,
            stale_timeout: positive_secs(&lookup, "WS_STALE_TIMEOUT_SECS", 90)?,
            queue_capacity: parse(&lookup, "WS_QUEUE_CAPACITY", defaults.queue_capacity)?,
            default_min_bid_increment: parse(
                &lookup,
                "DEFAULT_MIN_BID_INCREMENT",
                defaults.default_min_bid_increment,
            )?,
            lifecycle_interval: positive_secs(&lookup, "LIFECYCLE_TICK_SECS", 5)?,
        })
    }

    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            gateway_template: self.gateway_template.clone(),
            fetch_timeout: self.fetch_timeout,
            content_retry: self.retry,
            default_min_bid_increment: self.default_min_bid_increment,
            ..SnapshotConfig::default()
        }
    }

    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            receipt_timeout: self.fetch_timeout,
        }
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            queue_capacity: self.queue_capacity,
            heartbeat_interval: self.heartbeat_interval,
            stale_timeout: self.stale_timeout,
            ..BrokerConfig::default()
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        _ => Ok(default),
    }
}

/// Whole seconds, at least one. Zero would stall timeouts and panic intervals.
fn positive_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match parse(lookup, var, default)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.content_store_url.is_none());
        assert!(config.ledger_url.is_none());
        assert_eq!(config.fetch_timeout, Duration::from_secs(15));
        assert_eq!(config.retry, RetryPolicy::content_fetch());
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.gateway_template, DEFAULT_GATEWAY_TEMPLATE);
    }

    #[test]
    fn test_overrides_flow_into_components() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("AUCTION_BIND_ADDR", "127.0.0.1:9000"),
            ("LEDGER_URL", "http://ledger:8545"),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("WS_QUEUE_CAPACITY", "16"),
            ("DEFAULT_MIN_BID_INCREMENT", "0.5"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.ledger_url.as_deref(), Some("http://ledger:8545"));
        assert_eq!(config.snapshot_config().content_retry.max_attempts, 5);
        assert_eq!(config.broker_config().queue_capacity, 16);
        assert_eq!(
            config.default_min_bid_increment,
            "0.5".parse::<Amount>().unwrap()
        );
    }

    #[test]
    fn test_invalid_number_rejected() {
        let err = GatewayConfig::from_lookup(lookup(&[("FETCH_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "FETCH_TIMEOUT_SECS",
                value: "soon".into()
            }
        );
    }

    #[test]
    fn test_zero_periods_rejected() {
        for var in [
            "WS_HEARTBEAT_SECS",
            "LIFECYCLE_TICK_SECS",
            "WS_STALE_TIMEOUT_SECS",
            "FETCH_TIMEOUT_SECS",
        ] {
            let err = GatewayConfig::from_lookup(lookup(&[(var, "0")])).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: v, .. } if v == var),
                "{} accepted zero",
                var
            );
        }

        let config = GatewayConfig::from_lookup(lookup(&[("LIFECYCLE_TICK_SECS", "2")])).unwrap();
        assert_eq!(config.lifecycle_interval, Duration::from_secs(2));
    }
}

//! Service Configuration Settings
//!
//! Configuration types for the price stream service, loaded from
//! environment variables.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::{DEFAULT_IDLE_TIMEOUT, DEFAULT_POLL_INTERVAL, RegistrySettings};
use crate::domain::price::Symbol;
use crate::infrastructure::source::SourceSettings;

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// gRPC server port.
    pub grpc_port: u16,
    /// Health and admin HTTP port.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            grpc_port: 8080,
            http_port: 8081,
        }
    }
}

/// Polling and session timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Delay between polls of one symbol.
    pub poll_interval: Duration,
    /// Idle time before a session emits a heartbeat.
    pub idle_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl StreamSettings {
    /// Registry settings derived from these timings.
    #[must_use]
    pub const fn registry(&self) -> RegistrySettings {
        RegistrySettings {
            poll_interval: self.poll_interval,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Polling and session timing.
    pub stream: StreamSettings,
    /// Simulated price source settings.
    pub source: SourceSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a key maps to an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server = ServerSettings {
            grpc_port: parse_env(&lookup, "PRICE_STREAM_GRPC_PORT", defaults.server.grpc_port)?,
            http_port: parse_env(&lookup, "PRICE_STREAM_HTTP_PORT", defaults.server.http_port)?,
        };

        let stream = StreamSettings {
            poll_interval: parse_env_duration_millis(
                &lookup,
                "PRICE_STREAM_POLL_INTERVAL_MS",
                defaults.stream.poll_interval,
            )?,
            idle_timeout: parse_env_duration_millis(
                &lookup,
                "PRICE_STREAM_IDLE_TIMEOUT_MS",
                defaults.stream.idle_timeout,
            )?,
        };

        let universe = match lookup("PRICE_SOURCE_SYMBOLS") {
            Some(raw) => parse_universe(&raw)?,
            None => defaults.source.universe,
        };

        let source = SourceSettings {
            universe,
            volatility: parse_env_fraction(
                &lookup,
                "PRICE_SOURCE_VOLATILITY",
                defaults.source.volatility,
                false,
            )?,
            transient_failure_rate: parse_env_fraction(
                &lookup,
                "PRICE_SOURCE_TRANSIENT_FAILURE_RATE",
                defaults.source.transient_failure_rate,
                true,
            )?,
        };

        Ok(Self {
            server,
            stream,
            source,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A duration variable was zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroDuration(String),
    /// The symbol universe was empty or malformed.
    #[error("invalid PRICE_SOURCE_SYMBOLS entry {entry:?}: {reason}")]
    InvalidUniverse {
        /// Offending entry.
        entry: String,
        /// Why it was rejected.
        reason: String,
    },
}

fn invalid(key: &str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map_or(Ok(default), |v| {
        v.trim().parse().map_err(|e| invalid(key, &v, e))
    })
}

fn parse_env_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let millis: u64 = parse_env(lookup, key, u64::try_from(default.as_millis()).unwrap_or(u64::MAX))?;
    if millis == 0 {
        return Err(ConfigError::ZeroDuration(key.to_string()));
    }
    Ok(Duration::from_millis(millis))
}

fn parse_env_fraction<F>(
    lookup: &F,
    key: &str,
    default: f64,
    inclusive: bool,
) -> Result<f64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value: f64 = parse_env(lookup, key, default)?;
    let in_range = if inclusive {
        (0.0..=1.0).contains(&value)
    } else {
        (0.0..1.0).contains(&value)
    };

    if in_range {
        Ok(value)
    } else {
        let bound = if inclusive { "[0, 1]" } else { "[0, 1)" };
        Err(invalid(key, &value.to_string(), format!("must be within {bound}")))
    }
}

/// Parse `SYM=price,SYM=price,...`.
fn parse_universe(raw: &str) -> Result<BTreeMap<Symbol, Decimal>, ConfigError> {
    let mut universe = BTreeMap::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let universe_error = |reason: String| ConfigError::InvalidUniverse {
            entry: entry.to_string(),
            reason,
        };

        let (symbol, price) = entry
            .split_once('=')
            .ok_or_else(|| universe_error("expected SYMBOL=PRICE".to_string()))?;

        let symbol = Symbol::parse(symbol).map_err(|e| universe_error(e.to_string()))?;
        let price = Decimal::from_str(price.trim()).map_err(|e| universe_error(e.to_string()))?;
        if price <= Decimal::ZERO {
            return Err(universe_error("price must be positive".to_string()));
        }

        universe.insert(symbol, price.round_dp(2));
    }

    if universe.is_empty() {
        return Err(ConfigError::InvalidUniverse {
            entry: raw.to_string(),
            reason: "no symbols listed".to_string(),
        });
    }

    Ok(universe)
}

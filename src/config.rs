use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::map::containment::DEFAULT_BUFFER_DEG;
use crate::maps_api::overpass::DEFAULT_ENDPOINT;
use crate::maps_api::retry::BackoffPolicy;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid { key: &'static str, value: String, reason: String },
}

/// Runtime settings. Every field has a default; the environment (and `.env`) overrides it.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub overpass_url: String,
    pub overpass_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub boundaries_ttl: Duration,
    pub fra_ttl: Duration,
    pub assets_ttl: Duration,
    /// How long a boundaries request waits for the upstream before serving mock data.
    pub boundaries_budget: Duration,
    pub fra_budget: Duration,
    pub cache_capacity: usize,
    pub containment_buffer_deg: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            overpass_url: DEFAULT_ENDPOINT.to_string(),
            overpass_timeout: Duration::from_millis(5000),
            backoff: BackoffPolicy::default(),
            boundaries_ttl: Duration::from_secs(15 * 60),
            fra_ttl: Duration::from_secs(30 * 60),
            assets_ttl: Duration::from_secs(30 * 60),
            boundaries_budget: Duration::from_millis(5000),
            fra_budget: Duration::from_millis(3000),
            cache_capacity: 256,
            containment_buffer_deg: DEFAULT_BUFFER_DEG,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    /// Builds a config from any key lookup; absent keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let millis = |key, default: Duration| {
            parse(&lookup, key, default.as_millis() as u64).map(Duration::from_millis)
        };
        let secs = |key, default: Duration| {
            parse(&lookup, key, default.as_secs()).map(Duration::from_secs)
        };

        let config = Self {
            bind_addr: parse(&lookup, "VANMITRA_BIND_ADDR", defaults.bind_addr)?,
            overpass_url: lookup("OVERPASS_URL")
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .unwrap_or(defaults.overpass_url),
            overpass_timeout: millis("OVERPASS_TIMEOUT_MS", defaults.overpass_timeout)?,
            backoff: BackoffPolicy {
                max_retries: parse(&lookup, "OVERPASS_MAX_RETRIES", defaults.backoff.max_retries)?,
                base_delay: millis("OVERPASS_RETRY_BASE_MS", defaults.backoff.base_delay)?,
            },
            boundaries_ttl: secs("BOUNDARIES_TTL_SECS", defaults.boundaries_ttl)?,
            fra_ttl: secs("FRA_TTL_SECS", defaults.fra_ttl)?,
            assets_ttl: secs("ASSETS_TTL_SECS", defaults.assets_ttl)?,
            boundaries_budget: millis("BOUNDARIES_BUDGET_MS", defaults.boundaries_budget)?,
            fra_budget: millis("FRA_BUDGET_MS", defaults.fra_budget)?,
            cache_capacity: parse(&lookup, "CACHE_CAPACITY", defaults.cache_capacity)?,
            containment_buffer_deg: parse(
                &lookup,
                "CONTAINMENT_BUFFER_DEG",
                defaults.containment_buffer_deg,
            )?,
        };

        if !(config.containment_buffer_deg.is_finite() && config.containment_buffer_deg >= 0.0) {
            return Err(ConfigError::Invalid {
                key: "CONTAINMENT_BUFFER_DEG",
                value: config.containment_buffer_deg.to_string(),
                reason: "must be a non-negative number of degrees".into(),
            });
        }
        Ok(config)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

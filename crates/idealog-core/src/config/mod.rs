//! Engine and remote configuration.
//!
//! `EngineConfig` holds the timing knobs of the local store and sync engine;
//! `RemoteConfig` describes how to reach the HTTP remote store.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::non_blank;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(100);
const DEFAULT_CONFLICT_TOLERANCE: Duration = Duration::from_millis(1000);

pub const CACHE_TTL_ENV: &str = "IDEALOG_CACHE_TTL_SECS";
pub const BATCH_WINDOW_ENV: &str = "IDEALOG_BATCH_WINDOW_MS";
pub const CONFLICT_TOLERANCE_ENV: &str = "IDEALOG_CONFLICT_TOLERANCE_MS";

/// Timing configuration of the record store and sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lifetime of a memoized query result. Zero disables the cache.
    pub cache_ttl: Duration,
    /// Period of the background sweep of expired cache entries
    pub cache_sweep_interval: Duration,
    /// How long the coalescer collects writes after the first one arrives
    pub batch_window: Duration,
    /// Timestamps closer than this are treated as concurrent by `merge`
    pub conflict_tolerance: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_sweep_interval: DEFAULT_CACHE_SWEEP_INTERVAL,
            batch_window: DEFAULT_BATCH_WINDOW,
            conflict_tolerance: DEFAULT_CONFLICT_TOLERANCE,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache_sweep_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    #[must_use]
    pub const fn with_conflict_tolerance(mut self, tolerance: Duration) -> Self {
        self.conflict_tolerance = tolerance;
        self
    }

    /// Defaults overridden by `IDEALOG_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`.
    ///
    /// Blank values are ignored; non-numeric values are rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(secs) = read_number(&lookup, CACHE_TTL_ENV)? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(millis) = read_number(&lookup, BATCH_WINDOW_ENV)? {
            config.batch_window = Duration::from_millis(millis);
        }
        if let Some(millis) = read_number(&lookup, CONFLICT_TOLERANCE_ENV)? {
            config.conflict_tolerance = Duration::from_millis(millis);
        }
        Ok(config)
    }

    /// Conflict tolerance in milliseconds
    pub fn conflict_tolerance_millis(&self) -> i64 {
        i64::try_from(self.conflict_tolerance.as_millis()).unwrap_or(i64::MAX)
    }
}

fn read_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(raw) = non_blank(lookup(key)) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| Error::Validation(format!("{key} must be a non-negative integer, got '{raw}'")))
}

/// Connection settings of the HTTP remote store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL without a trailing slash
    pub base_url: String,
    /// Bearer token sent with every request
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl RemoteConfig {
    /// Validate and normalize remote settings.
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self> {
        let base_url = non_blank(Some(base_url.into()))
            .ok_or_else(|| Error::Validation("remote base URL must not be empty".into()))?;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Validation(
                "remote base URL must include http:// or https://".into(),
            ));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: non_blank(auth_token),
        })
    }

    /// Absolute URL of an API path
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(600));
        assert_eq!(config.batch_window, Duration::from_millis(100));
        assert_eq!(config.conflict_tolerance_millis(), 1000);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            (CACHE_TTL_ENV, "60"),
            (BATCH_WINDOW_ENV, " 5 "),
            (CONFLICT_TOLERANCE_ENV, ""),
        ]))
        .unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.batch_window, Duration::from_millis(5));
        assert_eq!(config.conflict_tolerance, DEFAULT_CONFLICT_TOLERANCE);
    }

    #[test]
    fn non_numeric_override_is_rejected() {
        let error = EngineConfig::from_lookup(lookup(&[(BATCH_WINDOW_ENV, "soon")])).unwrap_err();
        assert!(error.to_string().contains(BATCH_WINDOW_ENV));
    }

    #[test]
    fn remote_config_normalizes_base_url() {
        let config = RemoteConfig::new(" https://api.example.com/ ", Some("  ".into())).unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.auth_token, None);
        assert_eq!(
            config.endpoint("/v1/ideas"),
            "https://api.example.com/v1/ideas"
        );
    }

    #[test]
    fn remote_config_rejects_invalid_urls() {
        assert!(RemoteConfig::new("", None).is_err());
        assert!(RemoteConfig::new("api.example.com", None).is_err());
    }

    #[test]
    fn remote_config_debug_redacts_token() {
        let config = RemoteConfig::new("https://api.example.com", Some("secret".into())).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}

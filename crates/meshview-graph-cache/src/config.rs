//! Configuration for the graph cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default time a session may go without a read before it is dropped.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default aggregate memory budget for all cached graphs, in MB.
pub const DEFAULT_MAX_CACHE_MEMORY_MB: u64 = 1024;

/// Default interval between background refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the session graph cache.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphCacheConfig {
    /// Whether graph caching is turned on at all.
    pub enabled: bool,

    /// How long a session may go unread before its refresh job evicts it.
    pub inactivity_timeout: Duration,

    /// Aggregate memory budget. Exceeding it evicts least recently accessed
    /// sessions; it never rejects the write that caused it.
    pub max_cache_memory_mb: u64,

    /// Default refresh interval for new refresh jobs.
    pub refresh_interval: Duration,
}

impl Default for GraphCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            max_cache_memory_mb: DEFAULT_MAX_CACHE_MEMORY_MB,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl GraphCacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn caching on or off.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the inactivity timeout.
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Set the memory budget in MB.
    pub fn with_max_cache_memory_mb(mut self, mb: u64) -> Self {
        self.max_cache_memory_mb = mb;
        self
    }

    /// Set the default refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Build a configuration from externally supplied settings.
    ///
    /// Unparseable or zero durations and non-positive memory sizes fall back
    /// to the defaults with a warning instead of failing.
    pub fn from_settings(settings: &GraphCacheSettings) -> Self {
        let refresh_interval = parse_or_default(
            "graph_cache.refresh_interval",
            &settings.refresh_interval,
            DEFAULT_REFRESH_INTERVAL,
        );
        let inactivity_timeout = parse_or_default(
            "graph_cache.inactivity_timeout",
            &settings.inactivity_timeout,
            DEFAULT_INACTIVITY_TIMEOUT,
        );

        let max_cache_memory_mb = match u64::try_from(settings.max_cache_memory_mb) {
            Ok(mb) if mb > 0 => mb,
            _ => {
                warn!(
                    value = settings.max_cache_memory_mb,
                    default = DEFAULT_MAX_CACHE_MEMORY_MB,
                    "Invalid graph_cache.max_cache_memory_mb, using default"
                );
                DEFAULT_MAX_CACHE_MEMORY_MB
            }
        };

        Self {
            enabled: settings.enabled,
            inactivity_timeout,
            max_cache_memory_mb,
            refresh_interval,
        }
    }
}

fn parse_or_default(field: &str, raw: &str, default: Duration) -> Duration {
    match humantime::parse_duration(raw.trim()) {
        Ok(duration) if !duration.is_zero() => duration,
        Ok(_) => {
            warn!(field, value = raw, default = ?default, "Zero duration in graph cache settings, using default");
            default
        }
        Err(e) => {
            warn!(field, value = raw, error = %e, default = ?default, "Invalid duration in graph cache settings, using default");
            default
        }
    }
}

/// Graph cache settings as they appear in an external configuration file.
///
/// ```toml
/// [graph_cache]
/// enabled = true
/// refresh_interval = "60s"
/// inactivity_timeout = "10m"
/// max_cache_memory_mb = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphCacheSettings {
    /// Whether graph caching is turned on.
    pub enabled: bool,

    /// Inactivity timeout as a human-readable duration ("10m").
    pub inactivity_timeout: String,

    /// Memory budget in MB.
    pub max_cache_memory_mb: i64,

    /// Refresh interval as a human-readable duration ("60s").
    pub refresh_interval: String,
}

impl Default for GraphCacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            inactivity_timeout: "10m".to_string(),
            max_cache_memory_mb: DEFAULT_MAX_CACHE_MEMORY_MB as i64,
            refresh_interval: "60s".to_string(),
        }
    }
}

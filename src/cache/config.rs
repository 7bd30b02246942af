//! Cache configuration.
//!
//! Selects the store backend and the lifetimes applied to resolved assets.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_MEMORY_ENTRY_LIMIT: usize = 1024;
const DEFAULT_SUCCESS_TTL_SECS: u64 = 60 * 60 * 24 * 30;
const DEFAULT_PLACEHOLDER_TTL_SECS: u64 = 60 * 60 * 24;
const DEFAULT_CLIENT_MAX_AGE_SECS: u64 = 60 * 60 * 24;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Which implementation backs the asset store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local LRU, lost on restart.
    Memory,
    /// Shared Postgres table, survives restarts.
    Postgres,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Postgres => "postgres",
        }
    }
}

/// Cache configuration resolved from settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Store implementation.
    pub backend: StoreBackend,
    /// Maximum entries held by the memory store.
    pub memory_entry_limit: usize,
    /// Lifetime of assets fetched from a real origin.
    pub success_ttl: Duration,
    /// Lifetime of placeholder resolutions.
    pub placeholder_ttl: Duration,
    /// `max-age` advertised to browsers and proxies.
    pub client_max_age: Duration,
    /// How often expired entries are purged.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            memory_entry_limit: DEFAULT_MEMORY_ENTRY_LIMIT,
            success_ttl: Duration::from_secs(DEFAULT_SUCCESS_TTL_SECS),
            placeholder_ttl: Duration::from_secs(DEFAULT_PLACEHOLDER_TTL_SECS),
            client_max_age: Duration::from_secs(DEFAULT_CLIENT_MAX_AGE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            memory_entry_limit: settings.memory_entry_limit,
            success_ttl: settings.success_ttl,
            placeholder_ttl: settings.placeholder_ttl,
            client_max_age: settings.client_max_age,
            sweep_interval: settings.sweep_interval,
        }
    }
}

impl CacheConfig {
    /// Returns the memory entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_entry_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            success: self.success_ttl,
            placeholder: self.placeholder_ttl,
        }
    }

    /// `Cache-Control` value sent with every asset response.
    pub fn cache_control_header(&self) -> String {
        format!("public, max-age={}", self.client_max_age.as_secs())
    }
}

/// Store lifetimes by resolution kind.
///
/// Placeholders always get the short lifetime so that assets appearing
/// upstream later, or origins recovering from an outage, are picked up sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub success: Duration,
    pub placeholder: Duration,
}

impl TtlPolicy {
    pub fn for_result(&self, placeholder: bool) -> Duration {
        if placeholder {
            self.placeholder
        } else {
            self.success
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        CacheConfig::default().ttl_policy()
    }
}

//! Configuration contract consumed by store factories

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Connection-pool tuning knobs.
///
/// `None` (or zero) leaves the corresponding limit off. The default value is
/// also the fallback when configuration cannot be read during early
/// bootstrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Maximum number of live connections; `None` or `0` means unbounded.
    #[serde(default)]
    pub max_size: Option<u32>,
    /// How long an acquire may wait for a free connection, in milliseconds;
    /// `None` or `0` means wait indefinitely.
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,
}

impl PoolSettings {
    /// The pool bound, if one is configured.
    pub fn bound(&self) -> Option<usize> {
        match self.max_size {
            Some(0) | None => None,
            Some(n) => Some(n as usize),
        }
    }

    /// The acquire timeout, if one is configured.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        match self.acquire_timeout_ms {
            Some(0) | None => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

/// Source of store configuration, typically backed by the host application's
/// registry.
///
/// Both reads are fallible so callers can tell "not configured" apart from
/// "configuration subsystem unavailable".
pub trait ConfigSource: Send + Sync {
    /// Backend URL of the form `scheme:host[:port]`, if one is configured.
    fn backend_url(&self) -> Result<Option<String>>;

    /// Pool sizing and acquire-timeout settings.
    fn pool_settings(&self) -> Result<PoolSettings>;
}

/// Fixed in-memory configuration, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    pub url: Option<String>,
    pub pool: PoolSettings,
}

impl StaticConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            pool: PoolSettings::default(),
        }
    }
}

impl ConfigSource for StaticConfig {
    fn backend_url(&self) -> Result<Option<String>> {
        Ok(self.url.clone())
    }

    fn pool_settings(&self) -> Result<PoolSettings> {
        Ok(self.pool)
    }
}

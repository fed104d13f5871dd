//! Billing configuration

use nimbill_common::{NimbillError, Result, DEFAULT_DEVIATION_SECS, DEFAULT_TARIFF_ID, HOUR_SECS};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Billing service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Windowing and reconciliation
    pub metering: MeteringSettings,
    /// Coverage persistence
    pub cache: CacheSettings,
}

impl BillingConfig {
    /// Load configuration from `.env` and `NIMBILL_*` environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();

        // Metering settings
        if let Some(v) = env_parse("NIMBILL_WINDOW_SECS") {
            cfg.metering.window_secs = v;
        }
        if let Some(v) = env_parse("NIMBILL_DEVIATION_SECS") {
            cfg.metering.deviation_secs = v;
        }
        if let Ok(tariff) = std::env::var("NIMBILL_DEFAULT_TARIFF") {
            cfg.metering.default_tariff = tariff;
        }

        // Cache settings
        if let Ok(url) = std::env::var("NIMBILL_REDIS_URL") {
            cfg.cache.redis_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Ok(prefix) = std::env::var("NIMBILL_CACHE_PREFIX") {
            cfg.cache.prefix = prefix;
        }
        if let Some(v) = env_parse("NIMBILL_CACHE_TTL_SECS") {
            cfg.cache.ttl_secs = v;
        }
        if let Some(v) = env_parse("NIMBILL_CACHE_MAX_ENTRIES") {
            cfg.cache.max_entries = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metering.window_secs <= 0 {
            return Err(NimbillError::Config(format!(
                "Window width must be positive, got {}",
                self.metering.window_secs
            )));
        }
        if self.metering.default_tariff.trim().is_empty() {
            return Err(NimbillError::Config("Default tariff id is empty".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparsable setting");
            None
        }
    }
}

/// Windowing and reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringSettings {
    /// Window width in seconds
    pub window_secs: i64,
    /// Largest gap, in seconds, bridged when merging same-weight coverage
    pub deviation_secs: u64,
    /// Tariff used when no assignment covers a record
    pub default_tariff: String,
}

impl Default for MeteringSettings {
    fn default() -> Self {
        Self {
            window_secs: HOUR_SECS,
            deviation_secs: DEFAULT_DEVIATION_SECS,
            default_tariff: DEFAULT_TARIFF_ID.to_string(),
        }
    }
}

/// Segment cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Redis URL, in-memory cache when absent
    pub redis_url: Option<String>,
    /// Key prefix
    pub prefix: String,
    /// Entry TTL in seconds
    pub ttl_secs: u64,
    /// Capacity of the in-memory cache
    pub max_entries: usize,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            prefix: "nimbill".to_string(),
            // Long enough to span a billing period plus late deliveries
            ttl_secs: 35 * 24 * 3600,
            max_entries: 100_000,
        }
    }
}

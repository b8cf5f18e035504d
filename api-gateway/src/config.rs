//! Gateway configuration

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use spendgate_metering::MeteringConfig;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Gateway configuration, read from `SPENDGATE_*` environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Redis URL; caching is disabled when unset
    pub redis_url: Option<String>,
    /// API keys as `key=user@org`, comma separated
    pub api_keys: String,
    /// JSON seed file with pricing and quotas
    pub seed_file: Option<String>,
    pub quota_cache_ttl_secs: u64,
    pub pricing_cache_ttl_secs: u64,
    pub summary_cache_ttl_secs: u64,
    pub cache_op_timeout_ms: u64,
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let metering = MeteringConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            redis_url: None,
            api_keys: String::new(),
            seed_file: None,
            quota_cache_ttl_secs: metering.quota_cache_ttl.as_secs(),
            pricing_cache_ttl_secs: metering.pricing_cache_ttl.as_secs(),
            summary_cache_ttl_secs: metering.summary_cache_ttl.as_secs(),
            cache_op_timeout_ms: metering.cache_op_timeout.as_millis() as u64,
            log_format: LogFormat::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from `.env` and the environment
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let mut cfg: Self = Config::builder()
            .set_default("host", defaults.host.clone())?
            .set_default("port", i64::from(defaults.port))?
            .set_default("api_keys", defaults.api_keys.clone())?
            .set_default("quota_cache_ttl_secs", defaults.quota_cache_ttl_secs)?
            .set_default("pricing_cache_ttl_secs", defaults.pricing_cache_ttl_secs)?
            .set_default("summary_cache_ttl_secs", defaults.summary_cache_ttl_secs)?
            .set_default("cache_op_timeout_ms", defaults.cache_op_timeout_ms)?
            .set_default("log_format", "pretty")?
            .add_source(Environment::with_prefix("SPENDGATE").try_parsing(true))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        // Platform-assigned port wins
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse::<u16>() {
                cfg.port = p;
            }
        }

        Ok(cfg)
    }

    /// Bind address
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn metering(&self) -> MeteringConfig {
        MeteringConfig {
            quota_cache_ttl: Duration::from_secs(self.quota_cache_ttl_secs),
            pricing_cache_ttl: Duration::from_secs(self.pricing_cache_ttl_secs),
            summary_cache_ttl: Duration::from_secs(self.summary_cache_ttl_secs),
            cache_op_timeout: Duration::from_millis(self.cache_op_timeout_ms),
            ..MeteringConfig::default()
        }
    }
}

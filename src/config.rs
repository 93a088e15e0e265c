//! Configuration management for the address checker.
//!
//! Supports loading from environment variables, config files, and CLI arguments.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest batch the multiaddr endpoint accepts
pub const MAX_BATCH_SIZE: usize = 50;

/// Main checker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Lookup service settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Batching and pacing settings
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the explorer API (mainnet)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// multiaddr endpoint URL
    pub fn multiaddr_url(&self) -> String {
        format!("{}/multiaddr", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Addresses per request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause after each batch before the next request (ms)
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Batches allowed in flight at once
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delay_ms: default_delay_ms(),
            max_concurrent_batches: default_max_concurrent_batches(),
        }
    }
}

impl RateLimitConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

// Default value functions
fn default_base_url() -> String {
    "https://blockchain.info".to_string()
}

fn default_user_agent() -> String {
    format!("btc-multiaddr-checker/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_delay_ms() -> u64 {
    1000 // blockchain.info throttles anonymous clients hard
}

fn default_max_concurrent_batches() -> usize {
    1
}

impl CheckerConfig {
    /// Load configuration from defaults and environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from a TOML config file with environment overrides
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = ::toml::from_str(&contents)?;

        // Environment variables override file settings
        config.apply_env_overrides()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(url) = std::env::var("BLOCKCHAIN_API_URL") {
            self.api.base_url = url;
        }
        if let Ok(size) = std::env::var("BTC_CHECKER_BATCH_SIZE") {
            self.rate_limits.batch_size = size
                .parse()
                .map_err(|e| anyhow::anyhow!("BTC_CHECKER_BATCH_SIZE: {}", e))?;
        }
        if let Ok(delay) = std::env::var("BTC_CHECKER_DELAY_MS") {
            self.rate_limits.delay_ms = delay
                .parse()
                .map_err(|e| anyhow::anyhow!("BTC_CHECKER_DELAY_MS: {}", e))?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rate_limits.batch_size == 0 || self.rate_limits.batch_size > MAX_BATCH_SIZE {
            anyhow::bail!("batch_size must be between 1 and {}", MAX_BATCH_SIZE);
        }
        if self.rate_limits.max_concurrent_batches == 0 {
            anyhow::bail!("max_concurrent_batches must be > 0");
        }
        if self.api.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be > 0");
        }
        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("base_url must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CheckerConfig::default();
        assert_eq!(config.rate_limits.batch_size, 50);
        assert_eq!(config.rate_limits.delay(), Duration::from_secs(1));
        assert_eq!(config.api.request_timeout(), Duration::from_secs(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_batch_size() {
        let mut config = CheckerConfig::default();
        config.rate_limits.batch_size = 0;
        assert!(config.validate().is_err());
        config.rate_limits.batch_size = 51;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout_and_concurrency() {
        let mut config = CheckerConfig::default();
        config.api.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = CheckerConfig::default();
        config.rate_limits.max_concurrent_batches = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CheckerConfig = toml::from_str(
            r#"
            [rate_limits]
            batch_size = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limits.batch_size, 20);
        assert_eq!(config.rate_limits.delay_ms, 1000);
        assert_eq!(config.api.base_url, "https://blockchain.info");
    }

    #[test]
    fn test_multiaddr_url_strips_trailing_slash() {
        let mut config = ApiConfig::default();
        config.base_url = "http://127.0.0.1:8080/".to_string();
        assert_eq!(config.multiaddr_url(), "http://127.0.0.1:8080/multiaddr");
    }
}

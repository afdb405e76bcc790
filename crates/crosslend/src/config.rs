//! runtime configuration
//!
//! loaded once at process start from an optional toml file; every field has a
//! default so an empty file (or none) gives the production parameters.

use crate::{Error, Result, FALLBACK_ETH_USD, FALLBACK_NEAR_USD};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// loan term selection, global for the whole process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermMode {
    /// LOAN_TERM_MONTHS calendar months
    #[default]
    Production,
    /// minutes instead of months, for accelerated-clock test networks
    Accelerated,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LendingConfig {
    pub prices: PriceConfig,
    pub loans: LoanConfig,
    pub linking: LinkConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// how long a fetched snapshot is served without refetching
    pub freshness_secs: u64,
    /// used only when no snapshot was ever fetched
    pub fallback_eth_usd: f64,
    pub fallback_near_usd: f64,
    /// coingecko api base url
    pub coingecko_url: String,
    /// demo api key, sent as x-cg-demo-api-key
    pub coingecko_api_key: Option<String>,
    /// http timeout for one fetch
    pub request_timeout_secs: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            freshness_secs: 120,
            fallback_eth_usd: FALLBACK_ETH_USD,
            fallback_near_usd: FALLBACK_NEAR_USD,
            coingecko_url: "https://api.coingecko.com/api/v3".into(),
            coingecko_api_key: None,
            request_timeout_secs: 10,
        }
    }
}

impl PriceConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoanConfig {
    pub term: TermMode,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// max clock skew of a link proof timestamp, either direction
    pub proof_max_age_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { proof_max_age_secs: 600 }
    }
}

impl LendingConfig {
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prices.fallback_eth_usd <= 0.0 || self.prices.fallback_near_usd <= 0.0 {
            return Err(Error::Config("fallback prices must be positive".into()));
        }
        if self.prices.freshness_secs == 0 {
            return Err(Error::Config("price freshness must be at least one second".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = LendingConfig::from_toml("").unwrap();
        assert_eq!(config, LendingConfig::default());
        assert_eq!(config.loans.term, TermMode::Production);
        assert_eq!(config.prices.freshness(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let config = LendingConfig::from_toml(
            r#"
            [prices]
            freshness_secs = 30
            fallback_near_usd = 3.5

            [loans]
            term = "accelerated"
            "#,
        )
        .unwrap();
        assert_eq!(config.prices.freshness_secs, 30);
        assert_eq!(config.prices.fallback_near_usd, 3.5);
        assert_eq!(config.prices.fallback_eth_usd, FALLBACK_ETH_USD);
        assert_eq!(config.loans.term, TermMode::Accelerated);
        assert_eq!(config.linking.proof_max_age_secs, 600);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(LendingConfig::from_toml("[loans]\nterm = \"weekly\"").is_err());
        let mut config = LendingConfig::default();
        config.prices.fallback_eth_usd = 0.0;
        assert!(config.validate().is_err());
    }
}

//! coingecko simple-price client

use crate::chain::PerChain;
use crate::config::PriceConfig;
use crate::price::PriceFeed;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const ETH_ID: &str = "ethereum";
const NEAR_ID: &str = "near";

#[derive(Clone)]
pub struct CoingeckoFeed {
    url: String,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: Option<f64>,
}

impl CoingeckoFeed {
    pub fn new(config: &PriceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::PriceFeed(e.to_string()))?;

        Ok(Self {
            url: config.coingecko_url.trim_end_matches('/').to_string(),
            api_key: config.coingecko_api_key.clone(),
            client,
        })
    }
}

#[async_trait]
impl PriceFeed for CoingeckoFeed {
    async fn fetch(&self) -> Result<PerChain<f64>> {
        let mut request = self
            .client
            .get(format!("{}/simple/price", self.url))
            .query(&[("ids", "ethereum,near"), ("vs_currencies", "usd")]);
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::PriceFeed(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::PriceFeed(e.to_string()))?;

        let quotes: HashMap<String, UsdQuote> = response
            .json()
            .await
            .map_err(|e| Error::PriceFeed(e.to_string()))?;

        parse_quotes(&quotes)
    }
}

fn parse_quotes(quotes: &HashMap<String, UsdQuote>) -> Result<PerChain<f64>> {
    let usd = |id: &str| {
        quotes
            .get(id)
            .and_then(|q| q.usd)
            .ok_or_else(|| Error::PriceFeed(format!("no usd quote for {}", id)))
    };
    Ok(PerChain::new(usd(ETH_ID)?, usd(NEAR_ID)?))
}

//! usd price cache with bounded staleness
//!
//! one shared snapshot slot, replaced wholesale on refresh. callers never see
//! a feed failure: they get the last good snapshot, or the configured
//! fallback when nothing was ever fetched.

use crate::chain::{Amount, Chain, PerChain};
use crate::config::PriceConfig;
use crate::{Error, Result, COLLATERAL_RATIO};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// usd price per whole token, per chain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub eth: f64,
    pub near: f64,
    pub last_updated: DateTime<Utc>,
}

impl PriceSnapshot {
    pub fn new(prices: PerChain<f64>, last_updated: DateTime<Utc>) -> Self {
        Self {
            eth: prices.eth,
            near: prices.near,
            last_updated,
        }
    }

    pub fn price(&self, chain: Chain) -> f64 {
        match chain {
            Chain::Eth => self.eth,
            Chain::Near => self.near,
        }
    }

    /// usd value of `amount` minor units
    pub fn usd_value(&self, chain: Chain, amount: Amount) -> f64 {
        chain.to_tokens(amount) * self.price(chain)
    }
}

/// external price source
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch(&self) -> Result<PerChain<f64>>;
}

/// fixed prices, switchable to failing; used for replays and tests
#[derive(Default)]
pub struct StaticFeed {
    prices: RwLock<Option<PerChain<f64>>>,
    fetches: AtomicUsize,
}

impl StaticFeed {
    pub fn new(eth: f64, near: f64) -> Self {
        Self {
            prices: RwLock::new(Some(PerChain::new(eth, near))),
            fetches: AtomicUsize::new(0),
        }
    }

    /// a feed whose every fetch fails
    pub fn failing() -> Self {
        Self::default()
    }

    /// replace the served prices; `None` makes fetches fail
    pub async fn set(&self, prices: Option<PerChain<f64>>) {
        *self.prices.write().await = prices;
    }

    /// number of fetch calls so far
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PriceFeed for StaticFeed {
    async fn fetch(&self) -> Result<PerChain<f64>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let prices = *self.prices.read().await;
        prices.ok_or_else(|| Error::PriceFeed("static feed disabled".into()))
    }
}

struct Cached {
    snapshot: PriceSnapshot,
    fetched_at: Instant,
}

pub struct PriceCache {
    feed: Arc<dyn PriceFeed>,
    freshness: Duration,
    fallback: PerChain<f64>,
    slot: RwLock<Option<Cached>>,
}

impl PriceCache {
    pub fn new(feed: Arc<dyn PriceFeed>, config: &PriceConfig) -> Self {
        Self {
            feed,
            freshness: config.freshness(),
            fallback: PerChain::new(config.fallback_eth_usd, config.fallback_near_usd),
            slot: RwLock::new(None),
        }
    }

    /// current prices; refreshes when the cached snapshot is stale
    pub async fn current(&self) -> PriceSnapshot {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if cached.fetched_at.elapsed() < self.freshness {
                    return cached.snapshot.clone();
                }
            }
        }

        match self.feed.fetch().await.and_then(check_prices) {
            Ok(prices) => {
                let snapshot = PriceSnapshot::new(prices, Utc::now());
                debug!("prices refreshed: eth=${} near=${}", snapshot.eth, snapshot.near);
                *self.slot.write().await = Some(Cached {
                    snapshot: snapshot.clone(),
                    fetched_at: Instant::now(),
                });
                snapshot
            }
            Err(e) => {
                warn!("price refresh failed: {}", e);
                if let Some(cached) = self.slot.read().await.as_ref() {
                    return cached.snapshot.clone();
                }
                PriceSnapshot::new(self.fallback, Utc::now())
            }
        }
    }
}

fn check_prices(prices: PerChain<f64>) -> Result<PerChain<f64>> {
    for chain in Chain::ALL {
        let p = prices[chain];
        if !p.is_finite() || p <= 0.0 {
            return Err(Error::PriceFeed(format!("unusable {} price {}", chain, p)));
        }
    }
    Ok(prices)
}

/// usd that may be borrowed against collateral worth `collateral_usd`
pub fn max_borrowable_usd(collateral_usd: f64) -> f64 {
    collateral_usd * (COLLATERAL_RATIO as f64 / 100.0)
}

/// tokens of `chain` that `usd` buys at current prices
pub fn borrowable_tokens(usd: f64, chain: Chain, prices: &PriceSnapshot) -> f64 {
    usd / prices.price(chain)
}

/// borrowing capacity over loan value; >= 1 is safe
pub fn health_factor(collateral_usd: f64, loan_usd: f64) -> f64 {
    if loan_usd == 0.0 {
        return f64::INFINITY;
    }
    max_borrowable_usd(collateral_usd) / loan_usd
}

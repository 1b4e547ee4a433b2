//! REST fallback for either symbol.
//!
//! On-demand lookups with a 10 s deadline, plus a background poller that
//! only fires while a live source is stale so quota stays untouched in the
//! healthy path.

use crate::error_service::ErrorService;
use crate::feeds::{FeedSource, PriceAggregator, SYMBOL_USDT_BRL, SYMBOL_USD_BRL};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

const SOURCE: &str = "rest_fallback";
const POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
}

#[derive(Clone)]
pub struct MarketRestClient {
    client: reqwest::Client,
    base_url: String,
}

impl MarketRestClient {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build market REST client")?;
        Ok(Self { client, base_url })
    }

    /// Spot price for a symbol (`USDTBRL`, `USDBRL`).
    pub async fn fetch_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let response: TickerResponse = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let price: f64 = response
            .price
            .parse()
            .with_context(|| format!("unparseable price {:?}", response.price))?;
        Ok(price)
    }
}

pub struct RestFallbackPoller {
    client: MarketRestClient,
    aggregator: Arc<PriceAggregator>,
    errors: Arc<ErrorService>,
    stale_threshold_ms: i64,
}

impl RestFallbackPoller {
    pub fn new(
        client: MarketRestClient,
        aggregator: Arc<PriceAggregator>,
        errors: Arc<ErrorService>,
        stale_threshold_ms: i64,
    ) -> Self {
        Self {
            client,
            aggregator,
            errors,
            stale_threshold_ms,
        }
    }

    fn live_is_stale(&self, source: FeedSource) -> bool {
        match self.aggregator.newest_age_ms(source) {
            Some(age) => age > self.stale_threshold_ms,
            None => true,
        }
    }

    async fn poll_symbol(&self, symbol: &str) {
        match self.client.fetch_price(symbol).await {
            Ok(price) => {
                self.aggregator
                    .record_sample(FeedSource::RestFallback, symbol, price, None, None);
                self.errors.record_success(SOURCE);
            }
            Err(e) => {
                warn!(symbol, error = %e, "REST fallback fetch failed");
                self.errors.record_failure(SOURCE, "fetch failed");
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return,
            }

            if self.live_is_stale(FeedSource::StreamA) {
                self.poll_symbol(SYMBOL_USDT_BRL).await;
            } else {
                debug!("stream A fresh, skipping REST poll");
            }

            if self.live_is_stale(FeedSource::StreamB) {
                self.poll_symbol(SYMBOL_USD_BRL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NullNotifier;
    use crate::status::BotStatus;
    use crate::storage::bronze::BronzeSink;

    #[test]
    fn stale_detection_without_samples() {
        let agg = PriceAggregator::new(120_000, BronzeSink::new());
        let errors = ErrorService::new(BotStatus::new(), Arc::new(NullNotifier));
        let client = MarketRestClient::new("http://localhost:0".into()).unwrap();
        let poller = RestFallbackPoller::new(client, agg.clone(), errors, 120_000);

        assert!(poller.live_is_stale(FeedSource::StreamA));
        agg.record_sample(FeedSource::StreamA, SYMBOL_USDT_BRL, 5.2, None, None);
        assert!(!poller.live_is_stale(FeedSource::StreamA));
    }
}

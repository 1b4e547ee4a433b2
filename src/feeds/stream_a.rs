//! Live USDT/BRL stream (primary crypto rate).
//!
//! Consumes Binance spot L1 books through `barter-data` and folds the mid
//! into the aggregator. The stream layer reconnects on its own; if the
//! whole stream ends we rebuild it under exponential backoff (2 s doubling
//! to a 30 s cap).

use crate::error_service::{ErrorService, HealthProbe};
use crate::feeds::{FeedSource, PriceAggregator, SYMBOL_USDT_BRL};
use anyhow::{Context, Result};
use async_trait::async_trait;
use barter_data::{
    exchange::binance::spot::BinanceSpot,
    streams::{reconnect::Event as ReconnectEvent, Streams},
    subscription::book::OrderBooksL1,
};
use barter_instrument::instrument::market_data::{
    kind::MarketDataInstrumentKind, MarketDataInstrument,
};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const SOURCE: &str = "stream_a";
const BACKOFF_START: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

type BookStream = Streams<
    barter_data::streams::consumer::MarketStreamResult<
        MarketDataInstrument,
        barter_data::subscription::book::OrderBookL1,
    >,
>;

pub struct StreamASupervisor {
    aggregator: Arc<PriceAggregator>,
    errors: Arc<ErrorService>,
}

impl StreamASupervisor {
    pub fn new(aggregator: Arc<PriceAggregator>, errors: Arc<ErrorService>) -> Self {
        Self { aggregator, errors }
    }

    /// Supervision loop; runs until shutdown is signalled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = BACKOFF_START;
        loop {
            if *shutdown.borrow() {
                return;
            }

            // NOTE: the `StreamBuilder` futures are `!Send`, so streams are
            // initialised here rather than inside a spawned task.
            match init_streams().await {
                Ok(streams) => {
                    info!("📡 USDT/BRL stream connected");
                    backoff = BACKOFF_START;
                    tokio::select! {
                        _ = self.consume(streams) => {
                            warn!("USDT/BRL stream ended, rebuilding");
                            self.errors.record_failure(SOURCE, "stream ended");
                        }
                        _ = shutdown.changed() => return,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "USDT/BRL stream init failed");
                    self.errors.record_failure(SOURCE, "stream init failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => return,
            }
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    async fn consume(&self, streams: BookStream) {
        let mut joined = streams.select_all();
        while let Some(event) = joined.next().await {
            match event {
                ReconnectEvent::Reconnecting(exchange) => {
                    warn!(?exchange, "USDT/BRL stream reconnecting");
                    self.errors.record_failure(SOURCE, "reconnecting");
                }
                ReconnectEvent::Item(Ok(market_event)) => {
                    let Some(mid) = market_event
                        .kind
                        .mid_price()
                        .and_then(|d| d.to_string().parse::<f64>().ok())
                        .filter(|m| m.is_finite() && *m > 0.0)
                    else {
                        continue;
                    };

                    self.aggregator.record_sample(
                        FeedSource::StreamA,
                        SYMBOL_USDT_BRL,
                        mid,
                        None,
                        None,
                    );
                    self.errors.record_success(SOURCE);
                }
                ReconnectEvent::Item(Err(e)) => {
                    debug!(error = %e, "USDT/BRL market stream error");
                }
            }
        }
    }
}

async fn init_streams() -> Result<BookStream> {
    Streams::<OrderBooksL1>::builder()
        .subscribe([(
            BinanceSpot::default(),
            "usdt",
            "brl",
            MarketDataInstrumentKind::Spot,
            OrderBooksL1,
        )])
        .init()
        .await
        .context("failed to init usdt/brl book stream")
}

/// Recovery probe: the source is healthy when its newest sample is fresh.
pub struct FreshnessProbe {
    aggregator: Arc<PriceAggregator>,
    source: FeedSource,
    max_age_ms: i64,
}

impl FreshnessProbe {
    pub fn new(aggregator: Arc<PriceAggregator>, source: FeedSource, max_age_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            aggregator,
            source,
            max_age_ms,
        })
    }
}

#[async_trait]
impl HealthProbe for FreshnessProbe {
    async fn probe(&self) -> bool {
        match self.aggregator.newest_age_ms(self.source) {
            Some(age) => age <= self.max_age_ms,
            None => false,
        }
    }
}

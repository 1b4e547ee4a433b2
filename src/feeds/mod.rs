//! Upstream price acquisition.
//!
//! Three sources feed one latest-price view: a live Binance USDT/BRL
//! stream, the scraped commercial-dollar page title, and a REST fallback
//! for either symbol. Reads are in-memory and nonblocking; every accepted
//! sample goes to the bronze sink fire-and-forget.

pub mod rest;
pub mod scraper;
pub mod stream_a;

use crate::models::{PriceSample, PricingSource};
use crate::storage::bronze::{BronzeEvent, BronzeSink};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub const SYMBOL_USDT_BRL: &str = "USDTBRL";
pub const SYMBOL_USD_BRL: &str = "USDBRL";

/// Feed identity, semantic not vendor-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedSource {
    StreamA,
    StreamB,
    RestFallback,
}

impl FeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSource::StreamA => "stream_a",
            FeedSource::StreamB => "stream_b",
            FeedSource::RestFallback => "rest_fallback",
        }
    }
}

/// What a pricing source resolves to on the feed side.
pub fn feed_for(source: PricingSource) -> (FeedSource, &'static str) {
    match source {
        PricingSource::Binance => (FeedSource::StreamA, SYMBOL_USDT_BRL),
        PricingSource::Tradingview => (FeedSource::StreamB, SYMBOL_USD_BRL),
        PricingSource::Commercial => (FeedSource::RestFallback, SYMBOL_USD_BRL),
    }
}

/// Plausibility band per symbol; samples outside are rejected.
fn plausibility_band(symbol: &str) -> (f64, f64) {
    match symbol {
        SYMBOL_USD_BRL | SYMBOL_USDT_BRL => (3.0, 10.0),
        _ => (f64::MIN_POSITIVE, f64::MAX),
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    price: f64,
    bid: Option<f64>,
    ask: Option<f64>,
    captured_at: DateTime<Utc>,
}

/// Nonblocking read result.
#[derive(Debug, Clone, Copy)]
pub struct PriceView {
    pub price: f64,
    pub age_ms: i64,
    pub stale: bool,
}

/// Tick broadcast to reactive consumers (volatility monitor).
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub source: FeedSource,
    pub symbol: String,
    pub price: f64,
    pub captured_at: DateTime<Utc>,
}

/// Latest-price view over all sources.
pub struct PriceAggregator {
    inner: RwLock<HashMap<(FeedSource, String), Sample>>,
    stale_threshold_ms: i64,
    rejected: AtomicU64,
    sink: BronzeSink,
    tick_tx: broadcast::Sender<PriceTick>,
}

impl PriceAggregator {
    pub fn new(stale_threshold_ms: i64, sink: BronzeSink) -> Arc<Self> {
        let (tick_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            inner: RwLock::new(HashMap::new()),
            stale_threshold_ms,
            rejected: AtomicU64::new(0),
            sink,
            tick_tx,
        })
    }

    /// Subscribe to accepted samples.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceTick> {
        self.tick_tx.subscribe()
    }

    /// Record an upstream sample. Rejects values outside the symbol's
    /// plausibility band; accepted samples update the latest view, feed
    /// the bronze sink, and fan out to subscribers.
    pub fn record_sample(
        &self,
        source: FeedSource,
        symbol: &str,
        price: f64,
        bid: Option<f64>,
        ask: Option<f64>,
    ) {
        let (lo, hi) = plausibility_band(symbol);
        if !price.is_finite() || price < lo || price > hi {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(source = source.as_str(), symbol, price, "price sample outside plausibility band");
            return;
        }

        let captured_at = Utc::now();
        {
            let mut map = self.inner.write();
            let entry = map.entry((source, symbol.to_string())).or_insert(Sample {
                price,
                bid,
                ask,
                captured_at,
            });
            // Monotonic: never move the timestamp backwards.
            if captured_at >= entry.captured_at {
                *entry = Sample {
                    price,
                    bid,
                    ask,
                    captured_at,
                };
            }
        }

        self.sink.emit(BronzeEvent::PriceTick(PriceSample {
            source: source.as_str(),
            symbol: symbol.to_string(),
            price,
            bid,
            ask,
            captured_at,
        }));

        let tick = PriceTick {
            source,
            symbol: symbol.to_string(),
            price,
            captured_at,
        };
        if self.tick_tx.send(tick).is_err() {
            debug!(symbol, "no active price tick receivers");
        }
    }

    /// Latest price for a (source, symbol). Never blocks, never errors;
    /// `None` only if the source never produced a sample. The caller
    /// decides whether a stale price is acceptable.
    pub fn get_price(&self, source: FeedSource, symbol: &str) -> Option<PriceView> {
        let map = self.inner.read();
        let sample = map.get(&(source, symbol.to_string()))?;
        let age_ms = (Utc::now() - sample.captured_at).num_milliseconds();
        Some(PriceView {
            price: sample.price,
            age_ms,
            stale: age_ms > self.stale_threshold_ms,
        })
    }

    /// Age of the newest sample for a source across symbols; watchdogs use
    /// this for frozen detection.
    pub fn newest_age_ms(&self, source: FeedSource) -> Option<i64> {
        let map = self.inner.read();
        let newest = map
            .iter()
            .filter(|((s, _), _)| *s == source)
            .map(|(_, sample)| sample.captured_at)
            .max()?;
        Some((Utc::now() - newest).num_milliseconds())
    }

    /// Resolve a fresh mid for a pricing source: the mapped feed first,
    /// then the REST fallback for the same symbol.
    pub fn resolve_mid(&self, source: PricingSource) -> Option<PriceView> {
        let (feed, symbol) = feed_for(source);
        match self.get_price(feed, symbol) {
            Some(view) if !view.stale => Some(view),
            primary => {
                let fallback = self.get_price(FeedSource::RestFallback, symbol);
                match fallback {
                    Some(view) if !view.stale => Some(view),
                    // Nothing fresh anywhere: surface whichever exists so
                    // the caller can see (and refuse) the staleness.
                    Some(view) => Some(primary.unwrap_or(view)),
                    None => primary,
                }
            }
        }
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

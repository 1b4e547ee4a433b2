//! Fire-and-forget bronze sink.
//!
//! Price ticks and deal events are buffered in a bounded queue and drained
//! by one background worker. Enqueue never blocks the hot path: on
//! overflow the oldest event is dropped and counted. Write failures only
//! log.

use crate::models::PriceSample;
use crate::storage::Store;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

const QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub enum BronzeEvent {
    PriceTick(PriceSample),
    DealEvent {
        deal_id: String,
        group_jid: String,
        client_jid: String,
        from_state: Option<String>,
        to_state: String,
        event_type: String,
        market_price: Option<String>,
        deal_snapshot: String,
        metadata: String,
        created_at: DateTime<Utc>,
    },
}

/// Shared producer handle; clone freely.
#[derive(Clone)]
pub struct BronzeSink {
    queue: Arc<Mutex<VecDeque<BronzeEvent>>>,
    notify: Arc<Notify>,
    dropped: Arc<AtomicU64>,
}

impl BronzeSink {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(256))),
            notify: Arc::new(Notify::new()),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue without blocking; oldest event is evicted on overflow.
    pub fn emit(&self, event: BronzeEvent) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= QUEUE_CAPACITY {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn drain_batch(&self, max: usize) -> Vec<BronzeEvent> {
        let mut queue = self.queue.lock();
        let take = queue.len().min(max);
        queue.drain(..take).collect()
    }

    /// Drain loop; runs until the process exits.
    pub async fn run_drain_worker(self, store: Store) {
        loop {
            let batch = self.drain_batch(256);
            if batch.is_empty() {
                self.notify.notified().await;
                continue;
            }
            for event in batch {
                if let Err(e) = write_event(&store, &event) {
                    warn!(error = %e, "bronze sink write failed");
                }
            }
        }
    }

    /// Synchronous flush used by tests and shutdown.
    pub fn flush_to(&self, store: &Store) -> usize {
        let batch = self.drain_batch(usize::MAX);
        let mut written = 0usize;
        for event in batch {
            match write_event(store, &event) {
                Ok(()) => written += 1,
                Err(e) => debug!(error = %e, "bronze flush write failed"),
            }
        }
        written
    }
}

impl Default for BronzeSink {
    fn default() -> Self {
        Self::new()
    }
}

fn write_event(store: &Store, event: &BronzeEvent) -> crate::errors::BotResult<()> {
    match event {
        BronzeEvent::PriceTick(sample) => store.insert_price_tick(
            sample.source,
            &sample.symbol,
            sample.price,
            sample.bid,
            sample.ask,
            sample.captured_at,
        ),
        BronzeEvent::DealEvent {
            deal_id,
            group_jid,
            client_jid,
            from_state,
            to_state,
            event_type,
            market_price,
            deal_snapshot,
            metadata,
            created_at,
        } => store.insert_deal_event(
            deal_id,
            group_jid,
            client_jid,
            from_state.as_deref(),
            to_state,
            event_type,
            market_price.as_deref(),
            deal_snapshot,
            metadata,
            *created_at,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str) -> BronzeEvent {
        BronzeEvent::PriceTick(PriceSample {
            source: "binance",
            symbol: symbol.to_string(),
            price: 5.20,
            bid: Some(5.19),
            ask: Some(5.21),
            captured_at: Utc::now(),
        })
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let sink = BronzeSink::new();
        for i in 0..(QUEUE_CAPACITY + 10) {
            sink.emit(tick(&format!("S{i}")));
        }
        assert_eq!(sink.dropped_count(), 10);

        let store = Store::open_in_memory().unwrap();
        let written = sink.flush_to(&store);
        assert_eq!(written, QUEUE_CAPACITY);
    }

    #[test]
    fn flush_writes_to_store() {
        let sink = BronzeSink::new();
        sink.emit(tick("USDTBRL"));
        sink.emit(BronzeEvent::DealEvent {
            deal_id: "d1".into(),
            group_jid: "g1".into(),
            client_jid: "c1".into(),
            from_state: None,
            to_state: "quoted".into(),
            event_type: "created".into(),
            market_price: Some("5.20".into()),
            deal_snapshot: "{}".into(),
            metadata: "{}".into(),
            created_at: Utc::now(),
        });

        let store = Store::open_in_memory().unwrap();
        assert_eq!(sink.flush_to(&store), 2);
    }
}

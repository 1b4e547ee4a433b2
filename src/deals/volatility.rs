//! Volatility-aware repricing.
//!
//! Listens to aggregator ticks. For each quoted deal priced off the
//! ticking source, a drift at or past the group's threshold triggers a
//! reprice (announced in the group) until the per-deal cap, after which
//! the engine escalates to the operator. Locked deals are never touched.

use crate::deals::engine::DealEngine;
use crate::feeds::{PriceAggregator, PriceTick};
use crate::models::Deal;
use crate::observability::Counters;
use crate::pricing::format_rate;
use crate::storage::gateway::Gateway;
use crate::suppression::{ResponseClass, SuppressionGuard};
use crate::transport::{SendOptions, Transport};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Drift between the quote-time base and the current mid, in basis points.
pub fn drift_bps(base_rate: Decimal, current_mid: f64) -> Option<Decimal> {
    if base_rate <= Decimal::ZERO {
        return None;
    }
    let mid = Decimal::from_f64(current_mid)?;
    Some(((mid - base_rate).abs() / base_rate) * Decimal::from(10_000))
}

pub struct VolatilityMonitor {
    engine: Arc<DealEngine>,
    gateway: Arc<Gateway>,
    aggregator: Arc<PriceAggregator>,
    transport: Arc<dyn Transport>,
    suppression: Arc<SuppressionGuard>,
    counters: Arc<Counters>,
}

impl VolatilityMonitor {
    pub fn new(
        engine: Arc<DealEngine>,
        gateway: Arc<Gateway>,
        aggregator: Arc<PriceAggregator>,
        transport: Arc<dyn Transport>,
        suppression: Arc<SuppressionGuard>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            engine,
            gateway,
            aggregator,
            transport,
            suppression,
            counters,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("📈 volatility monitor started");
        let mut ticks = self.aggregator.subscribe();
        loop {
            let tick = tokio::select! {
                tick = ticks.recv() => tick,
                _ = shutdown.changed() => return,
            };
            let tick = match tick {
                Ok(tick) => tick,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "volatility monitor lagged behind ticks");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            };
            if let Err(e) = self.on_tick(&tick).await {
                warn!(error = %e, "volatility tick handling failed");
            }
        }
    }

    pub async fn on_tick(&self, tick: &PriceTick) -> crate::errors::BotResult<()> {
        for pricing_source in DealEngine::sources_for_tick(tick.source) {
            let deals = self.engine.quoted_deals_for_source(pricing_source)?;
            for deal in deals {
                self.consider(&deal, tick.price).await;
            }
        }
        Ok(())
    }

    async fn consider(&self, deal: &Deal, current_mid: f64) {
        let policy = match self.gateway.config_for(&deal.group_jid) {
            Ok(config) => config.volatility,
            Err(e) => {
                warn!(group = %deal.group_jid, error = %e, "config read failed");
                return;
            }
        };
        if !policy.enabled {
            return;
        }

        let Some(drift) = drift_bps(deal.base_rate, current_mid) else {
            return;
        };
        if drift < Decimal::from(policy.threshold_bps) {
            return;
        }

        match self
            .engine
            .reprice_with_mid(&deal.id, current_mid, &policy)
            .await
        {
            Ok(outcome) if outcome.changed() => {
                Counters::bump(&self.counters.deals_repriced);
                let text = format!(
                    "♻️ Preço atualizado: R$ {}",
                    format_rate(outcome.deal.quoted_rate)
                );
                if self
                    .suppression
                    .should_suppress(&deal.group_jid, ResponseClass::Quote)
                {
                    debug!(deal = %deal.id, "reprice announcement suppressed");
                    return;
                }
                let receipt = self
                    .transport
                    .send(&deal.group_jid, &text, SendOptions::default())
                    .await;
                if receipt.ok {
                    self.suppression
                        .record_response(&deal.group_jid, ResponseClass::Quote);
                }
            }
            Ok(outcome) => {
                if outcome.reason == "escalated" {
                    Counters::bump(&self.counters.deals_escalated);
                }
            }
            Err(e) => warn!(deal = %deal.id, error = %e, "reprice failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deals::engine::QuoteOutcome;
    use crate::models::DealState;
    use crate::notifier::NullNotifier;
    use crate::rules::SpreadResolver;
    use crate::storage::bronze::BronzeSink;
    use crate::storage::Store;
    use crate::transport::InMemoryTransport;
    use rust_decimal_macros::dec;

    #[test]
    fn drift_is_symmetric_in_bps() {
        // 5.20 -> 5.2208 is 40bps.
        let up = drift_bps(dec!(5.20), 5.2208).unwrap();
        assert_eq!(up, dec!(40));
        let down = drift_bps(dec!(5.20), 5.1792).unwrap();
        assert_eq!(down, dec!(40));
    }

    #[test]
    fn drift_rejects_degenerate_base() {
        assert!(drift_bps(dec!(0), 5.20).is_none());
    }

    #[tokio::test]
    async fn tick_past_threshold_reprices_and_announces() {
        let gateway = Gateway::new(Store::open_in_memory().unwrap());
        let sink = BronzeSink::new();
        let aggregator = PriceAggregator::new(120_000, sink.clone());
        aggregator.record_sample(
            crate::feeds::FeedSource::StreamA,
            crate::feeds::SYMBOL_USDT_BRL,
            5.20,
            None,
            None,
        );
        let resolver = SpreadResolver::new(gateway.clone());
        let engine = DealEngine::new(
            gateway.clone(),
            aggregator.clone(),
            resolver,
            sink,
            Arc::new(NullNotifier),
        );
        let transport = InMemoryTransport::new();
        let monitor = VolatilityMonitor::new(
            engine.clone(),
            gateway.clone(),
            aggregator,
            transport.clone(),
            Arc::new(crate::suppression::SuppressionGuard::new()),
            Counters::new(),
        );

        let QuoteOutcome::Created(deal) = engine.quote("g1", "c1", None, None).await.unwrap()
        else {
            panic!()
        };

        // 10bps drift: below the default 30bps threshold, no reprice.
        monitor
            .on_tick(&PriceTick {
                source: crate::feeds::FeedSource::StreamA,
                symbol: crate::feeds::SYMBOL_USDT_BRL.into(),
                price: 5.2052,
                captured_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(engine.get(&deal.id).unwrap().unwrap().reprice_count, 0);

        // 40bps drift reprices and announces to the group.
        monitor
            .on_tick(&PriceTick {
                source: crate::feeds::FeedSource::StreamA,
                symbol: crate::feeds::SYMBOL_USDT_BRL.into(),
                price: 5.2208,
                captured_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let updated = engine.get(&deal.id).unwrap().unwrap();
        assert_eq!(updated.reprice_count, 1);
        assert_eq!(updated.base_rate, dec!(5.2208));
        assert_eq!(updated.state, DealState::Quoted);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("Preço atualizado"));
    }
}

//! Deal lifecycle engine.
//!
//! Sole writer of deal rows. Operations serialize per (group, client)
//! through striped async locks with a bounded 100 ms acquisition; storage
//! writes are compare-and-set on the previous state, and terminal deals
//! archive to history in the same logical step. Operations against
//! unreachable states return the current deal with a reason code instead
//! of erroring.

use crate::errors::{BotError, BotResult};
use crate::feeds::PriceAggregator;
use crate::models::{Currency, Deal, DealSide, DealState, PricingSource, VolatilityPolicy};
use crate::notifier::ControlNotify;
use crate::pricing::{apply_spread, brl_from_usdt, usdt_from_brl};
use crate::rules::SpreadResolver;
use crate::storage::bronze::{BronzeEvent, BronzeSink};
use crate::storage::gateway::Gateway;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LOCK_STRIPES: usize = 64;
const LOCK_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_EXTEND_PER_CALL_SECS: i64 = 3600;

/// Outcome of a quote request.
#[derive(Debug, Clone)]
pub enum QuoteOutcome {
    Created(Deal),
    /// The pair already has an active deal; returned unchanged.
    Conflict(Deal),
}

/// Outcome of a lifecycle operation.
#[derive(Debug, Clone)]
pub struct DealOutcome {
    pub deal: Deal,
    /// `"ok"` or a no-op reason (`"already_terminal"`, `"expired"`, ...).
    pub reason: &'static str,
}

impl DealOutcome {
    fn ok(deal: Deal) -> Self {
        Self { deal, reason: "ok" }
    }

    fn noop(deal: Deal, reason: &'static str) -> Self {
        Self { deal, reason }
    }

    pub fn changed(&self) -> bool {
        self.reason == "ok"
    }
}

pub struct DealEngine {
    gateway: Arc<Gateway>,
    aggregator: Arc<PriceAggregator>,
    resolver: Arc<SpreadResolver>,
    sink: BronzeSink,
    notifier: Arc<dyn ControlNotify>,
    locks: Vec<tokio::sync::Mutex<()>>,
    /// In-memory at-most-one guard, updated under the pair lock; the
    /// store's unique partial index is the second line of defense.
    active_pairs: Mutex<HashSet<(String, String)>>,
}

impl DealEngine {
    pub fn new(
        gateway: Arc<Gateway>,
        aggregator: Arc<PriceAggregator>,
        resolver: Arc<SpreadResolver>,
        sink: BronzeSink,
        notifier: Arc<dyn ControlNotify>,
    ) -> Arc<Self> {
        let locks = (0..LOCK_STRIPES)
            .map(|_| tokio::sync::Mutex::new(()))
            .collect();
        Arc::new(Self {
            gateway,
            aggregator,
            resolver,
            sink,
            notifier,
            locks,
            active_pairs: Mutex::new(HashSet::new()),
        })
    }

    fn stripe(&self, group_jid: &str, client_jid: &str) -> &tokio::sync::Mutex<()> {
        let mut hasher = DefaultHasher::new();
        group_jid.hash(&mut hasher);
        client_jid.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % LOCK_STRIPES;
        &self.locks[idx]
    }

    async fn acquire(
        &self,
        group_jid: &str,
        client_jid: &str,
    ) -> BotResult<tokio::sync::MutexGuard<'_, ()>> {
        tokio::time::timeout(LOCK_TIMEOUT, self.stripe(group_jid, client_jid).lock())
            .await
            .map_err(|_| BotError::Busy("deal lock acquisition timed out".into()))
    }

    /// Read accessor other components use (the engine owns all writes).
    pub fn active_deal_for(&self, group_jid: &str, client_jid: &str) -> BotResult<Option<Deal>> {
        self.gateway.store().get_active_deal(group_jid, client_jid)
    }

    /// Quoted deals priced off a source; the volatility monitor's feed.
    pub fn quoted_deals_for_source(&self, source: PricingSource) -> BotResult<Vec<Deal>> {
        self.gateway.store().quoted_deals_for_source(source)
    }

    pub fn get(&self, deal_id: &str) -> BotResult<Option<Deal>> {
        self.gateway.store().get_deal(deal_id)
    }

    /// Resolve a deal id to its live row, or to an `already_terminal`
    /// no-op when it was archived; unknown ids are `not_found`.
    fn read_live(&self, deal_id: &str) -> BotResult<Result<Deal, DealOutcome>> {
        if let Some(deal) = self.get(deal_id)? {
            return Ok(Ok(deal));
        }
        if let Some(archived) = self.gateway.store().get_history_deal(deal_id)? {
            return Ok(Err(DealOutcome::noop(archived, "already_terminal")));
        }
        Err(BotError::not_found(format!("deal {deal_id}")))
    }

    // ------------------------------------------------------------------
    // quote

    /// Open a new quoted deal. Requires a fresh price for the resolved
    /// source; an existing active deal for the pair is returned as
    /// `Conflict` unchanged.
    pub async fn quote(
        &self,
        group_jid: &str,
        client_jid: &str,
        side: Option<DealSide>,
        amount_hint: Option<(Decimal, Currency)>,
    ) -> BotResult<QuoteOutcome> {
        let _guard = self.acquire(group_jid, client_jid).await?;

        // Fast-path guard, then the store (authoritative across restarts).
        let pair = (group_jid.to_string(), client_jid.to_string());
        if self.active_pairs.lock().contains(&pair) {
            if let Some(existing) = self.active_deal_for(group_jid, client_jid)? {
                return Ok(QuoteOutcome::Conflict(existing));
            }
            self.active_pairs.lock().remove(&pair);
        }
        if let Some(existing) = self.active_deal_for(group_jid, client_jid)? {
            return Ok(QuoteOutcome::Conflict(existing));
        }

        let now = Utc::now();
        let snapshot = self.resolver.resolve(group_jid, now)?;
        let side = side.unwrap_or(snapshot.default_side);

        let view = self
            .aggregator
            .resolve_mid(snapshot.pricing_source)
            .filter(|v| !v.stale)
            .ok_or_else(|| {
                BotError::Transient(format!(
                    "no fresh price for {}",
                    snapshot.pricing_source.as_str()
                ))
            })?;
        let base_rate = Decimal::from_f64(view.price)
            .ok_or_else(|| BotError::Fatal(format!("unrepresentable mid {}", view.price)))?
            .trunc_with_scale(4);

        let quoted_rate = apply_spread(
            base_rate,
            side,
            snapshot.spread_mode,
            snapshot.sell_spread,
            snapshot.buy_spread,
        );

        let mut deal = Deal {
            id: Uuid::new_v4().to_string(),
            group_jid: group_jid.to_string(),
            client_jid: client_jid.to_string(),
            state: DealState::Quoted,
            side,
            base_rate,
            quoted_rate,
            locked_rate: None,
            locked_at: None,
            amount_brl: None,
            amount_usdt: None,
            ttl_expires_at: now + ChronoDuration::seconds(snapshot.quote_ttl_seconds as i64),
            rule_id_used: snapshot.rule_id,
            rule_name: snapshot.rule_name.clone(),
            pricing_source: snapshot.pricing_source,
            spread_mode: snapshot.spread_mode,
            sell_spread: snapshot.sell_spread,
            buy_spread: snapshot.buy_spread,
            reprice_count: 0,
            metadata: serde_json::json!({
                "original_ttl_seconds": snapshot.quote_ttl_seconds,
                "extended_total_seconds": 0,
            }),
            created_at: now,
            updated_at: now,
        };

        if let Some((value, currency)) = amount_hint {
            Self::fill_amounts(&mut deal, value, currency);
        }

        match self.gateway.store().insert_deal(&deal) {
            Ok(()) => {}
            Err(BotError::Conflict(_)) => {
                // Lost a race with another writer; surface their deal.
                if let Some(existing) = self.active_deal_for(group_jid, client_jid)? {
                    return Ok(QuoteOutcome::Conflict(existing));
                }
                return Err(BotError::conflict("active deal vanished during quote"));
            }
            Err(e) => return Err(e),
        }

        self.active_pairs.lock().insert(pair);

        self.emit_event(&deal, None, "created", Some(view.price));
        info!(
            deal = %deal.id,
            group = group_jid,
            client = client_jid,
            base = %base_rate,
            quoted = %quoted_rate,
            "💬 quote opened"
        );
        Ok(QuoteOutcome::Created(deal))
    }

    // ------------------------------------------------------------------
    // lock

    pub async fn lock(&self, deal_id: &str) -> BotResult<DealOutcome> {
        let deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        let _guard = self.acquire(&deal.group_jid, &deal.client_jid).await?;

        // Re-read under the lock.
        let mut deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };

        if deal.state == DealState::Locked {
            return Ok(DealOutcome::noop(deal, "already_locked"));
        }
        if deal.state.is_terminal() {
            return Ok(DealOutcome::noop(deal, "already_terminal"));
        }

        let now = Utc::now();
        if now >= deal.ttl_expires_at {
            // Lookup-observed expiry: never lock a stale quote.
            let expired = self.expire_under_lock(deal).await?;
            return Ok(DealOutcome::noop(expired, "expired"));
        }
        if deal.state != DealState::Quoted {
            return Ok(DealOutcome::noop(deal, "not_quotable"));
        }

        let prev = deal.state;
        deal.state = DealState::Locked;
        deal.locked_rate = Some(deal.quoted_rate);
        deal.locked_at = Some(now);
        deal.updated_at = now;

        if !self.gateway.store().cas_update_deal(&deal, prev)? {
            let current = self.get(deal_id)?.unwrap_or(deal);
            return Ok(DealOutcome::noop(current, "state_changed"));
        }

        self.emit_event(&deal, Some(prev), "locked", None);
        info!(deal = %deal.id, rate = %deal.quoted_rate, "🔒 deal locked");
        Ok(DealOutcome::ok(deal))
    }

    // ------------------------------------------------------------------
    // apply_amount

    /// Fill the missing side from the effective rate. Passes through the
    /// transient `computing` state and returns to the prior one; while
    /// still quoted, a fresh mid refreshes the rate first.
    pub async fn apply_amount(
        &self,
        deal_id: &str,
        amount_brl: Option<Decimal>,
        amount_usdt: Option<Decimal>,
    ) -> BotResult<DealOutcome> {
        if amount_brl.is_none() && amount_usdt.is_none() {
            return Err(BotError::validation("an amount is required"));
        }

        let deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        let _guard = self.acquire(&deal.group_jid, &deal.client_jid).await?;

        let mut deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        if deal.state.is_terminal() {
            return Ok(DealOutcome::noop(deal, "already_terminal"));
        }

        let now = Utc::now();
        if now >= deal.ttl_expires_at && deal.state == DealState::Quoted {
            let expired = self.expire_under_lock(deal).await?;
            return Ok(DealOutcome::noop(expired, "expired"));
        }

        let prior = deal.state;
        deal.state = DealState::Computing;
        deal.updated_at = now;
        if !self.gateway.store().cas_update_deal(&deal, prior)? {
            let current = self.get(deal_id)?.unwrap_or(deal);
            return Ok(DealOutcome::noop(current, "state_changed"));
        }

        if prior == DealState::Quoted {
            // Still unlocked: recompute against the freshest mid so the
            // confirmed amounts match what the client would be quoted now.
            if let Some(view) = self
                .aggregator
                .resolve_mid(deal.pricing_source)
                .filter(|v| !v.stale)
            {
                if let Some(mid) = Decimal::from_f64(view.price) {
                    deal.base_rate = mid.trunc_with_scale(4);
                    deal.quoted_rate = apply_spread(
                        deal.base_rate,
                        deal.side,
                        deal.spread_mode,
                        deal.sell_spread,
                        deal.buy_spread,
                    );
                }
            }
        }

        let rate = deal.effective_rate();
        if let Some(brl) = amount_brl {
            deal.amount_brl = Some(brl.trunc_with_scale(2));
            deal.amount_usdt = usdt_from_brl(brl, rate);
        } else if let Some(usdt) = amount_usdt {
            deal.amount_usdt = Some(usdt.trunc_with_scale(2));
            deal.amount_brl = brl_from_usdt(usdt, rate);
        }

        deal.state = prior;
        deal.updated_at = Utc::now();
        if !self.gateway.store().cas_update_deal(&deal, DealState::Computing)? {
            let current = self.get(deal_id)?.unwrap_or(deal);
            return Ok(DealOutcome::noop(current, "state_changed"));
        }

        self.emit_event(&deal, Some(DealState::Computing), "amount_applied", None);
        debug!(
            deal = %deal.id,
            brl = ?deal.amount_brl,
            usdt = ?deal.amount_usdt,
            "amounts resolved"
        );
        Ok(DealOutcome::ok(deal))
    }

    // ------------------------------------------------------------------
    // terminal transitions

    pub async fn complete(&self, deal_id: &str, reason: &str) -> BotResult<DealOutcome> {
        let deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        let _guard = self.acquire(&deal.group_jid, &deal.client_jid).await?;

        let mut deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        if deal.state.is_terminal() {
            return Ok(DealOutcome::noop(deal, "already_terminal"));
        }
        if deal.state != DealState::Locked {
            return Ok(DealOutcome::noop(deal, "not_locked"));
        }

        let prev = deal.state;
        deal.state = DealState::Completed;
        deal.updated_at = Utc::now();
        self.finish(&deal, prev, reason, "completed").await?;
        info!(deal = %deal.id, reason, "✅ deal completed");
        Ok(DealOutcome::ok(deal))
    }

    pub async fn cancel(&self, deal_id: &str, reason: &str) -> BotResult<DealOutcome> {
        let deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        let _guard = self.acquire(&deal.group_jid, &deal.client_jid).await?;

        let mut deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        if deal.state.is_terminal() {
            return Ok(DealOutcome::noop(deal, "already_terminal"));
        }

        let prev = deal.state;
        deal.state = DealState::Cancelled;
        deal.updated_at = Utc::now();
        self.finish(&deal, prev, reason, "cancelled").await?;
        info!(deal = %deal.id, reason, "🚫 deal cancelled");
        Ok(DealOutcome::ok(deal))
    }

    // ------------------------------------------------------------------
    // extend

    /// Push the TTL out. Per-call cap of one hour; cumulative extensions
    /// cap at twice the original TTL.
    pub async fn extend(&self, deal_id: &str, seconds: i64) -> BotResult<DealOutcome> {
        if seconds <= 0 {
            return Err(BotError::validation("extension must be positive"));
        }
        let deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        let _guard = self.acquire(&deal.group_jid, &deal.client_jid).await?;

        let mut deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        if deal.state.is_terminal() {
            return Ok(DealOutcome::noop(deal, "already_terminal"));
        }

        let original_ttl = deal
            .metadata
            .get("original_ttl_seconds")
            .and_then(|v| v.as_i64())
            .unwrap_or(180);
        let extended_total = deal
            .metadata
            .get("extended_total_seconds")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let per_call = seconds.min(MAX_EXTEND_PER_CALL_SECS);
        let budget_left = (2 * original_ttl - extended_total).max(0);
        let granted = per_call.min(budget_left);
        if granted == 0 {
            return Ok(DealOutcome::noop(deal, "extension_budget_exhausted"));
        }

        let prev = deal.state;
        deal.ttl_expires_at = deal.ttl_expires_at + ChronoDuration::seconds(granted);
        if let Some(obj) = deal.metadata.as_object_mut() {
            obj.insert(
                "extended_total_seconds".into(),
                serde_json::json!(extended_total + granted),
            );
        }
        deal.updated_at = Utc::now();

        if !self.gateway.store().cas_update_deal(&deal, prev)? {
            let current = self.get(deal_id)?.unwrap_or(deal);
            return Ok(DealOutcome::noop(current, "state_changed"));
        }

        self.emit_event(&deal, Some(prev), "extended", None);
        info!(deal = %deal.id, granted, "⏱️ ttl extended");
        Ok(DealOutcome::ok(deal))
    }

    // ------------------------------------------------------------------
    // reprice

    /// Manual or drift-initiated reprice of a quoted deal. Over the
    /// per-deal cap, the deal escalates to the operator instead (metadata
    /// flag, not a new state).
    pub async fn reprice(&self, deal_id: &str) -> BotResult<DealOutcome> {
        let deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        let _guard = self.acquire(&deal.group_jid, &deal.client_jid).await?;

        let deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        if deal.state != DealState::Quoted {
            return Ok(DealOutcome::noop(deal, "not_quoted"));
        }

        let view = self
            .aggregator
            .resolve_mid(deal.pricing_source)
            .filter(|v| !v.stale)
            .ok_or_else(|| BotError::Transient("no fresh price for reprice".into()))?;

        let policy = self.gateway.config_for(&deal.group_jid)?.volatility;
        self.reprice_under_lock(deal, view.price, &policy).await
    }

    /// Shared path for the volatility monitor; caller holds no lock.
    pub async fn reprice_with_mid(
        &self,
        deal_id: &str,
        current_mid: f64,
        policy: &VolatilityPolicy,
    ) -> BotResult<DealOutcome> {
        let deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        let _guard = self.acquire(&deal.group_jid, &deal.client_jid).await?;

        let deal = match self.read_live(deal_id)? {
            Ok(deal) => deal,
            Err(outcome) => return Ok(outcome),
        };
        if deal.state != DealState::Quoted {
            return Ok(DealOutcome::noop(deal, "not_quoted"));
        }
        self.reprice_under_lock(deal, current_mid, policy).await
    }

    async fn reprice_under_lock(
        &self,
        mut deal: Deal,
        current_mid: f64,
        policy: &VolatilityPolicy,
    ) -> BotResult<DealOutcome> {
        if deal.reprice_count >= policy.max_reprices {
            if deal.awaiting_operator() {
                return Ok(DealOutcome::noop(deal, "await_operator"));
            }
            let prev = deal.state;
            if let Some(obj) = deal.metadata.as_object_mut() {
                obj.insert("await_operator".into(), serde_json::json!(true));
            }
            deal.updated_at = Utc::now();
            if !self.gateway.store().cas_update_deal(&deal, prev)? {
                let current = self.get(&deal.id)?.unwrap_or(deal);
                return Ok(DealOutcome::noop(current, "state_changed"));
            }
            self.emit_event(&deal, Some(prev), "escalated", Some(current_mid));
            warn!(deal = %deal.id, "📣 reprice cap hit, escalating to operator");
            self.notifier.notify(&format!(
                "⚠️ Deal {} hit the reprice cap ({}x); operator action needed",
                deal.id, deal.reprice_count
            ));
            return Ok(DealOutcome::noop(deal, "escalated"));
        }

        let mid = Decimal::from_f64(current_mid)
            .ok_or_else(|| BotError::Fatal(format!("unrepresentable mid {current_mid}")))?
            .trunc_with_scale(4);

        let prev = deal.state;
        deal.base_rate = mid;
        deal.quoted_rate = apply_spread(
            mid,
            deal.side,
            deal.spread_mode,
            deal.sell_spread,
            deal.buy_spread,
        );
        deal.reprice_count += 1;
        deal.updated_at = Utc::now();

        if !self.gateway.store().cas_update_deal(&deal, prev)? {
            let current = self.get(&deal.id)?.unwrap_or(deal);
            return Ok(DealOutcome::noop(current, "state_changed"));
        }

        self.emit_event(&deal, Some(prev), "repriced", Some(current_mid));
        info!(
            deal = %deal.id,
            count = deal.reprice_count,
            quoted = %deal.quoted_rate,
            "♻️ deal repriced"
        );
        Ok(DealOutcome::ok(deal))
    }

    // ------------------------------------------------------------------
    // sweep

    /// Expire every non-terminal deal whose TTL elapsed. Idempotent;
    /// returns the number of deals transitioned.
    pub async fn sweep(&self) -> BotResult<usize> {
        let now = Utc::now();
        let candidates = self.gateway.store().expired_deal_ids(now)?;
        let mut swept = 0usize;

        for deal_id in candidates {
            let Some(deal) = self.get(&deal_id)? else {
                continue;
            };
            let guard = self.acquire(&deal.group_jid, &deal.client_jid).await;
            let _guard = match guard {
                Ok(g) => g,
                Err(BotError::Busy(_)) => {
                    // Another operation owns the pair; the next sweep
                    // tick picks it up.
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(deal) = self.get(&deal_id)? else {
                continue;
            };
            if deal.state.is_terminal() || Utc::now() < deal.ttl_expires_at {
                continue;
            }
            self.expire_under_lock(deal).await?;
            swept += 1;
        }

        if swept > 0 {
            info!(swept, "🧹 ttl sweep expired deals");
        }
        Ok(swept)
    }

    async fn expire_under_lock(&self, mut deal: Deal) -> BotResult<Deal> {
        let prev = deal.state;
        deal.state = DealState::Expired;
        deal.updated_at = Utc::now();
        self.finish(&deal, prev, "ttl elapsed", "expired").await?;
        Ok(deal)
    }

    /// Terminal bookkeeping: archive + free the pair slot + event, all
    /// observable as one step.
    async fn finish(
        &self,
        deal: &Deal,
        prev: DealState,
        reason: &str,
        event_type: &'static str,
    ) -> BotResult<()> {
        self.gateway.store().archive_deal(deal, reason, Utc::now())?;
        self.active_pairs
            .lock()
            .remove(&(deal.group_jid.clone(), deal.client_jid.clone()));
        self.emit_event(deal, Some(prev), event_type, None);
        Ok(())
    }

    fn fill_amounts(deal: &mut Deal, value: Decimal, currency: Currency) {
        let rate = deal.effective_rate();
        match currency {
            Currency::Brl => {
                deal.amount_brl = Some(value.trunc_with_scale(2));
                deal.amount_usdt = usdt_from_brl(value, rate);
            }
            Currency::Usdt => {
                deal.amount_usdt = Some(value.trunc_with_scale(2));
                deal.amount_brl = brl_from_usdt(value, rate);
            }
        }
    }

    fn emit_event(
        &self,
        deal: &Deal,
        from: Option<DealState>,
        event_type: &'static str,
        market_price: Option<f64>,
    ) {
        let snapshot = serde_json::to_string(deal).unwrap_or_else(|_| "{}".into());
        self.sink.emit(BronzeEvent::DealEvent {
            deal_id: deal.id.clone(),
            group_jid: deal.group_jid.clone(),
            client_jid: deal.client_jid.clone(),
            from_state: from.map(|s| s.as_str().to_string()),
            to_state: deal.state.as_str().to_string(),
            event_type: event_type.to_string(),
            market_price: market_price.map(|p| p.to_string()),
            deal_snapshot: snapshot,
            metadata: deal.metadata.to_string(),
            created_at: Utc::now(),
        });
    }

    /// Pricing source of a feed tick mapped back for the monitor.
    pub fn sources_for_tick(source: crate::feeds::FeedSource) -> Vec<PricingSource> {
        match source {
            crate::feeds::FeedSource::StreamA => vec![PricingSource::Binance],
            crate::feeds::FeedSource::StreamB => vec![PricingSource::Tradingview],
            crate::feeds::FeedSource::RestFallback => vec![PricingSource::Commercial],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{FeedSource, SYMBOL_USDT_BRL};
    use crate::notifier::NullNotifier;
    use crate::storage::Store;
    use rust_decimal_macros::dec;

    fn engine_with_price(price: f64) -> (Arc<DealEngine>, Arc<Gateway>) {
        let gateway = Gateway::new(Store::open_in_memory().unwrap());
        let sink = BronzeSink::new();
        let aggregator = PriceAggregator::new(120_000, sink.clone());
        aggregator.record_sample(FeedSource::StreamA, SYMBOL_USDT_BRL, price, None, None);
        let resolver = SpreadResolver::new(gateway.clone());
        let engine = DealEngine::new(
            gateway.clone(),
            aggregator,
            resolver,
            sink,
            Arc::new(NullNotifier),
        );
        (engine, gateway)
    }

    fn set_spread_bps(gateway: &Gateway, sell: Decimal, buy: Decimal) {
        let mut config = (*gateway.config_for("g1").unwrap()).clone();
        config.spread_mode = crate::models::SpreadMode::Bps;
        config.sell_spread = sell;
        config.buy_spread = buy;
        gateway.store().upsert_config(&config).unwrap();
        gateway.invalidate_config("g1");
    }

    #[tokio::test]
    async fn quote_applies_spread_and_ttl() {
        let (engine, gateway) = engine_with_price(5.20);
        set_spread_bps(&gateway, dec!(50), dec!(0));

        let outcome = engine.quote("g1", "c1", None, None).await.unwrap();
        let QuoteOutcome::Created(deal) = outcome else {
            panic!("expected created");
        };
        assert_eq!(deal.state, DealState::Quoted);
        assert_eq!(deal.base_rate, dec!(5.20));
        assert_eq!(deal.quoted_rate, dec!(5.2260));
        let ttl = (deal.ttl_expires_at - deal.created_at).num_seconds();
        assert_eq!(ttl, 180);
    }

    #[tokio::test]
    async fn second_quote_conflicts_with_existing() {
        let (engine, _gateway) = engine_with_price(5.20);

        let first = engine.quote("g1", "c1", None, None).await.unwrap();
        let QuoteOutcome::Created(first_deal) = first else {
            panic!("expected created");
        };

        let second = engine.quote("g1", "c1", None, None).await.unwrap();
        let QuoteOutcome::Conflict(existing) = second else {
            panic!("expected conflict");
        };
        assert_eq!(existing.id, first_deal.id);
        assert_eq!(existing.quoted_rate, first_deal.quoted_rate);
    }

    #[tokio::test]
    async fn quote_requires_fresh_price() {
        let gateway = Gateway::new(Store::open_in_memory().unwrap());
        let sink = BronzeSink::new();
        let aggregator = PriceAggregator::new(120_000, sink.clone());
        let resolver = SpreadResolver::new(gateway.clone());
        let engine = DealEngine::new(gateway, aggregator, resolver, sink, Arc::new(NullNotifier));

        let err = engine.quote("g1", "c1", None, None).await.unwrap_err();
        assert!(matches!(err, BotError::Transient(_)));
    }

    #[tokio::test]
    async fn lock_snapshots_rate_and_is_idempotent() {
        let (engine, gateway) = engine_with_price(5.20);
        set_spread_bps(&gateway, dec!(50), dec!(0));

        let QuoteOutcome::Created(deal) = engine.quote("g1", "c1", None, None).await.unwrap()
        else {
            panic!()
        };

        let locked = engine.lock(&deal.id).await.unwrap();
        assert!(locked.changed());
        assert_eq!(locked.deal.state, DealState::Locked);
        assert_eq!(locked.deal.locked_rate, Some(dec!(5.2260)));
        assert!(locked.deal.locked_at.is_some());

        let again = engine.lock(&deal.id).await.unwrap();
        assert!(!again.changed());
        assert_eq!(again.reason, "already_locked");
    }

    #[tokio::test]
    async fn lock_after_ttl_expires_the_deal() {
        let (engine, gateway) = engine_with_price(5.20);
        let QuoteOutcome::Created(deal) = engine.quote("g1", "c1", None, None).await.unwrap()
        else {
            panic!()
        };

        // Force the TTL into the past.
        let mut stale = deal.clone();
        stale.ttl_expires_at = Utc::now() - ChronoDuration::seconds(1);
        assert!(gateway
            .store()
            .cas_update_deal(&stale, DealState::Quoted)
            .unwrap());

        let outcome = engine.lock(&deal.id).await.unwrap();
        assert_eq!(outcome.reason, "expired");
        assert_eq!(outcome.deal.state, DealState::Expired);

        // The slot is free for a new quote.
        let next = engine.quote("g1", "c1", None, None).await.unwrap();
        assert!(matches!(next, QuoteOutcome::Created(_)));
    }

    #[tokio::test]
    async fn amounts_fill_from_locked_rate_with_truncation() {
        let (engine, gateway) = engine_with_price(5.20);
        set_spread_bps(&gateway, dec!(50), dec!(0));

        let QuoteOutcome::Created(deal) = engine.quote("g1", "c1", None, None).await.unwrap()
        else {
            panic!()
        };
        engine.lock(&deal.id).await.unwrap();

        let outcome = engine
            .apply_amount(&deal.id, Some(dec!(10000)), None)
            .await
            .unwrap();
        assert!(outcome.changed());
        assert_eq!(outcome.deal.state, DealState::Locked);
        assert_eq!(outcome.deal.amount_brl, Some(dec!(10000)));
        // 10000 / 5.2260 truncated at two decimals.
        assert_eq!(outcome.deal.amount_usdt, Some(dec!(1913.50)));
    }

    #[tokio::test]
    async fn terminal_states_are_append_only() {
        let (engine, _gateway) = engine_with_price(5.20);
        let QuoteOutcome::Created(deal) = engine.quote("g1", "c1", None, None).await.unwrap()
        else {
            panic!()
        };

        engine.cancel(&deal.id, "client request").await.unwrap();

        // Archived: further operations are idempotent no-ops that return
        // the terminal deal.
        let outcome = engine.lock(&deal.id).await.unwrap();
        assert_eq!(outcome.reason, "already_terminal");
        assert_eq!(outcome.deal.state, DealState::Cancelled);

        let outcome = engine.cancel(&deal.id, "again").await.unwrap();
        assert_eq!(outcome.reason, "already_terminal");

        let err = engine.lock("missing-id").await.unwrap_err();
        assert!(matches!(err, BotError::NotFound(_)));
    }

    #[tokio::test]
    async fn complete_requires_locked() {
        let (engine, _gateway) = engine_with_price(5.20);
        let QuoteOutcome::Created(deal) = engine.quote("g1", "c1", None, None).await.unwrap()
        else {
            panic!()
        };

        let outcome = engine.complete(&deal.id, "paid").await.unwrap();
        assert_eq!(outcome.reason, "not_locked");

        engine.lock(&deal.id).await.unwrap();
        let outcome = engine.complete(&deal.id, "paid").await.unwrap();
        assert!(outcome.changed());
        assert_eq!(outcome.deal.state, DealState::Completed);
    }

    #[tokio::test]
    async fn extend_caps_cumulative_budget() {
        let (engine, _gateway) = engine_with_price(5.20);
        let QuoteOutcome::Created(deal) = engine.quote("g1", "c1", None, None).await.unwrap()
        else {
            panic!()
        };

        // Original TTL 180s: cumulative budget 360s.
        let first = engine.extend(&deal.id, 300).await.unwrap();
        assert!(first.changed());
        let second = engine.extend(&deal.id, 300).await.unwrap();
        assert!(second.changed());
        let granted = second
            .deal
            .metadata
            .get("extended_total_seconds")
            .and_then(|v| v.as_i64())
            .unwrap();
        assert_eq!(granted, 360);

        let third = engine.extend(&deal.id, 60).await.unwrap();
        assert_eq!(third.reason, "extension_budget_exhausted");
    }

    #[tokio::test]
    async fn sweep_expires_all_elapsed_deals() {
        let (engine, gateway) = engine_with_price(5.20);

        for client in ["c1", "c2"] {
            let QuoteOutcome::Created(deal) =
                engine.quote("g1", client, None, None).await.unwrap()
            else {
                panic!()
            };
            let mut stale = deal.clone();
            stale.ttl_expires_at = Utc::now() - ChronoDuration::seconds(1);
            gateway
                .store()
                .cas_update_deal(&stale, DealState::Quoted)
                .unwrap();
        }
        // One fresh deal survives.
        engine.quote("g1", "c3", None, None).await.unwrap();

        let swept = engine.sweep().await.unwrap();
        assert_eq!(swept, 2);
        // Idempotent.
        assert_eq!(engine.sweep().await.unwrap(), 0);

        assert!(engine.active_deal_for("g1", "c1").unwrap().is_none());
        assert!(engine.active_deal_for("g1", "c3").unwrap().is_some());
    }

    #[tokio::test]
    async fn reprice_caps_then_escalates() {
        let (engine, _gateway) = engine_with_price(5.20);
        let QuoteOutcome::Created(deal) = engine.quote("g1", "c1", None, None).await.unwrap()
        else {
            panic!()
        };

        let policy = VolatilityPolicy {
            enabled: true,
            threshold_bps: 30,
            max_reprices: 2,
        };

        let first = engine
            .reprice_with_mid(&deal.id, 5.2208, &policy)
            .await
            .unwrap();
        assert!(first.changed());
        assert_eq!(first.deal.reprice_count, 1);
        assert_eq!(first.deal.base_rate, dec!(5.2208));

        let second = engine
            .reprice_with_mid(&deal.id, 5.2417, &policy)
            .await
            .unwrap();
        assert!(second.changed());
        assert_eq!(second.deal.reprice_count, 2);

        // Cap hit: escalation flag, no third reprice, TTL untouched.
        let third = engine
            .reprice_with_mid(&deal.id, 5.2627, &policy)
            .await
            .unwrap();
        assert_eq!(third.reason, "escalated");
        assert!(third.deal.awaiting_operator());
        assert_eq!(third.deal.reprice_count, 2);
        assert_eq!(third.deal.ttl_expires_at, second.deal.ttl_expires_at);

        // Further drift stays escalated.
        let fourth = engine
            .reprice_with_mid(&deal.id, 5.2800, &policy)
            .await
            .unwrap();
        assert_eq!(fourth.reason, "await_operator");
    }

    #[tokio::test]
    async fn locked_deals_never_reprice() {
        let (engine, _gateway) = engine_with_price(5.20);
        let QuoteOutcome::Created(deal) = engine.quote("g1", "c1", None, None).await.unwrap()
        else {
            panic!()
        };
        engine.lock(&deal.id).await.unwrap();

        let policy = VolatilityPolicy::default();
        let outcome = engine
            .reprice_with_mid(&deal.id, 5.30, &policy)
            .await
            .unwrap();
        assert_eq!(outcome.reason, "not_quoted");
    }
}

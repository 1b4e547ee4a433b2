//! The message pipeline.
//!
//! One inbound message flows: group discovery, routing context, route,
//! then the matching handler (control command, deal conversation, trigger
//! action, or observation). Every message is recorded with its route;
//! sends respect suppression except deal-state confirmations.

use crate::classifier::AiClassifier;
use crate::deals::{DealEngine, DealOutcome, QuoteOutcome};
use crate::errors::{BotError, BotResult};
use crate::error_service::ErrorService;
use crate::models::{
    ActionType, Currency, DealState, GroupMode, InboundMessage, Trigger,
};
use crate::notifier::{ControlNotify, Notifier};
use crate::observability::Counters;
use crate::pricing::{extract_amount, format_amount, format_rate, ExtractedAmount};
use crate::router::{route, Route, RouteContext};
use crate::status::BotStatus;
use crate::storage::gateway::Gateway;
use crate::suppression::{ResponseClass, SuppressionGuard};
use crate::transport::{SendOptions, Transport};
use crate::triggers::{TriggerMatch, TriggerMatcher};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

const BUSY_RETRIES: usize = 2;

/// What processing one message produced; the simulator surfaces this.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub route: Route,
    pub responses: Vec<String>,
}

pub struct Pipeline {
    control_pattern: String,
    gateway: Arc<Gateway>,
    matcher: Arc<TriggerMatcher>,
    engine: Arc<DealEngine>,
    status: BotStatus,
    suppression: Arc<SuppressionGuard>,
    transport: Arc<dyn Transport>,
    notifier: Arc<Notifier>,
    errors: Arc<ErrorService>,
    classifier: Arc<AiClassifier>,
    counters: Arc<Counters>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        control_pattern: String,
        gateway: Arc<Gateway>,
        matcher: Arc<TriggerMatcher>,
        engine: Arc<DealEngine>,
        status: BotStatus,
        suppression: Arc<SuppressionGuard>,
        transport: Arc<dyn Transport>,
        notifier: Arc<Notifier>,
        errors: Arc<ErrorService>,
        classifier: Arc<AiClassifier>,
        counters: Arc<Counters>,
    ) -> Arc<Self> {
        Arc::new(Self {
            control_pattern,
            gateway,
            matcher,
            engine,
            status,
            suppression,
            transport,
            notifier,
            errors,
            classifier,
            counters,
        })
    }

    /// Drive one message through the full pipeline.
    pub async fn process(&self, msg: &InboundMessage) -> BotResult<ProcessReport> {
        Counters::bump(&self.counters.messages_processed);
        let now = Utc::now();

        // Group discovery. The stored flag is authoritative; the name
        // pattern only decides on first sight.
        let existing = self.gateway.store().get_group(&msg.group_jid)?;
        let is_control = match &existing {
            Some(group) => group.is_control_group,
            None => self.name_matches_control(&msg.group_name),
        };
        self.gateway
            .store()
            .touch_group(&msg.group_jid, &msg.group_name, is_control, now)?;
        if existing.is_none() {
            self.gateway.seed_system_triggers(&msg.group_jid)?;
            // Config row lands on first read.
            let _ = self.gateway.config_for(&msg.group_jid)?;
        }
        if is_control {
            self.notifier.set_control_group(&msg.group_jid);
        }

        let config = self.gateway.config_for(&msg.group_jid)?;
        let text = msg.text.trim();
        let sender_ignored = matches!(config.role_of(&msg.sender_jid), Some("ignored"));

        let active_deal = if text.is_empty() {
            None
        } else {
            self.engine
                .active_deal_for(&msg.group_jid, &msg.sender_jid)?
        };
        let trigger_match = if text.is_empty() {
            None
        } else {
            self.matcher
                .find_match(&msg.group_jid, text, is_control)?
        };

        let destination = route(&RouteContext {
            is_control_group: is_control,
            sender_ignored,
            text_empty: text.is_empty(),
            has_active_deal: active_deal.is_some(),
            trigger_matched: trigger_match.is_some(),
            paused: self.status.is_paused(),
        });

        self.gateway.store().record_message(
            &msg.message_id,
            &msg.group_jid,
            &msg.sender_jid,
            msg.sender_name.as_deref(),
            text,
            destination.as_str(),
            now,
        )?;

        let responses = match destination {
            Route::Control => self.handle_control(msg, trigger_match.as_ref()).await?,
            Route::Deal => {
                let deal = active_deal.expect("routed DEAL implies an active deal");
                self.handle_deal(msg, deal, trigger_match.as_ref(), &config)
                    .await?
            }
            Route::Triggered => {
                let hit = trigger_match.as_ref().expect("routed TRIGGERED implies a match");
                self.handle_triggered(msg, hit, &config).await?
            }
            Route::Observe => {
                self.maybe_discover(msg, text).await;
                Vec::new()
            }
            Route::Ignore => Vec::new(),
        };

        Ok(ProcessReport {
            route: destination,
            responses,
        })
    }

    fn name_matches_control(&self, group_name: &str) -> bool {
        !self.control_pattern.is_empty()
            && group_name
                .to_lowercase()
                .contains(&self.control_pattern.to_lowercase())
    }

    /// Send to a group unless suppression says otherwise. Deal-state
    /// confirmations bypass the cooldown by class.
    async fn send(
        &self,
        group_jid: &str,
        text: String,
        class: ResponseClass,
    ) -> Option<String> {
        if self.suppression.should_suppress(group_jid, class) {
            Counters::bump(&self.counters.responses_suppressed);
            debug!(group = group_jid, "response suppressed");
            return None;
        }
        let receipt = self
            .transport
            .send(
                group_jid,
                &text,
                SendOptions {
                    mentions: Vec::new(),
                    typing_flash: true,
                },
            )
            .await;
        if receipt.ok {
            self.suppression.record_response(group_jid, class);
            Counters::bump(&self.counters.responses_sent);
            Some(text)
        } else {
            warn!(group = group_jid, reason = ?receipt.reason, "send failed");
            self.errors
                .record_failure("transport", receipt.reason.as_deref().unwrap_or("send failed"));
            None
        }
    }

    // ------------------------------------------------------------------
    // control group

    async fn handle_control(
        &self,
        msg: &InboundMessage,
        hit: Option<&TriggerMatch>,
    ) -> BotResult<Vec<String>> {
        let Some(hit) = hit else {
            return Ok(Vec::new());
        };
        let mut responses = Vec::new();

        match hit.trigger.action_type {
            ActionType::Pause => {
                self.errors.clear_auto_pause();
                if self.status.pause("manual") {
                    info!(by = %msg.sender_jid, "⏸️ bot paused by operator");
                }
                if let Some(text) = self
                    .send(&msg.group_jid, "⏸️ Bot pausado".into(), ResponseClass::DealState)
                    .await
                {
                    responses.push(text);
                }
            }
            ActionType::Resume => {
                self.errors.clear_auto_pause();
                if self.status.resume() {
                    info!(by = %msg.sender_jid, "▶️ bot resumed by operator");
                }
                if let Some(text) = self
                    .send(&msg.group_jid, "▶️ Bot ativo".into(), ResponseClass::DealState)
                    .await
                {
                    responses.push(text);
                }
            }
            ActionType::Status => {
                let snap = self.status.snapshot();
                let counters = self.counters.snapshot();
                let text = format!(
                    "📊 Status: {} | uptime {}s | mensagens {} | quotes {} | travas {}",
                    match snap.pause_reason {
                        Some(reason) => format!("pausado ({reason})"),
                        None => "ativo".to_string(),
                    },
                    snap.uptime_ms / 1000,
                    counters.messages_processed,
                    counters.quotes_created,
                    counters.deals_locked,
                );
                if let Some(text) = self
                    .send(&msg.group_jid, text, ResponseClass::Info)
                    .await
                {
                    responses.push(text);
                }
            }
            ActionType::TextResponse => {
                if let Some(text) = Self::action_text(&hit.trigger) {
                    if let Some(sent) = self
                        .send(&msg.group_jid, text, ResponseClass::Info)
                        .await
                    {
                        responses.push(sent);
                    }
                }
            }
            _ => {
                // Quote/lock/cancel vocabulary carries no meaning in the
                // control group.
                debug!(action = hit.trigger.action_type.as_str(), "control trigger ignored");
            }
        }

        Ok(responses)
    }

    // ------------------------------------------------------------------
    // deal conversation

    async fn handle_deal(
        &self,
        msg: &InboundMessage,
        deal: crate::models::Deal,
        hit: Option<&TriggerMatch>,
        config: &crate::models::GroupConfig,
    ) -> BotResult<Vec<String>> {
        let mut responses = Vec::new();
        let amount = extract_amount(&msg.text);
        let action = hit.map(|h| h.trigger.action_type);

        match action {
            Some(ActionType::Cancel) => {
                let outcome = self
                    .with_busy_retry(|| self.engine.cancel(&deal.id, "client request"))
                    .await?;
                if outcome.changed() {
                    Counters::bump(&self.counters.deals_cancelled);
                    if let Some(text) = self
                        .send(
                            &msg.group_jid,
                            "🚫 Operação cancelada".into(),
                            ResponseClass::DealState,
                        )
                        .await
                    {
                        responses.push(text);
                    }
                }
            }
            Some(ActionType::Complete) if config.is_operator(&msg.sender_jid) => {
                let outcome = self
                    .with_busy_retry(|| self.engine.complete(&deal.id, "operator confirmation"))
                    .await?;
                if outcome.changed() {
                    Counters::bump(&self.counters.deals_completed);
                    if let Some(text) = self
                        .send(
                            &msg.group_jid,
                            "✅ Operação concluída".into(),
                            ResponseClass::DealState,
                        )
                        .await
                    {
                        responses.push(text);
                    }
                }
            }
            Some(ActionType::Lock) if deal.state == DealState::Quoted => {
                let outcome = self
                    .with_busy_retry(|| self.engine.lock(&deal.id))
                    .await?;
                if outcome.changed() {
                    Counters::bump(&self.counters.deals_locked);
                    let mut locked = outcome;
                    if let Some(found) = &amount {
                        locked = self.apply_extracted(&deal.id, found, config).await?;
                    }
                    if let Some(text) = self
                        .send(
                            &msg.group_jid,
                            lock_confirmation(&locked.deal),
                            ResponseClass::DealState,
                        )
                        .await
                    {
                        responses.push(text);
                    }
                } else if outcome.reason == "expired" {
                    Counters::bump(&self.counters.deals_expired);
                    if let Some(text) = self
                        .send(
                            &msg.group_jid,
                            "⌛ Cotação expirada, peça um novo preço".into(),
                            ResponseClass::DealState,
                        )
                        .await
                    {
                        responses.push(text);
                    }
                }
            }
            _ => {
                if let Some(found) = &amount {
                    let outcome = self.apply_extracted(&deal.id, found, config).await?;
                    if outcome.changed() {
                        if let Some(text) = self
                            .send(
                                &msg.group_jid,
                                amount_confirmation(&outcome.deal),
                                ResponseClass::DealState,
                            )
                            .await
                        {
                            responses.push(text);
                        }
                    }
                } else {
                    // Part of the conversation but nothing actionable.
                    debug!(deal = %deal.id, "deal message observed");
                }
            }
        }

        Ok(responses)
    }

    async fn apply_extracted(
        &self,
        deal_id: &str,
        found: &ExtractedAmount,
        config: &crate::models::GroupConfig,
    ) -> BotResult<DealOutcome> {
        let currency = found.currency.unwrap_or(config.default_currency);
        let (brl, usdt) = match currency {
            Currency::Brl => (Some(found.value), None),
            Currency::Usdt => (None, Some(found.value)),
        };
        self.with_busy_retry(|| self.engine.apply_amount(deal_id, brl, usdt))
            .await
    }

    // ------------------------------------------------------------------
    // triggered

    async fn handle_triggered(
        &self,
        msg: &InboundMessage,
        hit: &TriggerMatch,
        config: &crate::models::GroupConfig,
    ) -> BotResult<Vec<String>> {
        match config.mode {
            GroupMode::Active => {}
            GroupMode::Assisted => {
                self.notifier.notify(&format!(
                    "💡 [{}] gatilho '{}' de {}: {}",
                    msg.group_name,
                    hit.trigger.phrase,
                    msg.sender_name.as_deref().unwrap_or(&msg.sender_jid),
                    msg.text.trim(),
                ));
                return Ok(Vec::new());
            }
            GroupMode::Learning | GroupMode::Paused => return Ok(Vec::new()),
        }

        let mut responses = Vec::new();
        match hit.trigger.action_type {
            ActionType::Quote => {
                let amount_hint = extract_amount(&msg.text)
                    .map(|found| (found.value, found.currency.unwrap_or(config.default_currency)));
                let outcome = self
                    .engine
                    .quote(&msg.group_jid, &msg.sender_jid, None, amount_hint)
                    .await;
                match outcome {
                    Ok(QuoteOutcome::Created(deal)) => {
                        Counters::bump(&self.counters.quotes_created);
                        let text = format!("R$ {}", format_rate(deal.quoted_rate));
                        if let Some(sent) =
                            self.send(&msg.group_jid, text, ResponseClass::Quote).await
                        {
                            responses.push(sent);
                        }
                    }
                    Ok(QuoteOutcome::Conflict(deal)) => {
                        let text = format!("R$ {}", format_rate(deal.quoted_rate));
                        if let Some(sent) =
                            self.send(&msg.group_jid, text, ResponseClass::Quote).await
                        {
                            responses.push(sent);
                        }
                    }
                    Err(BotError::Transient(reason)) => {
                        warn!(group = %msg.group_jid, reason, "quote unavailable");
                    }
                    Err(e) => return Err(e),
                }
            }
            ActionType::TextResponse => {
                if let Some(text) = Self::action_text(&hit.trigger) {
                    if let Some(sent) = self
                        .send(&msg.group_jid, text, ResponseClass::Info)
                        .await
                    {
                        responses.push(sent);
                    }
                }
            }
            ActionType::AiPrompt => {
                Counters::bump(&self.counters.classifier_consults);
                match self.classifier.classify(&msg.group_jid, &msg.text).await {
                    Ok(result) if result.relevant => {
                        self.notifier.notify(&format!(
                            "🤖 [{}] '{}' classificado como {} ({:.0}%)",
                            msg.group_name,
                            msg.text.trim(),
                            result.label,
                            result.confidence * 100.0,
                        ));
                    }
                    Ok(_) => {}
                    Err(refusal) => {
                        debug!(?refusal, "classifier refused ai_prompt");
                    }
                }
            }
            ActionType::Lock | ActionType::Cancel | ActionType::Complete => {
                // No active deal (that routes to DEAL); nothing to act on.
                debug!(action = hit.trigger.action_type.as_str(), "trigger without deal");
            }
            ActionType::Pause | ActionType::Resume | ActionType::Status => {
                // Control-scope actions never match outside the control
                // group; the scope filter guarantees it.
            }
        }

        Ok(responses)
    }

    fn action_text(trigger: &Trigger) -> Option<String> {
        trigger
            .action_params
            .get("text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
    }

    // ------------------------------------------------------------------
    // observe-side discovery

    /// Low-confidence fallback: unmatched but OTC-looking messages go to
    /// the classifier (guarded); positives become operator suggestions,
    /// never direct deal writes.
    async fn maybe_discover(&self, msg: &InboundMessage, text: &str) {
        if !self.classifier.enabled() || self.status.is_paused() {
            return;
        }
        if !looks_otc_relevant(text) {
            return;
        }
        Counters::bump(&self.counters.classifier_consults);
        match self.classifier.classify(&msg.group_jid, text).await {
            Ok(result) if result.relevant && result.confidence >= 0.8 => {
                self.notifier.notify(&format!(
                    "💡 [{}] possível gatilho não mapeado ({}): {}",
                    msg.group_name,
                    result.label,
                    text,
                ));
            }
            Ok(_) => {}
            Err(refusal) => debug!(?refusal, "classifier refused observation"),
        }
    }

    async fn with_busy_retry<F, Fut>(&self, mut op: F) -> BotResult<DealOutcome>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = BotResult<DealOutcome>>,
    {
        let mut attempts = 0;
        loop {
            match op().await {
                Err(BotError::Busy(reason)) if attempts < BUSY_RETRIES => {
                    attempts += 1;
                    debug!(reason, attempts, "deal lock busy, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                }
                other => return other,
            }
        }
    }
}

/// Cheap pre-filter before spending classifier quota.
fn looks_otc_relevant(text: &str) -> bool {
    let lowered = text.to_lowercase();
    [
        "usdt", "dolar", "dólar", "preço", "preco", "cotação", "cotacao", "compra", "venda",
        "trava", "fechar",
    ]
    .iter()
    .any(|kw| lowered.contains(kw))
}

fn lock_confirmation(deal: &crate::models::Deal) -> String {
    let rate = deal.locked_rate.unwrap_or(deal.quoted_rate);
    match (deal.amount_brl, deal.amount_usdt) {
        (Some(brl), Some(usdt)) => format!(
            "🔒 Travado: R$ {} | R$ {} = {} USDT",
            format_rate(rate),
            format_amount(brl),
            format_amount(usdt),
        ),
        _ => format!("🔒 Travado: R$ {}", format_rate(rate)),
    }
}

fn amount_confirmation(deal: &crate::models::Deal) -> String {
    match (deal.amount_brl, deal.amount_usdt) {
        (Some(brl), Some(usdt)) => format!(
            "🧮 R$ {} = {} USDT (R$ {})",
            format_amount(brl),
            format_amount(usdt),
            format_rate(deal.effective_rate()),
        ),
        _ => format!("R$ {}", format_rate(deal.effective_rate())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{FeedSource, PriceAggregator, SYMBOL_USDT_BRL};
    use crate::models::SpreadMode;
    use crate::rules::SpreadResolver;
    use crate::storage::bronze::BronzeSink;
    use crate::storage::Store;
    use crate::transport::InMemoryTransport;
    use rust_decimal_macros::dec;

    struct Harness {
        pipeline: Arc<Pipeline>,
        transport: Arc<InMemoryTransport>,
        gateway: Arc<Gateway>,
        status: BotStatus,
        engine: Arc<DealEngine>,
    }

    fn harness(price: f64) -> Harness {
        let store = Store::open_in_memory().unwrap();
        let gateway = Gateway::new(store.clone());
        let sink = BronzeSink::new();
        let aggregator = PriceAggregator::new(120_000, sink.clone());
        aggregator.record_sample(FeedSource::StreamA, SYMBOL_USDT_BRL, price, None, None);
        let resolver = SpreadResolver::new(gateway.clone());
        let transport = InMemoryTransport::new();
        let notifier = Notifier::new(transport.clone());
        let status = BotStatus::new();
        let errors = ErrorService::new(status.clone(), notifier.clone());
        let engine = DealEngine::new(
            gateway.clone(),
            aggregator,
            resolver,
            sink,
            notifier.clone(),
        );
        let matcher = TriggerMatcher::new(gateway.clone());
        let classifier = AiClassifier::new(None, store);
        let suppression = Arc::new(SuppressionGuard::new());
        let counters = Counters::new();

        let pipeline = Pipeline::new(
            "mesa".into(),
            gateway.clone(),
            matcher,
            engine.clone(),
            status.clone(),
            suppression,
            transport.clone(),
            notifier,
            errors,
            classifier,
            counters,
        );
        Harness {
            pipeline,
            transport,
            gateway,
            status,
            engine,
        }
    }

    fn msg(group: &str, group_name: &str, sender: &str, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            group_jid: group.into(),
            group_name: group_name.into(),
            sender_jid: sender.into(),
            sender_name: None,
            text: text.into(),
            attachments: Vec::new(),
            timestamp_ms: Utc::now().timestamp_millis(),
            raw: serde_json::Value::Null,
        }
    }

    fn activate(gateway: &Gateway, group: &str) {
        let mut config = (*gateway.config_for(group).unwrap()).clone();
        config.mode = GroupMode::Active;
        config.spread_mode = SpreadMode::Bps;
        config.sell_spread = dec!(50);
        config.buy_spread = dec!(0);
        gateway.store().upsert_config(&config).unwrap();
        gateway.invalidate_config(group);
    }

    #[tokio::test]
    async fn happy_quote_scenario() {
        let h = harness(5.20);
        // Discover the group, then flip it active with the scenario spread.
        h.pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "bom dia"))
            .await
            .unwrap();
        activate(&h.gateway, "g1");

        let report = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "preço"))
            .await
            .unwrap();
        assert_eq!(report.route, Route::Triggered);
        assert_eq!(report.responses, vec!["R$ 5,2260".to_string()]);

        let deal = h.engine.active_deal_for("g1", "client@jid").unwrap().unwrap();
        assert_eq!(deal.state, DealState::Quoted);
        assert_eq!(deal.quoted_rate, dec!(5.2260));
        assert_eq!((deal.ttl_expires_at - deal.created_at).num_seconds(), 180);
    }

    #[tokio::test]
    async fn lock_with_amount_scenario() {
        let h = harness(5.20);
        h.pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "oi"))
            .await
            .unwrap();
        activate(&h.gateway, "g1");
        h.pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "preço"))
            .await
            .unwrap();

        let report = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "trava 10000"))
            .await
            .unwrap();
        assert_eq!(report.route, Route::Deal);
        assert_eq!(report.responses.len(), 1);

        let deal = h.engine.active_deal_for("g1", "client@jid").unwrap().unwrap();
        assert_eq!(deal.state, DealState::Locked);
        assert_eq!(deal.locked_rate, Some(dec!(5.2260)));
        assert_eq!(deal.amount_brl, Some(dec!(10000)));
        assert_eq!(deal.amount_usdt, Some(dec!(1913.50)));
    }

    #[tokio::test]
    async fn control_pause_silences_triggers() {
        let h = harness(5.20);
        // Control group by name pattern.
        let report = h
            .pipeline
            .process(&msg("ctl", "Mesa Operações", "op@jid", "pause"))
            .await
            .unwrap();
        assert_eq!(report.route, Route::Control);
        assert!(h.status.is_paused());
        assert_eq!(
            h.status.snapshot().pause_reason.as_deref(),
            Some("manual")
        );

        h.pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "oi"))
            .await
            .unwrap();
        activate(&h.gateway, "g1");

        let report = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "preço"))
            .await
            .unwrap();
        // Trigger downgrades to observe while paused, message still logged.
        assert_eq!(report.route, Route::Observe);
        assert!(report.responses.is_empty());
        assert!(h.engine.active_deal_for("g1", "client@jid").unwrap().is_none());

        // Resume restores quoting.
        h.pipeline
            .process(&msg("ctl", "Mesa Operações", "op@jid", "resume"))
            .await
            .unwrap();
        assert!(!h.status.is_paused());
        let report = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "preço"))
            .await
            .unwrap();
        assert_eq!(report.route, Route::Triggered);
    }

    #[tokio::test]
    async fn cancellation_frees_the_slot() {
        let h = harness(5.20);
        h.pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "oi"))
            .await
            .unwrap();
        activate(&h.gateway, "g1");
        h.pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "preço"))
            .await
            .unwrap();

        let report = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "cancela"))
            .await
            .unwrap();
        assert_eq!(report.route, Route::Deal);
        assert!(h.engine.active_deal_for("g1", "client@jid").unwrap().is_none());

        // New quote opens a fresh deal.
        let report = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "preço"))
            .await
            .unwrap();
        assert_eq!(report.route, Route::Triggered);
        assert!(h.engine.active_deal_for("g1", "client@jid").unwrap().is_some());
    }

    #[tokio::test]
    async fn learning_mode_observes_only() {
        let h = harness(5.20);
        h.pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "oi"))
            .await
            .unwrap();
        // Default mode is learning.
        let report = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "preço"))
            .await
            .unwrap();
        assert_eq!(report.route, Route::Triggered);
        assert!(report.responses.is_empty());
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn ignored_sender_is_ignored() {
        let h = harness(5.20);
        h.pipeline
            .process(&msg("g1", "OTC Desk", "client@jid", "oi"))
            .await
            .unwrap();
        activate(&h.gateway, "g1");

        let mut config = (*h.gateway.config_for("g1").unwrap()).clone();
        config
            .player_roles
            .insert("spam@jid".into(), "ignored".into());
        h.gateway.store().upsert_config(&config).unwrap();
        h.gateway.invalidate_config("g1");

        let report = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "spam@jid", "preço"))
            .await
            .unwrap();
        assert_eq!(report.route, Route::Ignore);
        assert!(report.responses.is_empty());
    }

    #[tokio::test]
    async fn second_quote_suppressed_within_cooldown() {
        let h = harness(5.20);
        h.pipeline
            .process(&msg("g1", "OTC Desk", "c1@jid", "oi"))
            .await
            .unwrap();
        activate(&h.gateway, "g1");

        let first = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "c1@jid", "preço"))
            .await
            .unwrap();
        assert_eq!(first.responses.len(), 1);

        // A different client triggers immediately after; the quote class
        // is cooling down, so the reply is dropped but the deal exists.
        let second = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "c2@jid", "preço"))
            .await
            .unwrap();
        assert_eq!(second.route, Route::Triggered);
        assert!(second.responses.is_empty());
        assert!(h.engine.active_deal_for("g1", "c2@jid").unwrap().is_some());

        // But a lock confirmation still goes out (deal-state class).
        let lock = h
            .pipeline
            .process(&msg("g1", "OTC Desk", "c1@jid", "trava"))
            .await
            .unwrap();
        assert_eq!(lock.responses.len(), 1);
    }
}

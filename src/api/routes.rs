//! API handlers.

use super::{ApiError, ApiResult, AppState};
use crate::errors::BotError;
use crate::models::{
    ActionType, ActiveWindow, Currency, DealSide, GroupMode, Language, PatternType,
    PricingSource, SpreadMode, TimeRule, Trigger, TriggerScope,
};
use crate::triggers::compile_pattern;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub async fn health_check() -> &'static str {
    "🤖 OTC bot operational"
}

/// Transport ingress: the external messaging client delivers inbound
/// group events here; they enter the per-group queues and the call
/// returns immediately.
pub async fn post_inbound(
    State(state): State<AppState>,
    Json(msg): Json<crate::models::InboundMessage>,
) -> ApiResult<Json<serde_json::Value>> {
    if msg.message_id.trim().is_empty() || msg.group_jid.trim().is_empty() {
        return Err(BotError::validation("messageId and groupJid are required").into());
    }
    state.inbound.submit_inbound(msg);
    Ok(Json(serde_json::json!({ "accepted": true })))
}

// ----------------------------------------------------------------------
// status

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub connection: bool,
    pub uptime_ms: i64,
    pub messages_today: i64,
    pub group_mode_counts: HashMap<String, usize>,
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub paused_at: Option<chrono::DateTime<Utc>>,
    pub counters: crate::observability::CountersSnapshot,
    pub bronze_dropped: u64,
    pub prices_rejected: u64,
    pub notifier_dropped: u64,
}

pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let snap = state.status.snapshot();
    let day_start = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now);
    let messages_today = state.gateway.store().messages_sent_since(day_start)?;

    let mut group_mode_counts: HashMap<String, usize> = HashMap::new();
    for group in state.gateway.store().list_groups()? {
        let config = state.gateway.config_for(&group.jid)?;
        *group_mode_counts
            .entry(config.mode.as_str().to_string())
            .or_insert(0) += 1;
    }

    Ok(Json(StatusResponse {
        connection: state.transport.is_connected(),
        uptime_ms: snap.uptime_ms,
        messages_today,
        group_mode_counts,
        paused: snap.pause_reason.is_some(),
        pause_reason: snap.pause_reason,
        paused_at: snap.paused_at,
        counters: state.counters.snapshot(),
        bronze_dropped: state.sink.dropped_count(),
        prices_rejected: state.aggregator.rejected_count(),
        notifier_dropped: state.notifier.dropped_count(),
    }))
}

// ----------------------------------------------------------------------
// groups

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub jid: String,
    pub name: String,
    pub is_control_group: bool,
    pub mode: GroupMode,
    pub learning_days: Option<i64>,
    pub active_rule_count: usize,
    pub last_activity_at: chrono::DateTime<Utc>,
    pub message_count: i64,
}

pub async fn get_groups(State(state): State<AppState>) -> ApiResult<Json<Vec<GroupSummary>>> {
    let mut summaries = Vec::new();
    for group in state.gateway.store().list_groups()? {
        let config = state.gateway.config_for(&group.jid)?;
        let rules = state.gateway.store().list_rules(&group.jid)?;
        let learning_days = config
            .learning_started_at
            .map(|started| (Utc::now() - started).num_days());
        summaries.push(GroupSummary {
            jid: group.jid,
            name: group.name,
            is_control_group: group.is_control_group,
            mode: config.mode,
            learning_days,
            active_rule_count: rules.iter().filter(|r| r.is_active).count(),
            last_activity_at: group.last_activity_at,
            message_count: group.message_count,
        });
    }
    Ok(Json(summaries))
}

#[derive(Deserialize)]
pub struct ModeBody {
    pub mode: String,
}

pub async fn put_group_mode(
    State(state): State<AppState>,
    Path(jid): Path<String>,
    Json(body): Json<ModeBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let mode = GroupMode::parse(&body.mode)
        .ok_or_else(|| BotError::validation(format!("invalid mode: {}", body.mode)))?;
    require_group(&state, &jid)?;

    let mut config = (*state.gateway.config_for(&jid)?).clone();
    config.mode = mode;
    if mode == GroupMode::Learning && config.learning_started_at.is_none() {
        config.learning_started_at = Some(Utc::now());
    }
    config.updated_at = Utc::now();
    // Persisted before it takes effect for subsequent messages.
    state.gateway.store().upsert_config(&config)?;
    state.gateway.invalidate_config(&jid);

    Ok(Json(serde_json::json!({ "jid": jid, "mode": mode.as_str() })))
}

fn require_group(state: &AppState, jid: &str) -> Result<(), ApiError> {
    match state.gateway.store().get_group(jid)? {
        Some(_) => Ok(()),
        None => Err(BotError::not_found(format!("group {jid}")).into()),
    }
}

// ----------------------------------------------------------------------
// volatility

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolatilityBody {
    pub enabled: bool,
    pub threshold_bps: u32,
    pub max_reprices: u32,
}

pub async fn get_volatility(
    State(state): State<AppState>,
    Path(jid): Path<String>,
) -> ApiResult<Json<VolatilityBody>> {
    require_group(&state, &jid)?;
    let config = state.gateway.config_for(&jid)?;
    Ok(Json(VolatilityBody {
        enabled: config.volatility.enabled,
        threshold_bps: config.volatility.threshold_bps,
        max_reprices: config.volatility.max_reprices,
    }))
}

pub async fn put_volatility(
    State(state): State<AppState>,
    Path(jid): Path<String>,
    Json(body): Json<VolatilityBody>,
) -> ApiResult<Json<VolatilityBody>> {
    if !(10..=1000).contains(&body.threshold_bps) {
        return Err(BotError::validation("thresholdBps must be 10..1000").into());
    }
    if !(1..=10).contains(&body.max_reprices) {
        return Err(BotError::validation("maxReprices must be 1..10").into());
    }
    require_group(&state, &jid)?;

    let mut config = (*state.gateway.config_for(&jid)?).clone();
    config.volatility.enabled = body.enabled;
    config.volatility.threshold_bps = body.threshold_bps;
    config.volatility.max_reprices = body.max_reprices;
    config.updated_at = Utc::now();
    state.gateway.store().upsert_config(&config)?;
    state.gateway.invalidate_config(&jid);

    Ok(Json(body))
}

// ----------------------------------------------------------------------
// spread / full config

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadConfigBody {
    pub spread_mode: String,
    pub sell_spread: Decimal,
    pub buy_spread: Decimal,
    pub quote_ttl_seconds: u32,
    pub default_side: String,
    pub default_currency: String,
    pub language: String,
    #[serde(default)]
    pub player_roles: HashMap<String, String>,
}

pub async fn get_spread(
    State(state): State<AppState>,
    Path(jid): Path<String>,
) -> ApiResult<Json<SpreadConfigBody>> {
    require_group(&state, &jid)?;
    let config = state.gateway.config_for(&jid)?;
    Ok(Json(SpreadConfigBody {
        spread_mode: config.spread_mode.as_str().to_string(),
        sell_spread: config.sell_spread,
        buy_spread: config.buy_spread,
        quote_ttl_seconds: config.quote_ttl_seconds,
        default_side: config.default_side.as_str().to_string(),
        default_currency: config.default_currency.as_str().to_string(),
        language: config.language.as_str().to_string(),
        player_roles: config.player_roles.clone(),
    }))
}

pub async fn put_spread(
    State(state): State<AppState>,
    Path(jid): Path<String>,
    Json(body): Json<SpreadConfigBody>,
) -> ApiResult<Json<SpreadConfigBody>> {
    let spread_mode = SpreadMode::parse(&body.spread_mode)
        .ok_or_else(|| BotError::validation(format!("invalid spreadMode: {}", body.spread_mode)))?;
    let default_side = DealSide::parse(&body.default_side)
        .ok_or_else(|| BotError::validation(format!("invalid defaultSide: {}", body.default_side)))?;
    let default_currency = Currency::parse(&body.default_currency).ok_or_else(|| {
        BotError::validation(format!("invalid defaultCurrency: {}", body.default_currency))
    })?;
    let language = Language::parse(&body.language)
        .ok_or_else(|| BotError::validation(format!("invalid language: {}", body.language)))?;
    if !(1..=3600).contains(&body.quote_ttl_seconds) {
        return Err(BotError::validation("quoteTtlSeconds must be 1..3600").into());
    }
    require_group(&state, &jid)?;

    let mut config = (*state.gateway.config_for(&jid)?).clone();
    config.spread_mode = spread_mode;
    config.sell_spread = body.sell_spread;
    config.buy_spread = body.buy_spread;
    config.quote_ttl_seconds = body.quote_ttl_seconds;
    config.default_side = default_side;
    config.default_currency = default_currency;
    config.language = language;
    config.player_roles = body.player_roles.clone();
    config.updated_at = Utc::now();
    state.gateway.store().upsert_config(&config)?;
    state.gateway.invalidate_config(&jid);

    Ok(Json(body))
}

// ----------------------------------------------------------------------
// triggers

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    pub trigger_phrase: String,
    pub pattern_type: String,
    pub action_type: String,
    #[serde(default)]
    pub action_params: serde_json::Value,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_priority() -> u32 {
    50
}

fn default_true() -> bool {
    true
}

struct ValidatedTrigger {
    phrase: String,
    pattern_type: PatternType,
    action_type: ActionType,
    action_params: serde_json::Value,
    priority: u32,
    is_active: bool,
    scope: TriggerScope,
}

fn validate_trigger(body: &TriggerBody) -> Result<ValidatedTrigger, BotError> {
    let phrase = body.trigger_phrase.trim().to_string();
    if phrase.is_empty() || phrase.len() > 200 {
        return Err(BotError::validation("triggerPhrase must be 1..200 chars"));
    }
    let pattern_type = PatternType::parse(&body.pattern_type)
        .ok_or_else(|| BotError::validation(format!("invalid patternType: {}", body.pattern_type)))?;
    if pattern_type == PatternType::Regex {
        compile_pattern(&phrase)
            .map_err(|e| BotError::validation(format!("regex does not compile: {e}")))?;
    }
    let action_type = ActionType::parse(&body.action_type)
        .ok_or_else(|| BotError::validation(format!("invalid actionType: {}", body.action_type)))?;
    if body.priority > 100 {
        return Err(BotError::validation("priority must be 0..100"));
    }
    match action_type {
        ActionType::TextResponse => {
            let ok = body
                .action_params
                .get("text")
                .and_then(|v| v.as_str())
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !ok {
                return Err(BotError::validation("text_response requires non-empty text"));
            }
        }
        ActionType::AiPrompt => {
            let ok = body
                .action_params
                .get("prompt")
                .and_then(|v| v.as_str())
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if !ok {
                return Err(BotError::validation("ai_prompt requires non-empty prompt"));
            }
        }
        _ => {}
    }
    let scope = match body.scope.as_deref() {
        None | Some("") => TriggerScope::Group,
        Some(raw) => TriggerScope::parse(raw)
            .ok_or_else(|| BotError::validation(format!("invalid scope: {raw}")))?,
    };
    let action_params = if body.action_params.is_null() {
        serde_json::json!({})
    } else {
        body.action_params.clone()
    };
    Ok(ValidatedTrigger {
        phrase,
        pattern_type,
        action_type,
        action_params,
        priority: body.priority,
        is_active: body.is_active,
        scope,
    })
}

pub async fn get_triggers(
    State(state): State<AppState>,
    Path(jid): Path<String>,
) -> ApiResult<Json<Vec<Trigger>>> {
    require_group(&state, &jid)?;
    let triggers = state.gateway.store().list_triggers(&jid)?;
    Ok(Json(triggers))
}

pub async fn post_trigger(
    State(state): State<AppState>,
    Path(jid): Path<String>,
    Json(body): Json<TriggerBody>,
) -> ApiResult<(StatusCode, Json<Trigger>)> {
    require_group(&state, &jid)?;
    let validated = validate_trigger(&body)?;

    let mut trigger = Trigger {
        id: 0,
        group_jid: jid.clone(),
        phrase: validated.phrase,
        pattern_type: validated.pattern_type,
        action_type: validated.action_type,
        action_params: validated.action_params,
        priority: validated.priority,
        is_active: validated.is_active,
        is_system: false,
        scope: validated.scope,
        created_at: Utc::now(),
    };
    trigger.id = state.gateway.store().insert_trigger(&trigger)?;
    state.gateway.invalidate_triggers(&jid);
    Ok((StatusCode::CREATED, Json(trigger)))
}

pub async fn put_trigger(
    State(state): State<AppState>,
    Path((jid, id)): Path<(String, i64)>,
    Json(body): Json<TriggerBody>,
) -> ApiResult<Json<Trigger>> {
    require_group(&state, &jid)?;
    // Cross-group access is a 404, not a conflict.
    let existing = state
        .gateway
        .store()
        .get_trigger(&jid, id)?
        .ok_or_else(|| BotError::not_found(format!("trigger {id}")))?;
    let validated = validate_trigger(&body)?;

    let updated = Trigger {
        id,
        group_jid: jid.clone(),
        phrase: validated.phrase,
        pattern_type: validated.pattern_type,
        action_type: validated.action_type,
        action_params: validated.action_params,
        priority: validated.priority,
        is_active: validated.is_active,
        is_system: existing.is_system,
        scope: validated.scope,
        created_at: existing.created_at,
    };
    if !state.gateway.store().update_trigger(&updated)? {
        return Err(BotError::not_found(format!("trigger {id}")).into());
    }
    state.gateway.invalidate_triggers(&jid);
    Ok(Json(updated))
}

pub async fn delete_trigger(
    State(state): State<AppState>,
    Path((jid, id)): Path<(String, i64)>,
) -> ApiResult<StatusCode> {
    require_group(&state, &jid)?;
    if !state.gateway.store().delete_trigger(&jid, id)? {
        return Err(BotError::not_found(format!("trigger {id}")).into());
    }
    state.gateway.invalidate_triggers(&jid);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct TriggerTestBody {
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerTestResponse {
    pub matched: Option<Trigger>,
    pub active_rule: Option<String>,
    pub dry_run: String,
}

pub async fn post_trigger_test(
    State(state): State<AppState>,
    Path(jid): Path<String>,
    Json(body): Json<TriggerTestBody>,
) -> ApiResult<Json<TriggerTestResponse>> {
    require_group(&state, &jid)?;
    let group = state
        .gateway
        .store()
        .get_group(&jid)?
        .ok_or_else(|| BotError::not_found(format!("group {jid}")))?;

    let hit = state
        .matcher
        .find_match(&jid, &body.message, group.is_control_group)?;
    let snapshot = state.resolver.resolve(&jid, Utc::now())?;

    let dry_run = match &hit {
        None => "no trigger matched; message would be observed".to_string(),
        Some(hit) => match hit.trigger.action_type {
            ActionType::Quote => match state.aggregator.resolve_mid(snapshot.pricing_source) {
                Some(view) if !view.stale => {
                    use rust_decimal::prelude::FromPrimitive;
                    let mid = Decimal::from_f64(view.price)
                        .unwrap_or_default()
                        .trunc_with_scale(4);
                    let quoted = crate::pricing::apply_spread(
                        mid,
                        snapshot.default_side,
                        snapshot.spread_mode,
                        snapshot.sell_spread,
                        snapshot.buy_spread,
                    );
                    format!(
                        "would quote R$ {} (mid {}, source {})",
                        crate::pricing::format_rate(quoted),
                        mid,
                        snapshot.pricing_source.as_str(),
                    )
                }
                _ => "would fail: no fresh price for the resolved source".to_string(),
            },
            other => format!("would run action {}", other.as_str()),
        },
    };

    Ok(Json(TriggerTestResponse {
        matched: hit.map(|h| h.trigger),
        active_rule: snapshot.rule_name,
        dry_run,
    }))
}

// ----------------------------------------------------------------------
// rules

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBody {
    pub group_jid: Option<String>,
    pub name: String,
    pub pricing_source: String,
    pub spread_mode: String,
    pub sell_spread: Decimal,
    pub buy_spread: Decimal,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub active_window: ActiveWindow,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn validate_rule(body: &RuleBody) -> Result<(PricingSource, SpreadMode), BotError> {
    if body.name.trim().is_empty() {
        return Err(BotError::validation("name is required"));
    }
    let source = PricingSource::parse(&body.pricing_source).ok_or_else(|| {
        BotError::validation(format!("invalid pricingSource: {}", body.pricing_source))
    })?;
    let mode = SpreadMode::parse(&body.spread_mode)
        .ok_or_else(|| BotError::validation(format!("invalid spreadMode: {}", body.spread_mode)))?;
    if body.priority > 100 {
        return Err(BotError::validation("priority must be 0..100"));
    }
    if body.active_window.days.is_empty()
        || body.active_window.days.iter().any(|d| !(1..=7).contains(d))
    {
        return Err(BotError::validation("activeWindow.days must be 1..7"));
    }
    if body.active_window.start_minute >= body.active_window.end_minute
        || body.active_window.end_minute > 24 * 60
    {
        return Err(BotError::validation("activeWindow minutes out of range"));
    }
    Ok((source, mode))
}

pub async fn get_rules(
    State(state): State<AppState>,
    Path(jid): Path<String>,
) -> ApiResult<Json<Vec<TimeRule>>> {
    require_group(&state, &jid)?;
    Ok(Json(state.gateway.store().list_rules(&jid)?))
}

pub async fn post_rule(
    State(state): State<AppState>,
    Json(body): Json<RuleBody>,
) -> ApiResult<(StatusCode, Json<TimeRule>)> {
    let jid = body
        .group_jid
        .clone()
        .ok_or_else(|| BotError::validation("groupJid is required"))?;
    require_group(&state, &jid)?;
    let (source, mode) = validate_rule(&body)?;

    let mut rule = TimeRule {
        id: 0,
        group_jid: jid,
        name: body.name.trim().to_string(),
        pricing_source: source,
        spread_mode: mode,
        sell_spread: body.sell_spread,
        buy_spread: body.buy_spread,
        priority: body.priority,
        active_window: body.active_window,
        is_system: false,
        is_active: body.is_active,
        created_at: Utc::now(),
    };
    rule.id = state.gateway.store().insert_rule(&rule)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn put_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RuleBody>,
) -> ApiResult<Json<TimeRule>> {
    let existing = state
        .gateway
        .store()
        .get_rule(id)?
        .ok_or_else(|| BotError::not_found(format!("rule {id}")))?;
    let (source, mode) = validate_rule(&body)?;

    let updated = TimeRule {
        id,
        group_jid: existing.group_jid,
        name: body.name.trim().to_string(),
        pricing_source: source,
        spread_mode: mode,
        sell_spread: body.sell_spread,
        buy_spread: body.buy_spread,
        priority: body.priority,
        active_window: body.active_window,
        is_system: existing.is_system,
        is_active: body.is_active,
        created_at: existing.created_at,
    };
    state.gateway.store().update_rule(&updated)?;
    Ok(Json(updated))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Response {
    let existing = match state.gateway.store().get_rule(id) {
        Ok(Some(rule)) => rule,
        Ok(None) => return ApiError(BotError::not_found(format!("rule {id}"))).into_response(),
        Err(e) => return ApiError(e).into_response(),
    };
    if existing.is_system {
        // System rules can only be disabled.
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({
                "error": "forbidden",
                "message": "system rules cannot be deleted, only disabled",
            })),
        )
            .into_response();
    }
    match state.gateway.store().delete_rule(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

// ----------------------------------------------------------------------
// deals

pub async fn get_deals(
    State(state): State<AppState>,
    Path(jid): Path<String>,
) -> ApiResult<Json<Vec<crate::models::Deal>>> {
    require_group(&state, &jid)?;
    Ok(Json(state.gateway.store().list_active_deals(Some(&jid))?))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    100
}

pub async fn get_deal_history(
    State(state): State<AppState>,
    Path(jid): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<crate::models::DealHistoryRecord>>> {
    require_group(&state, &jid)?;
    let limit = query.limit.clamp(1, 1000);
    Ok(Json(state.gateway.store().list_deal_history(&jid, limit)?))
}

fn require_deal_in_group(
    state: &AppState,
    jid: &str,
    deal_id: &str,
) -> Result<(), ApiError> {
    let in_group = state
        .engine
        .get(deal_id)?
        .map(|d| d.group_jid == jid)
        .unwrap_or(false);
    if in_group {
        Ok(())
    } else {
        Err(BotError::not_found(format!("deal {deal_id}")).into())
    }
}

pub async fn post_deal_cancel(
    State(state): State<AppState>,
    Path((jid, deal_id)): Path<(String, String)>,
) -> ApiResult<Json<crate::models::Deal>> {
    require_deal_in_group(&state, &jid, &deal_id)?;
    let outcome = state.engine.cancel(&deal_id, "operator via dashboard").await?;
    Ok(Json(outcome.deal))
}

#[derive(Deserialize)]
pub struct ExtendBody {
    pub seconds: i64,
}

pub async fn post_deal_extend(
    State(state): State<AppState>,
    Path((jid, deal_id)): Path<(String, String)>,
    Json(body): Json<ExtendBody>,
) -> ApiResult<Json<crate::models::Deal>> {
    require_deal_in_group(&state, &jid, &deal_id)?;
    let outcome = state.engine.extend(&deal_id, body.seconds).await?;
    Ok(Json(outcome.deal))
}

pub async fn post_deal_sweep(
    State(state): State<AppState>,
    Path(jid): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_group(&state, &jid)?;
    let swept = state.engine.sweep().await?;
    Ok(Json(serde_json::json!({ "swept": swept })))
}

// ----------------------------------------------------------------------
// transport session (auth backing store for the external client)

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBody {
    pub auth_state: serde_json::Value,
}

pub async fn get_transport_session(
    State(state): State<AppState>,
) -> ApiResult<Json<SessionBody>> {
    let raw = state
        .gateway
        .store()
        .get_session_auth()?
        .ok_or_else(|| BotError::not_found("no stored transport session"))?;
    let auth_state =
        serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
    Ok(Json(SessionBody { auth_state }))
}

pub async fn put_transport_session(
    State(state): State<AppState>,
    Json(body): Json<SessionBody>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.auth_state.is_null() {
        return Err(BotError::validation("authState is required").into());
    }
    state
        .gateway
        .store()
        .set_session_auth(&body.auth_state.to_string(), Utc::now())?;
    Ok(Json(serde_json::json!({ "stored": true })))
}

// ----------------------------------------------------------------------
// prices

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEntry {
    pub source: &'static str,
    pub symbol: &'static str,
    pub price: Option<f64>,
    pub age_ms: Option<i64>,
    pub stale: Option<bool>,
}

pub async fn get_prices_current(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<PriceEntry>>> {
    use crate::feeds::{FeedSource, SYMBOL_USDT_BRL, SYMBOL_USD_BRL};

    // All reads are from the in-memory aggregator; upstream REST quotas
    // are already shielded by the poller's staleness gate.
    let entries = [
        (FeedSource::StreamA, SYMBOL_USDT_BRL),
        (FeedSource::StreamB, SYMBOL_USD_BRL),
        (FeedSource::RestFallback, SYMBOL_USDT_BRL),
        (FeedSource::RestFallback, SYMBOL_USD_BRL),
    ]
    .into_iter()
    .map(|(source, symbol)| {
        let view = state.aggregator.get_price(source, symbol);
        PriceEntry {
            source: source.as_str(),
            symbol,
            price: view.map(|v| v.price),
            age_ms: view.map(|v| v.age_ms),
            stale: view.map(|v| v.stale),
        }
    })
    .collect();

    Ok(Json(entries))
}

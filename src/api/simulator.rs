//! Dashboard simulator.
//!
//! Routes synthetic messages through the real pipeline against an
//! in-memory overlay: the target group's config and triggers are copied
//! into a fresh store, prices come from the live aggregator, and sends
//! land in a capturing transport. The live deal book and suppression
//! state are never touched.

use super::{ApiResult, AppState};
use crate::classifier::AiClassifier;
use crate::deals::DealEngine;
use crate::errors::BotError;
use crate::error_service::ErrorService;
use crate::handlers::Pipeline;
use crate::models::InboundMessage;
use crate::notifier::Notifier;
use crate::observability::Counters;
use crate::router::Route;
use crate::rules::SpreadResolver;
use crate::status::BotStatus;
use crate::storage::bronze::BronzeSink;
use crate::storage::gateway::Gateway;
use crate::storage::Store;
use crate::suppression::SuppressionGuard;
use crate::transport::InMemoryTransport;
use crate::triggers::TriggerMatcher;
use axum::{extract::State, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Clone the group's rows into a throwaway store and assemble a pipeline
/// around it.
fn build_overlay(state: &AppState, group_jid: &str) -> Result<Arc<Pipeline>, BotError> {
    let overlay_store = Store::open_in_memory()
        .map_err(|e| BotError::Fatal(format!("overlay store: {e}")))?;

    if let Some(group) = state.gateway.store().get_group(group_jid)? {
        overlay_store.touch_group(&group.jid, &group.name, group.is_control_group, Utc::now())?;
    }
    if let Some(config) = state.gateway.store().get_config(group_jid)? {
        overlay_store.upsert_config(&config)?;
    }
    for trigger in state.gateway.store().list_triggers(group_jid)? {
        let _ = overlay_store.insert_trigger(&trigger);
    }

    let gateway = Gateway::new(overlay_store.clone());
    let sink = BronzeSink::new();
    let resolver = SpreadResolver::new(gateway.clone());
    let transport = InMemoryTransport::new();
    let notifier = Notifier::new(transport.clone());
    let status = BotStatus::new();
    let errors = ErrorService::new(status.clone(), notifier.clone());
    let engine = DealEngine::new(
        gateway.clone(),
        state.aggregator.clone(),
        resolver,
        sink,
        notifier.clone(),
    );
    let matcher = TriggerMatcher::new(gateway.clone());
    let classifier = AiClassifier::new(None, overlay_store);

    Ok(Pipeline::new(
        state.config.control_group_pattern.clone(),
        gateway,
        matcher,
        engine,
        status,
        Arc::new(SuppressionGuard::new()),
        transport,
        notifier,
        errors,
        classifier,
        Counters::new(),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorSendBody {
    pub group_jid: String,
    pub sender_jid: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorResponse {
    pub route: Route,
    pub responses: Vec<String>,
    pub processing_time_ms: u64,
}

pub async fn post_simulator_send(
    State(state): State<AppState>,
    Json(body): Json<SimulatorSendBody>,
) -> ApiResult<Json<SimulatorResponse>> {
    if body.message.trim().is_empty() || body.group_jid.trim().is_empty() {
        return Err(BotError::validation("groupJid and message are required").into());
    }

    let pipeline = build_overlay(&state, &body.group_jid)?;
    let started = Instant::now();
    let report = pipeline
        .process(&InboundMessage {
            message_id: format!("sim-{}", uuid::Uuid::new_v4()),
            group_jid: body.group_jid.clone(),
            group_name: body.group_jid.clone(),
            sender_jid: body.sender_jid.clone(),
            sender_name: body.sender_name.clone(),
            text: body.message.clone(),
            attachments: Vec::new(),
            timestamp_ms: Utc::now().timestamp_millis(),
            raw: serde_json::Value::Null,
        })
        .await?;

    Ok(Json(SimulatorResponse {
        route: report.route,
        responses: report.responses,
        processing_time_ms: started.elapsed().as_millis() as u64,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorReplayBody {
    pub group_jid: String,
    #[serde(default = "default_replay_limit")]
    pub limit: usize,
}

fn default_replay_limit() -> usize {
    50
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStep {
    pub message: String,
    pub route: Route,
    pub responses: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorReplayResponse {
    pub steps: Vec<ReplayStep>,
    pub processing_time_ms: u64,
}

/// Replay the group's stored history through a single overlay so deal
/// state carries across messages like it did live.
pub async fn post_simulator_replay(
    State(state): State<AppState>,
    Json(body): Json<SimulatorReplayBody>,
) -> ApiResult<Json<SimulatorReplayResponse>> {
    let limit = body.limit.clamp(1, 500);
    let history = state
        .gateway
        .store()
        .recent_messages(&body.group_jid, limit)?;
    if history.is_empty() {
        return Err(BotError::not_found(format!(
            "no stored messages for group {}",
            body.group_jid
        ))
        .into());
    }

    let pipeline = build_overlay(&state, &body.group_jid)?;
    let started = Instant::now();
    let mut steps = Vec::with_capacity(history.len());

    for (message_id, sender_jid, sender_name, text) in history {
        let report = pipeline
            .process(&InboundMessage {
                message_id: format!("replay-{message_id}"),
                group_jid: body.group_jid.clone(),
                group_name: body.group_jid.clone(),
                sender_jid,
                sender_name,
                text: text.clone(),
                attachments: Vec::new(),
                timestamp_ms: Utc::now().timestamp_millis(),
                raw: serde_json::Value::Null,
            })
            .await?;
        steps.push(ReplayStep {
            message: text,
            route: report.route,
            responses: report.responses,
        });
    }

    Ok(Json(SimulatorReplayResponse {
        steps,
        processing_time_ms: started.elapsed().as_millis() as u64,
    }))
}

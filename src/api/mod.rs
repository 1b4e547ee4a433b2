//! Dashboard HTTP API.
//!
//! JSON in, JSON out; errors are `{error, message?}` with the taxonomy's
//! status codes. Write methods go through the dashboard-key middleware;
//! mode changes ride a stricter rate limit than the general API.

mod routes;
mod simulator;

use crate::deals::DealEngine;
use crate::dispatch::InboundSubmit;
use crate::errors::BotError;
use crate::feeds::PriceAggregator;
use crate::middleware::{
    dashboard_auth, rate_limit_middleware, AuthConfig, RateLimitConfig, RateLimitLayer,
};
use crate::models::Config;
use crate::notifier::Notifier;
use crate::observability::Counters;
use crate::rules::SpreadResolver;
use crate::status::BotStatus;
use crate::storage::bronze::BronzeSink;
use crate::storage::gateway::Gateway;
use crate::transport::Transport;
use crate::triggers::TriggerMatcher;
use axum::{
    http::{HeaderValue, StatusCode},
    middleware as axum_mw,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: Arc<Gateway>,
    pub engine: Arc<DealEngine>,
    pub matcher: Arc<TriggerMatcher>,
    pub resolver: Arc<SpreadResolver>,
    pub aggregator: Arc<PriceAggregator>,
    pub status: BotStatus,
    pub counters: Arc<Counters>,
    pub transport: Arc<dyn Transport>,
    pub sink: BronzeSink,
    pub notifier: Arc<Notifier>,
    pub inbound: Arc<dyn InboundSubmit>,
}

/// API error envelope.
pub struct ApiError(pub BotError);

impl From<BotError> for ApiError {
    fn from(err: BotError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status =
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match kind {
            crate::errors::ErrorKind::Unauthorized => {
                serde_json::json!({ "error": "Unauthorized" })
            }
            _ => serde_json::json!({
                "error": kind.as_str(),
                "message": self.0.to_string(),
            }),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Assemble the full router with auth, rate limits, and request logging.
pub fn router(state: AppState) -> Router {
    let auth = AuthConfig {
        secret: state.config.dashboard_secret.clone(),
    };
    let general_limit = RateLimitLayer::new(RateLimitConfig::general());
    let mode_limit = RateLimitLayer::new(RateLimitConfig::mode_changes());

    // Mode changes ride their own, stricter limiter.
    let mode_routes = Router::new()
        .route("/api/groups/:jid/mode", put(routes::put_group_mode))
        .route_layer(axum_mw::from_fn_with_state(
            mode_limit,
            rate_limit_middleware,
        ))
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/groups", get(routes::get_groups))
        .route(
            "/api/groups/:jid/volatility",
            get(routes::get_volatility)
                .put(routes::put_volatility)
                .post(routes::put_volatility),
        )
        .route(
            "/api/groups/:jid/spread",
            get(routes::get_spread).put(routes::put_spread),
        )
        .route(
            "/api/groups/:jid/triggers",
            get(routes::get_triggers).post(routes::post_trigger),
        )
        .route(
            "/api/groups/:jid/triggers/:id",
            put(routes::put_trigger).delete(routes::delete_trigger),
        )
        .route(
            "/api/groups/:jid/triggers/test",
            post(routes::post_trigger_test),
        )
        .route("/api/rules", post(routes::post_rule))
        .route(
            "/api/rules/:id",
            put(routes::put_rule).delete(routes::delete_rule),
        )
        .route("/api/groups/:jid/rules", get(routes::get_rules))
        .route("/api/groups/:jid/deals", get(routes::get_deals))
        .route("/api/groups/:jid/deal-history", get(routes::get_deal_history))
        .route(
            "/api/groups/:jid/deals/:deal_id/cancel",
            post(routes::post_deal_cancel),
        )
        .route(
            "/api/groups/:jid/deals/:deal_id/extend",
            post(routes::post_deal_extend),
        )
        .route("/api/groups/:jid/deals/sweep", post(routes::post_deal_sweep))
        .route("/api/prices/current", get(routes::get_prices_current))
        .route("/api/transport/inbound", post(routes::post_inbound))
        .route(
            "/api/transport/session",
            get(routes::get_transport_session).put(routes::put_transport_session),
        )
        .route("/api/simulator/send", post(simulator::post_simulator_send))
        .route(
            "/api/simulator/replay",
            post(simulator::post_simulator_replay),
        )
        .route_layer(axum_mw::from_fn_with_state(
            general_limit,
            rate_limit_middleware,
        ))
        .with_state(state.clone());

    let cors = if state.config.allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(routes::health_check))
        .merge(mode_routes)
        .merge(api_routes)
        .layer(axum_mw::from_fn_with_state(auth, dashboard_auth))
        .layer(cors)
        .layer(axum_mw::from_fn(
            crate::middleware::request_logging_simple,
        ))
}

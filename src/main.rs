//! OTC desk assist bot.
//!
//! Composition root: wires the store, caches, price feeds, deal engine,
//! dispatcher, background services, and the dashboard API, then serves
//! until a shutdown signal drains everything.

use anyhow::{Context, Result};
use otcbot_backend::{
    api::{self, AppState},
    classifier::{AiClassifier, HttpAiBackend},
    deals::{sweeper::Sweeper, volatility::VolatilityMonitor, DealEngine},
    dispatch::{Dispatcher, MessageHandler},
    error_service::ErrorService,
    feeds::{
        rest::{MarketRestClient, RestFallbackPoller},
        scraper::{HttpTitleSource, ScraperConfig, StreamBSupervisor},
        stream_a::{FreshnessProbe, StreamASupervisor},
        FeedSource, PriceAggregator,
    },
    handlers::Pipeline,
    models::{Config, InboundMessage},
    notifier::Notifier,
    observability::Counters,
    rules::SpreadResolver,
    status::BotStatus,
    storage::{bronze::BronzeSink, gateway::Gateway, Store},
    suppression::SuppressionGuard,
    transport::InMemoryTransport,
    triggers::TriggerMatcher,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct PipelineHandler(Arc<Pipeline>);

#[async_trait::async_trait]
impl MessageHandler for PipelineHandler {
    async fn handle(&self, msg: InboundMessage) {
        let message_id = msg.message_id.clone();
        if let Err(e) = self.0.process(&msg).await {
            warn!(message_id = %message_id, error = %e, "pipeline failed for message");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "otcbot_backend=info,otcbot=info,warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);
    info!(port = config.port, db = %config.database_path, "🚀 otcbot starting");

    // Storage and sinks.
    let store = Store::open(&config.database_path)?;
    let gateway = Gateway::new(store.clone());
    let sink = BronzeSink::new();

    // Global state modules.
    let status = BotStatus::new();
    let counters = Counters::new();
    let suppression = Arc::new(SuppressionGuard::new());

    // Transport boundary. The real messaging client connects from the
    // outside and feeds the dispatcher; the in-process implementation
    // captures sends until it is attached.
    let transport = InMemoryTransport::new();
    let notifier = Notifier::new(transport.clone());
    let errors = ErrorService::new(status.clone(), notifier.clone());

    // Prices.
    let aggregator = PriceAggregator::new(config.tradingview_stale_ms, sink.clone());
    errors.register_probe(
        "stream_a",
        FreshnessProbe::new(aggregator.clone(), FeedSource::StreamA, config.tradingview_stale_ms),
    );
    errors.register_probe(
        "stream_b",
        FreshnessProbe::new(aggregator.clone(), FeedSource::StreamB, config.tradingview_stale_ms),
    );

    // Deal engine and friends.
    let resolver = SpreadResolver::new(gateway.clone());
    let engine = DealEngine::new(
        gateway.clone(),
        aggregator.clone(),
        resolver.clone(),
        sink.clone(),
        notifier.clone(),
    );
    let matcher = TriggerMatcher::new(gateway.clone());

    let ai_backend = match &config.ai_endpoint_url {
        Some(url) => match HttpAiBackend::new(url.clone(), config.ai_api_key.clone()) {
            Ok(backend) => Some(Arc::new(backend) as Arc<dyn otcbot_backend::classifier::AiBackend>),
            Err(e) => {
                warn!(error = %e, "AI backend unavailable, classifier disabled");
                None
            }
        },
        None => None,
    };
    let classifier = AiClassifier::new(ai_backend, store.clone());

    let pipeline = Pipeline::new(
        config.control_group_pattern.clone(),
        gateway.clone(),
        matcher.clone(),
        engine.clone(),
        status.clone(),
        suppression.clone(),
        transport.clone(),
        notifier.clone(),
        errors.clone(),
        classifier.clone(),
        counters.clone(),
    );

    let dispatcher = Dispatcher::new(
        Arc::new(PipelineHandler(pipeline.clone())),
        config.max_group_workers,
        config.group_queue_depth,
        counters.clone(),
    );

    // Background services under one shutdown signal.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(sink.clone().run_drain_worker(store.clone()));
    tokio::spawn(notifier.clone().run());

    let stream_a = StreamASupervisor::new(aggregator.clone(), errors.clone());
    tokio::spawn(stream_a.run(shutdown_rx.clone()));

    match HttpTitleSource::new(config.tradingview_url.clone()) {
        Ok(source) => {
            let stream_b = StreamBSupervisor::new(
                Arc::new(source),
                aggregator.clone(),
                errors.clone(),
                ScraperConfig {
                    frozen_ms: config.tradingview_frozen_ms,
                    watchdog_interval: Duration::from_millis(config.tradingview_watchdog_ms),
                    max_nav_per_hour: config.tradingview_max_nav_per_hour,
                    bypass_cooldown: Duration::from_millis(
                        config.tradingview_rate_limit_bypass_ms.max(0) as u64,
                    ),
                },
            );
            tokio::spawn(stream_b.run(shutdown_rx.clone()));
        }
        Err(e) => warn!(error = %e, "commercial scraper disabled"),
    }

    match MarketRestClient::new(config.market_rest_url.clone()) {
        Ok(client) => {
            let poller = RestFallbackPoller::new(
                client,
                aggregator.clone(),
                errors.clone(),
                config.tradingview_stale_ms,
            );
            tokio::spawn(poller.run(shutdown_rx.clone()));
        }
        Err(e) => warn!(error = %e, "REST fallback disabled"),
    }

    let sweeper = Sweeper::new(engine.clone(), config.sweep_interval_ms);
    tokio::spawn(sweeper.run(shutdown_rx.clone()));

    let monitor = VolatilityMonitor::new(
        engine.clone(),
        gateway.clone(),
        aggregator.clone(),
        transport.clone(),
        suppression.clone(),
        counters.clone(),
    );
    tokio::spawn(monitor.run(shutdown_rx.clone()));

    // Daily bronze retention.
    {
        let store = store.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(24 * 3600));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => return,
                }
                let cutoff = chrono::Utc::now() - chrono::Duration::days(90);
                match store.prune_bronze_ticks_before(cutoff) {
                    Ok(pruned) if pruned > 0 => info!(pruned, "🗑️ bronze ticks pruned"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "bronze prune failed"),
                }
            }
        });
    }

    // Dashboard API.
    let state = AppState {
        config: config.clone(),
        gateway,
        engine,
        matcher,
        resolver,
        aggregator,
        status,
        counters,
        transport: transport.clone(),
        sink: sink.clone(),
        notifier,
        inbound: Arc::new(dispatcher.clone()),
    };
    let app = api::router(state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("🛑 shutdown signal received");
    });

    server.await.context("server error")?;

    // Drain: stop intake, let workers finish, stop supervisors, flush.
    dispatcher.drain();
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_secs(2)).await;
    let flushed = sink.flush_to(&store);
    info!(flushed, "👋 shutdown complete");

    Ok(())
}

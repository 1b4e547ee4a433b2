//! TTL sweeper.
//!
//! Periodic task expiring non-terminal deals whose TTL elapsed. The same
//! `sweep` operation is exposed for operator-initiated cleanup through
//! the API; both paths are idempotent.

use crate::deals::engine::DealEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct Sweeper {
    engine: Arc<DealEngine>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(engine: Arc<DealEngine>, interval_ms: u64) -> Self {
        Self {
            engine,
            interval: Duration::from_millis(interval_ms.max(1000)),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "🧹 ttl sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return,
            }
            match self.engine.sweep().await {
                Ok(_) => {}
                Err(e) => warn!(error = %e, "ttl sweep failed"),
            }
        }
    }
}

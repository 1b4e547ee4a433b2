//! Rate limiting middleware.
//!
//! In-memory sliding window per IP. Two scopes: the general API allows 60
//! requests a minute; group mode changes are capped at 10.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    /// General API scope.
    pub fn general() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }

    /// Mode-change scope: stricter, these fan out to live groups.
    pub fn mode_changes() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<IpAddr, WindowEntry>>>,
}

enum Decision {
    Allowed,
    Exceeded { retry_after: Duration },
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn check(&self, ip: IpAddr) -> Decision {
        let mut state = self.state.lock();
        let now = Instant::now();

        let entry = state.entry(ip).or_insert(WindowEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        if entry.count > self.config.max_requests {
            let reset_at = entry.window_start + self.config.window;
            Decision::Exceeded {
                retry_after: reset_at.saturating_duration_since(now),
            }
        } else {
            Decision::Allowed
        }
    }

    /// Drop windows long past expiry (call from a background task).
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;
        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    axum::extract::State(limiter): axum::extract::State<RateLimitLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();
    match limiter.check(ip) {
        Decision::Allowed => next.run(request).await,
        Decision::Exceeded { retry_after } => {
            warn!(
                ip = %ip,
                retry_after_secs = retry_after.as_secs(),
                "rate limit exceeded"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.as_secs().to_string())],
                axum::Json(serde_json::json!({
                    "error": "rate_limit_exceeded",
                    "message": "Too many requests. Please slow down.",
                })),
            )
                .into_response()
        }
    }
}

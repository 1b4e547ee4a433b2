//! Dashboard shared-secret auth.
//!
//! Write methods (PUT/POST/DELETE/PATCH) require the `X-Dashboard-Key`
//! header when a secret is configured; reads are always open. Without a
//! configured secret the write API is open (dev mode).

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

pub const DASHBOARD_KEY_HEADER: &str = "x-dashboard-key";

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: Option<String>,
}

fn is_write_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::PUT | Method::POST | Method::DELETE | Method::PATCH
    )
}

pub async fn dashboard_auth(
    axum::extract::State(config): axum::extract::State<AuthConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(secret) = &config.secret else {
        return next.run(request).await;
    };
    if !is_write_method(request.method()) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(DASHBOARD_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided == Some(secret.as_str()) {
        next.run(request).await
    } else {
        warn!(
            method = %request.method(),
            path = request.uri().path(),
            "write request rejected: bad dashboard key"
        );
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "Unauthorized" })),
        )
            .into_response()
    }
}

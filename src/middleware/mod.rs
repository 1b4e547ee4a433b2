//! HTTP middleware: request logging, per-IP rate limiting, and the
//! dashboard shared-secret check for write methods.

pub mod auth;
pub mod logging;
pub mod rate_limit;

pub use auth::{dashboard_auth, AuthConfig};
pub use logging::request_logging_simple;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};

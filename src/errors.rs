//! Error taxonomy shared by the engine, the pipeline, and the HTTP API.
//!
//! Handlers return `BotError` with a kind; background workers log and
//! continue. Escalation decisions (auto-pause) live in the error service,
//! not here.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Busy,
    Transient,
    Critical,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Busy => "busy",
            ErrorKind::Transient => "transient",
            ErrorKind::Critical => "critical",
            ErrorKind::Fatal => "fatal",
        }
    }

    /// HTTP status for API-surfaced kinds.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Busy => 429,
            _ => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum BotError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("busy: {0}")]
    Busy(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("critical: {0}")]
    Critical(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BotError::Validation(_) => ErrorKind::Validation,
            BotError::NotFound(_) => ErrorKind::NotFound,
            BotError::Conflict(_) => ErrorKind::Conflict,
            BotError::Unauthorized => ErrorKind::Unauthorized,
            BotError::Busy(_) => ErrorKind::Busy,
            BotError::Transient(_) => ErrorKind::Transient,
            BotError::Critical(_) => ErrorKind::Critical,
            BotError::Fatal(_) => ErrorKind::Fatal,
            // Store failures are I/O against the local file; treat as transient.
            BotError::Storage(_) => ErrorKind::Transient,
            BotError::Other(_) => ErrorKind::Fatal,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        BotError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        BotError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        BotError::Conflict(msg.into())
    }
}

pub type BotResult<T> = Result<T, BotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_http_status() {
        assert_eq!(BotError::validation("x").kind().http_status(), 400);
        assert_eq!(BotError::Unauthorized.kind().http_status(), 401);
        assert_eq!(BotError::not_found("x").kind().http_status(), 404);
        assert_eq!(BotError::conflict("x").kind().http_status(), 409);
        assert_eq!(BotError::Busy("lock".into()).kind().http_status(), 429);
    }
}

//! Global operational status.
//!
//! One process-wide switch: `running` or `paused` with a reason. The error
//! service flips it on escalation; control-group commands flip it manually.
//! All handlers read it through this module, never through raw fields.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Paused,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: RunState,
    pub pause_reason: Option<String>,
    pub paused_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: i64,
}

#[derive(Debug)]
struct Inner {
    state: RunState,
    pause_reason: Option<String>,
    paused_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
}

/// Shared handle; clone freely.
#[derive(Debug, Clone)]
pub struct BotStatus {
    inner: Arc<RwLock<Inner>>,
}

impl BotStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: RunState::Running,
                pause_reason: None,
                paused_at: None,
                started_at: Utc::now(),
            })),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.read().state == RunState::Paused
    }

    /// Pause with a reason. Returns false if already paused (no-op).
    pub fn pause(&self, reason: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.state == RunState::Paused {
            return false;
        }
        inner.state = RunState::Paused;
        inner.pause_reason = Some(reason.to_string());
        inner.paused_at = Some(Utc::now());
        true
    }

    /// Resume. Returns false if already running (no-op).
    pub fn resume(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.state == RunState::Running {
            return false;
        }
        inner.state = RunState::Running;
        inner.pause_reason = None;
        inner.paused_at = None;
        true
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read();
        let now = Utc::now();
        StatusSnapshot {
            state: inner.state,
            pause_reason: inner.pause_reason.clone(),
            paused_at: inner.paused_at,
            started_at: inner.started_at,
            uptime_ms: (now - inner.started_at).num_milliseconds(),
        }
    }
}

impl Default for BotStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_is_idempotent() {
        let status = BotStatus::new();
        assert!(!status.is_paused());
        assert!(status.pause("manual"));
        assert!(!status.pause("again"));
        assert!(status.is_paused());
        assert_eq!(status.snapshot().pause_reason.as_deref(), Some("manual"));
    }

    #[test]
    fn resume_clears_reason() {
        let status = BotStatus::new();
        status.pause("feed down");
        assert!(status.resume());
        assert!(!status.resume());
        let snap = status.snapshot();
        assert_eq!(snap.state, RunState::Running);
        assert!(snap.pause_reason.is_none());
    }
}

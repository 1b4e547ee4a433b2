//! Failure tracking and auto-pause.
//!
//! Two signals per source: a consecutive-failure counter (reset on
//! success) and a 60 s sliding window of transient failures. Either
//! crossing its threshold escalates to critical and pauses the bot. The
//! error service owns every escalation decision; other components only
//! report.

use crate::notifier::ControlNotify;
use crate::status::BotStatus;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const WINDOW: Duration = Duration::from_secs(60);
const WINDOW_THRESHOLD: usize = 3;
const DEFAULT_CONSECUTIVE_THRESHOLD: u32 = 5;
const PROBE_DEADLINE: Duration = Duration::from_secs(5);

/// Health probe for a suspected source, called during recovery.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

#[derive(Default)]
struct SourceState {
    consecutive: u32,
    window: Vec<Instant>,
}

pub struct ErrorService {
    status: BotStatus,
    notifier: Arc<dyn ControlNotify>,
    states: Mutex<HashMap<String, SourceState>>,
    probes: RwLock<HashMap<String, Arc<dyn HealthProbe>>>,
    consecutive_threshold: u32,
    suspected: Mutex<Option<String>>,
    auto_paused: AtomicBool,
}

impl ErrorService {
    pub fn new(status: BotStatus, notifier: Arc<dyn ControlNotify>) -> Arc<Self> {
        Arc::new(Self {
            status,
            notifier,
            states: Mutex::new(HashMap::new()),
            probes: RwLock::new(HashMap::new()),
            consecutive_threshold: DEFAULT_CONSECUTIVE_THRESHOLD,
            suspected: Mutex::new(None),
            auto_paused: AtomicBool::new(false),
        })
    }

    pub fn register_probe(&self, source: &str, probe: Arc<dyn HealthProbe>) {
        self.probes.write().insert(source.to_string(), probe);
    }

    /// Record a transient failure; escalates when a threshold crosses.
    pub fn record_failure(self: &Arc<Self>, source: &str, detail: &str) {
        let escalation = {
            let mut states = self.states.lock();
            let state = states.entry(source.to_string()).or_default();
            let now = Instant::now();
            state.window.retain(|t| now.duration_since(*t) < WINDOW);
            state.window.push(now);
            state.consecutive += 1;

            if state.window.len() >= WINDOW_THRESHOLD {
                Some(format!("{} in 60s", state.window.len()))
            } else if state.consecutive >= self.consecutive_threshold {
                Some(format!("{} consecutive", state.consecutive))
            } else {
                None
            }
        };

        warn!(source, detail, "transient failure recorded");

        if let Some(cause) = escalation {
            let reason = format!("{} failures ({})", source, cause);
            self.escalate(source, &reason);
        }
    }

    /// Failures that are critical on their own (upstream 401/403).
    pub fn record_critical(self: &Arc<Self>, source: &str, detail: &str) {
        let reason = format!("{} failure: {}", source, detail);
        self.escalate(source, &reason);
    }

    /// Success resets the source's counters; if the bot is auto-paused on
    /// this source, the first success resumes it.
    pub fn record_success(self: &Arc<Self>, source: &str) {
        {
            let mut states = self.states.lock();
            if let Some(state) = states.get_mut(source) {
                state.consecutive = 0;
                state.window.clear();
            }
        }

        if self.auto_paused.load(Ordering::SeqCst) {
            let is_suspect = self.suspected.lock().as_deref() == Some(source);
            if is_suspect {
                self.mark_recovered(source);
            }
        }
    }

    fn escalate(self: &Arc<Self>, source: &str, reason: &str) {
        *self.suspected.lock() = Some(source.to_string());
        self.trigger_auto_pause(reason, serde_json::json!({ "source": source }));
    }

    /// Pause the bot exactly once per episode and schedule recovery.
    pub fn trigger_auto_pause(self: &Arc<Self>, reason: &str, meta: serde_json::Value) {
        if !self.status.pause(reason) {
            return;
        }
        self.auto_paused.store(true, Ordering::SeqCst);
        warn!(reason, meta = %meta, "🛑 auto-pause engaged");
        self.notifier.notify(&format!("⚠️ Bot paused: {}", reason));

        let source = self
            .suspected
            .lock()
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let svc = self.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { svc.recovery_loop(source).await });
        }
    }

    async fn recovery_loop(self: Arc<Self>, source: String) {
        let mut backoff = Duration::from_secs(2);
        loop {
            if !self.auto_paused.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(60));

            let probe = self.probes.read().get(&source).cloned();
            let Some(probe) = probe else {
                // No probe registered: wait for live traffic to report a
                // success via record_success.
                continue;
            };

            let healthy = tokio::time::timeout(PROBE_DEADLINE, probe.probe())
                .await
                .unwrap_or(false);
            if healthy {
                self.mark_recovered(&source);
                return;
            }
        }
    }

    fn mark_recovered(self: &Arc<Self>, source: &str) {
        if !self.auto_paused.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let mut states = self.states.lock();
            if let Some(state) = states.get_mut(source) {
                state.consecutive = 0;
                state.window.clear();
            }
        }
        *self.suspected.lock() = None;
        self.status.resume();
        info!(source, "✅ source recovered, bot resumed");
        self.notifier.notify("✅ Bot resumed: source recovered");
    }

    pub fn is_auto_paused(&self) -> bool {
        self.auto_paused.load(Ordering::SeqCst)
    }

    /// Clear the auto-pause bookkeeping after a manual resume.
    pub fn clear_auto_pause(&self) {
        self.auto_paused.store(false, Ordering::SeqCst);
        *self.suspected.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct RecordingNotifier {
        messages: PlMutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: PlMutex::new(Vec::new()),
            })
        }
    }

    impl ControlNotify for RecordingNotifier {
        fn notify(&self, text: &str) {
            self.messages.lock().push(text.to_string());
        }
    }

    #[test]
    fn three_in_window_pauses_exactly_once() {
        let status = BotStatus::new();
        let notifier = RecordingNotifier::new();
        let svc = ErrorService::new(status.clone(), notifier.clone());

        svc.record_failure("stream_a", "timeout");
        svc.record_failure("stream_a", "timeout");
        assert!(!status.is_paused());
        svc.record_failure("stream_a", "timeout");
        assert!(status.is_paused());

        // Further failures do not re-notify.
        svc.record_failure("stream_a", "timeout");
        assert_eq!(notifier.messages.lock().len(), 1);

        let snap = status.snapshot();
        assert!(snap.pause_reason.unwrap().contains("3 in 60s"));
    }

    #[test]
    fn success_resets_counters() {
        let status = BotStatus::new();
        let svc = ErrorService::new(status.clone(), RecordingNotifier::new());

        svc.record_failure("rest", "5xx");
        svc.record_failure("rest", "5xx");
        svc.record_success("rest");
        svc.record_failure("rest", "5xx");
        svc.record_failure("rest", "5xx");
        assert!(!status.is_paused());
    }

    #[test]
    fn success_on_suspected_source_resumes() {
        let status = BotStatus::new();
        let notifier = RecordingNotifier::new();
        let svc = ErrorService::new(status.clone(), notifier.clone());

        for _ in 0..3 {
            svc.record_failure("stream_b", "frozen");
        }
        assert!(status.is_paused());

        // A success from an unrelated source changes nothing.
        svc.record_success("rest");
        assert!(status.is_paused());

        svc.record_success("stream_b");
        assert!(!status.is_paused());
        let messages = notifier.messages.lock();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("resumed"));
    }

    #[test]
    fn critical_escalates_immediately() {
        let status = BotStatus::new();
        let svc = ErrorService::new(status.clone(), RecordingNotifier::new());
        svc.record_critical("transport", "auth rejected (401)");
        assert!(status.is_paused());
        assert!(status
            .snapshot()
            .pause_reason
            .unwrap()
            .contains("auth rejected"));
    }
}

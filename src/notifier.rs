//! Control-channel notifier.
//!
//! Operator notifications flow through a throttled queue: a rolling
//! per-minute rate cap, a dedup window for identical texts, and silent
//! drops (counted) while the transport is disconnected.

use crate::transport::{SendOptions, Transport};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info};

const DEFAULT_RATE_PER_MINUTE: usize = 10;
const DEDUP_WINDOW: Duration = Duration::from_secs(600);

/// Narrow capability other services hold; breaks the service cycle.
pub trait ControlNotify: Send + Sync {
    /// Enqueue a control-group message; never blocks.
    fn notify(&self, text: &str);
}

pub struct Notifier {
    transport: Arc<dyn Transport>,
    control_group: RwLock<Option<String>>,
    queue: Mutex<VecDeque<String>>,
    wake: Notify,
    sent_times: Mutex<VecDeque<Instant>>,
    recent: Mutex<HashMap<String, Instant>>,
    rate_per_minute: usize,
    dropped: AtomicU64,
}

impl Notifier {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            control_group: RwLock::new(None),
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            sent_times: Mutex::new(VecDeque::new()),
            recent: Mutex::new(HashMap::new()),
            rate_per_minute: DEFAULT_RATE_PER_MINUTE,
            dropped: AtomicU64::new(0),
        })
    }

    /// The control group is discovered from inbound traffic.
    pub fn set_control_group(&self, group_jid: &str) {
        let mut slot = self.control_group.write();
        if slot.as_deref() != Some(group_jid) {
            info!(group = group_jid, "🎛️ control group registered");
            *slot = Some(group_jid.to_string());
        }
    }

    pub fn control_group(&self) -> Option<String> {
        self.control_group.read().clone()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Identical text within the dedup window is dropped.
    fn is_duplicate(&self, text: &str) -> bool {
        let mut recent = self.recent.lock();
        let now = Instant::now();
        recent.retain(|_, sent| now.duration_since(*sent) < DEDUP_WINDOW);
        if recent.contains_key(text) {
            return true;
        }
        recent.insert(text.to_string(), now);
        false
    }

    fn under_rate_cap(&self) -> bool {
        let mut times = self.sent_times.lock();
        let now = Instant::now();
        while let Some(front) = times.front() {
            if now.duration_since(*front) >= Duration::from_secs(60) {
                times.pop_front();
            } else {
                break;
            }
        }
        times.len() < self.rate_per_minute
    }

    fn mark_sent(&self) {
        self.sent_times.lock().push_back(Instant::now());
    }

    /// Drain loop; waits out the rate cap instead of dropping.
    pub async fn run(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().pop_front();
            let Some(text) = next else {
                self.wake.notified().await;
                continue;
            };

            while !self.under_rate_cap() {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let Some(group) = self.control_group() else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("notifier drop: control group unknown");
                continue;
            };

            if !self.transport.is_connected() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("notifier drop: transport disconnected");
                continue;
            }

            let receipt = self
                .transport
                .send(&group, &text, SendOptions::default())
                .await;
            if receipt.ok {
                self.mark_sent();
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(reason = ?receipt.reason, "notifier send failed");
            }
        }
    }

    /// Synchronous single-step drain for tests and the simulator.
    pub async fn drain_once(&self) -> bool {
        let next = self.queue.lock().pop_front();
        let Some(text) = next else {
            return false;
        };
        let Some(group) = self.control_group() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return true;
        };
        if !self.transport.is_connected() || !self.under_rate_cap() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        let receipt = self
            .transport
            .send(&group, &text, SendOptions::default())
            .await;
        if receipt.ok {
            self.mark_sent();
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        true
    }
}

impl ControlNotify for Notifier {
    fn notify(&self, text: &str) {
        if self.is_duplicate(text) {
            debug!(text, "notifier dedup drop");
            return;
        }
        self.queue.lock().push_back(text.to_string());
        self.wake.notify_one();
    }
}

/// No-op notifier for contexts without a control channel (simulator).
pub struct NullNotifier;

impl ControlNotify for NullNotifier {
    fn notify(&self, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;

    #[tokio::test]
    async fn dedups_identical_text() {
        let transport = InMemoryTransport::new();
        let notifier = Notifier::new(transport.clone());
        notifier.set_control_group("control@g.us");

        notifier.notify("feed down");
        notifier.notify("feed down");
        notifier.notify("other");

        while notifier.drain_once().await {}
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "feed down");
        assert_eq!(sent[1].text, "other");
    }

    #[tokio::test]
    async fn drops_when_disconnected() {
        let transport = InMemoryTransport::new();
        transport.set_connected(false);
        let notifier = Notifier::new(transport.clone());
        notifier.set_control_group("control@g.us");

        notifier.notify("lost");
        while notifier.drain_once().await {}
        assert!(transport.sent().is_empty());
        assert_eq!(notifier.dropped_count(), 1);
    }
}

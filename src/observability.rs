//! Process-wide counters surfaced through the status API.
//!
//! Structured events go through `tracing`; these are the cheap counters a
//! dashboard polls. One writer per site, relaxed ordering everywhere.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct Counters {
    pub messages_processed: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub responses_sent: AtomicU64,
    pub responses_suppressed: AtomicU64,
    pub quotes_created: AtomicU64,
    pub deals_locked: AtomicU64,
    pub deals_completed: AtomicU64,
    pub deals_cancelled: AtomicU64,
    pub deals_expired: AtomicU64,
    pub deals_repriced: AtomicU64,
    pub deals_escalated: AtomicU64,
    pub handler_failures: AtomicU64,
    pub classifier_consults: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    pub messages_processed: u64,
    pub messages_dropped: u64,
    pub responses_sent: u64,
    pub responses_suppressed: u64,
    pub quotes_created: u64,
    pub deals_locked: u64,
    pub deals_completed: u64,
    pub deals_cancelled: u64,
    pub deals_expired: u64,
    pub deals_repriced: u64,
    pub deals_escalated: u64,
    pub handler_failures: u64,
    pub classifier_consults: u64,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            responses_suppressed: self.responses_suppressed.load(Ordering::Relaxed),
            quotes_created: self.quotes_created.load(Ordering::Relaxed),
            deals_locked: self.deals_locked.load(Ordering::Relaxed),
            deals_completed: self.deals_completed.load(Ordering::Relaxed),
            deals_cancelled: self.deals_cancelled.load(Ordering::Relaxed),
            deals_expired: self.deals_expired.load(Ordering::Relaxed),
            deals_repriced: self.deals_repriced.load(Ordering::Relaxed),
            deals_escalated: self.deals_escalated.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            classifier_consults: self.classifier_consults.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let counters = Counters::new();
        Counters::bump(&counters.messages_processed);
        Counters::bump(&counters.messages_processed);
        Counters::bump(&counters.quotes_created);
        let snap = counters.snapshot();
        assert_eq!(snap.messages_processed, 2);
        assert_eq!(snap.quotes_created, 1);
        assert_eq!(snap.deals_locked, 0);
    }
}

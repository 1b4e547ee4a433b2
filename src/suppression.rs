//! Anti-duplicate response guard.
//!
//! Per group and response class, a cooldown after each bot send. Deal
//! state confirmations are exempt: a lock acknowledgement is never
//! suppressed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Class of an outbound bot message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseClass {
    /// Price quotes and reprices.
    Quote,
    /// Deal state transitions (lock/cancel/complete confirmations).
    DealState,
    /// Everything else (text responses, status).
    Info,
}

pub struct SuppressionGuard {
    cooldown: Duration,
    last_sent: Mutex<HashMap<(String, ResponseClass), Instant>>,
}

impl SuppressionGuard {
    pub fn new() -> Self {
        Self::with_cooldown(DEFAULT_COOLDOWN)
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// True when a send of this class should be dropped.
    pub fn should_suppress(&self, group_jid: &str, class: ResponseClass) -> bool {
        if class == ResponseClass::DealState {
            return false;
        }
        let map = self.last_sent.lock();
        match map.get(&(group_jid.to_string(), class)) {
            Some(at) => at.elapsed() < self.cooldown,
            None => false,
        }
    }

    /// Record a completed bot send.
    pub fn record_response(&self, group_jid: &str, class: ResponseClass) {
        self.last_sent
            .lock()
            .insert((group_jid.to_string(), class), Instant::now());
    }

    pub fn reset(&self, group_jid: &str) {
        self.last_sent
            .lock()
            .retain(|(jid, _), _| jid != group_jid);
    }
}

impl Default for SuppressionGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_quote_within_cooldown_suppressed() {
        let guard = SuppressionGuard::new();
        assert!(!guard.should_suppress("g1", ResponseClass::Quote));
        guard.record_response("g1", ResponseClass::Quote);
        assert!(guard.should_suppress("g1", ResponseClass::Quote));
        // Other groups and classes are unaffected.
        assert!(!guard.should_suppress("g2", ResponseClass::Quote));
        assert!(!guard.should_suppress("g1", ResponseClass::Info));
    }

    #[test]
    fn deal_state_never_suppressed() {
        let guard = SuppressionGuard::new();
        guard.record_response("g1", ResponseClass::DealState);
        assert!(!guard.should_suppress("g1", ResponseClass::DealState));
    }

    #[test]
    fn cooldown_expires() {
        let guard = SuppressionGuard::with_cooldown(Duration::from_millis(0));
        guard.record_response("g1", ResponseClass::Quote);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!guard.should_suppress("g1", ResponseClass::Quote));
    }
}

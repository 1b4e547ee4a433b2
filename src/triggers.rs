//! Trigger evaluation.
//!
//! Highest priority wins; ties break on longest matched span, then
//! earliest creation. Text is lowercased before matching. Regex patterns
//! are validated at write time; at read time compilation is capped by a
//! size limit and failures count as no-match (the regex engine itself is
//! linear in the input, which bounds per-match cost).

use crate::models::{PatternType, Trigger, TriggerScope};
use crate::storage::gateway::Gateway;
use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

const REGEX_SIZE_LIMIT: usize = 1 << 16;

/// Validate an operator-supplied pattern at the write boundary.
pub fn compile_pattern(phrase: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(phrase)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

/// Result of evaluating a message against a group's trigger set.
#[derive(Debug, Clone)]
pub struct TriggerMatch {
    pub trigger: Trigger,
    /// Byte range matched inside the lowercased text.
    pub matched_span: (usize, usize),
    pub priority: u32,
}

pub struct TriggerMatcher {
    gateway: Arc<Gateway>,
    compiled: Mutex<HashMap<(i64, String), Option<Regex>>>,
    regex_rejected: AtomicU64,
}

impl TriggerMatcher {
    pub fn new(gateway: Arc<Gateway>) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            compiled: Mutex::new(HashMap::new()),
            regex_rejected: AtomicU64::new(0),
        })
    }

    pub fn regex_rejected_count(&self) -> u64 {
        self.regex_rejected.load(Ordering::Relaxed)
    }

    /// Best match for a message in a group, if any.
    pub fn find_match(
        &self,
        group_jid: &str,
        text: &str,
        is_control_group: bool,
    ) -> crate::errors::BotResult<Option<TriggerMatch>> {
        let triggers = self.gateway.triggers_for(group_jid)?;
        let lowered = text.trim().to_lowercase();
        if lowered.is_empty() {
            return Ok(None);
        }

        // Triggers arrive sorted (priority DESC, created_at ASC). Collect
        // every candidate at the first priority level that matches, then
        // break the tie on span length.
        let mut best: Option<TriggerMatch> = None;
        for trigger in triggers.iter() {
            if !trigger.is_active {
                continue;
            }
            let scope_ok = match trigger.scope {
                TriggerScope::Group => !is_control_group,
                TriggerScope::ControlOnly => is_control_group,
            };
            if !scope_ok {
                continue;
            }

            if let Some(found) = &best {
                if trigger.priority < found.priority {
                    break;
                }
            }

            let Some(span) = self.match_span(trigger, &lowered) else {
                continue;
            };
            let span_len = span.1 - span.0;

            let better = match &best {
                None => true,
                Some(found) => {
                    let found_len = found.matched_span.1 - found.matched_span.0;
                    // Same priority here; longer span wins, then earlier
                    // creation (list order already encodes creation order).
                    span_len > found_len
                }
            };
            if better {
                best = Some(TriggerMatch {
                    trigger: trigger.clone(),
                    matched_span: span,
                    priority: trigger.priority,
                });
            }
        }
        Ok(best)
    }

    fn match_span(&self, trigger: &Trigger, lowered: &str) -> Option<(usize, usize)> {
        let phrase = trigger.phrase.to_lowercase();
        match trigger.pattern_type {
            PatternType::Exact => (lowered == phrase).then_some((0, lowered.len())),
            PatternType::Contains => lowered
                .find(&phrase)
                .map(|start| (start, start + phrase.len())),
            PatternType::Regex => {
                let regex = self.compiled_for(trigger)?;
                regex.find(lowered).map(|m| (m.start(), m.end()))
            }
        }
    }

    fn compiled_for(&self, trigger: &Trigger) -> Option<Regex> {
        let key = (trigger.id, trigger.phrase.clone());
        let mut cache = self.compiled.lock();
        if let Some(entry) = cache.get(&key) {
            return entry.clone();
        }
        let compiled = match compile_pattern(&trigger.phrase) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(
                    trigger_id = trigger.id,
                    error = %e,
                    "stored regex trigger failed to compile"
                );
                self.regex_rejected.fetch_add(1, Ordering::Relaxed);
                None
            }
        };
        cache.insert(key, compiled.clone());
        compiled
    }
}

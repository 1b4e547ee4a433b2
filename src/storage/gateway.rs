//! Cached façade over the store.
//!
//! Triggers and group configs sit behind 60 s write-through caches; every
//! mutation path invalidates. Group discovery seeds the canonical OTC
//! vocabulary as system triggers.

use crate::errors::BotResult;
use crate::models::{ActionType, GroupConfig, PatternType, Trigger, TriggerScope};
use crate::storage::cache::{TtlCache, DEFAULT_CACHE_TTL};
use crate::storage::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Gateway {
    store: Store,
    triggers: TtlCache<Vec<Trigger>>,
    configs: TtlCache<GroupConfig>,
}

impl Gateway {
    pub fn new(store: Store) -> Arc<Self> {
        Arc::new(Self {
            store,
            triggers: TtlCache::new(DEFAULT_CACHE_TTL),
            configs: TtlCache::new(DEFAULT_CACHE_TTL),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Triggers for a group, cached.
    pub fn triggers_for(&self, group_jid: &str) -> BotResult<Arc<Vec<Trigger>>> {
        self.triggers
            .get_or_load(group_jid, || self.store.list_triggers(group_jid))
    }

    /// Config for a group, cached; defaults are created and persisted on
    /// first sight so later edits have a row to land on.
    pub fn config_for(&self, group_jid: &str) -> BotResult<Arc<GroupConfig>> {
        self.configs.get_or_load(group_jid, || {
            if let Some(config) = self.store.get_config(group_jid)? {
                return Ok(config);
            }
            let config = GroupConfig::defaults_for(group_jid);
            self.store.upsert_config(&config)?;
            debug!(group = group_jid, "created default group config");
            Ok(config)
        })
    }

    pub fn invalidate_triggers(&self, group_jid: &str) {
        self.triggers.invalidate(group_jid);
    }

    pub fn invalidate_config(&self, group_jid: &str) {
        self.configs.invalidate(group_jid);
    }

    /// Seed the canonical OTC vocabulary for a newly discovered group.
    /// Conflicts mean the seed already ran; they are ignored.
    pub fn seed_system_triggers(&self, group_jid: &str) -> BotResult<()> {
        let now = Utc::now();
        let seeds: &[(&str, PatternType, ActionType, TriggerScope, u32)] = &[
            ("preço", PatternType::Contains, ActionType::Quote, TriggerScope::Group, 80),
            ("preco", PatternType::Contains, ActionType::Quote, TriggerScope::Group, 80),
            ("cotação", PatternType::Contains, ActionType::Quote, TriggerScope::Group, 80),
            ("cotacao", PatternType::Contains, ActionType::Quote, TriggerScope::Group, 80),
            ("trava", PatternType::Contains, ActionType::Lock, TriggerScope::Group, 85),
            ("fechar", PatternType::Contains, ActionType::Lock, TriggerScope::Group, 85),
            ("fechado", PatternType::Contains, ActionType::Lock, TriggerScope::Group, 85),
            ("cancela", PatternType::Contains, ActionType::Cancel, TriggerScope::Group, 90),
            ("cancelar", PatternType::Contains, ActionType::Cancel, TriggerScope::Group, 90),
            ("confirmado", PatternType::Contains, ActionType::Complete, TriggerScope::Group, 88),
            ("pause", PatternType::Exact, ActionType::Pause, TriggerScope::ControlOnly, 95),
            ("resume", PatternType::Exact, ActionType::Resume, TriggerScope::ControlOnly, 95),
            ("status", PatternType::Exact, ActionType::Status, TriggerScope::ControlOnly, 95),
        ];

        let mut inserted = 0usize;
        for (phrase, pattern_type, action_type, scope, priority) in seeds {
            let trigger = Trigger {
                id: 0,
                group_jid: group_jid.to_string(),
                phrase: phrase.to_string(),
                pattern_type: *pattern_type,
                action_type: *action_type,
                action_params: serde_json::json!({}),
                priority: *priority,
                is_active: true,
                is_system: true,
                scope: *scope,
                created_at: now,
            };
            match self.store.insert_trigger(&trigger) {
                Ok(_) => inserted += 1,
                Err(crate::errors::BotError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if inserted > 0 {
            info!(group = group_jid, inserted, "🌱 seeded system triggers");
            self.invalidate_triggers(group_jid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let gateway = Gateway::new(store);
        gateway.seed_system_triggers("g1").unwrap();
        gateway.seed_system_triggers("g1").unwrap();

        let triggers = gateway.triggers_for("g1").unwrap();
        let quote_count = triggers
            .iter()
            .filter(|t| t.action_type == ActionType::Quote)
            .count();
        assert_eq!(quote_count, 4);
        assert!(triggers.iter().all(|t| t.is_system));
    }

    #[test]
    fn config_defaults_created_on_first_read() {
        let store = Store::open_in_memory().unwrap();
        let gateway = Gateway::new(store);
        let config = gateway.config_for("g1").unwrap();
        assert_eq!(config.quote_ttl_seconds, 180);

        // The row landed in the store, not just the cache.
        let stored = gateway.store().get_config("g1").unwrap();
        assert!(stored.is_some());
    }

    #[test]
    fn trigger_cache_serves_stale_until_invalidated() {
        let store = Store::open_in_memory().unwrap();
        let gateway = Gateway::new(store);
        gateway.seed_system_triggers("g1").unwrap();
        let before = gateway.triggers_for("g1").unwrap().len();

        let extra = Trigger {
            id: 0,
            group_jid: "g1".into(),
            phrase: "usdt hoje".into(),
            pattern_type: PatternType::Contains,
            action_type: ActionType::Quote,
            action_params: serde_json::json!({}),
            priority: 50,
            is_active: true,
            is_system: false,
            scope: TriggerScope::Group,
            created_at: Utc::now(),
        };
        gateway.store().insert_trigger(&extra).unwrap();

        // Cached snapshot until someone invalidates.
        assert_eq!(gateway.triggers_for("g1").unwrap().len(), before);
        gateway.invalidate_triggers("g1");
        assert_eq!(gateway.triggers_for("g1").unwrap().len(), before + 1);
    }
}

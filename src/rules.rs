//! Active-rule resolution.
//!
//! Combines the base group config with the time rule active at `now` (if
//! any). A rule overrides only the pricing fields; side, currency,
//! language and TTL always come from the base config. Pure read: never
//! mutates configuration.

use crate::errors::BotResult;
use crate::models::{
    Currency, DealSide, GroupConfig, Language, PricingSource, SpreadMode, TimeRule,
};
use crate::storage::gateway::Gateway;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Deterministic pricing snapshot for one quote.
#[derive(Debug, Clone)]
pub struct PricingSnapshot {
    pub pricing_source: PricingSource,
    pub spread_mode: SpreadMode,
    pub sell_spread: Decimal,
    pub buy_spread: Decimal,
    pub language: Language,
    pub quote_ttl_seconds: u32,
    pub default_side: DealSide,
    pub default_currency: Currency,
    pub rule_id: Option<i64>,
    pub rule_name: Option<String>,
}

pub struct SpreadResolver {
    gateway: Arc<Gateway>,
}

impl SpreadResolver {
    pub fn new(gateway: Arc<Gateway>) -> Arc<Self> {
        Arc::new(Self { gateway })
    }

    /// Pick the rule active at `now`: window match, highest priority,
    /// earliest creation.
    pub fn active_rule(rules: &[TimeRule], now: DateTime<Utc>) -> Option<&TimeRule> {
        rules
            .iter()
            .filter(|r| r.is_active && r.active_window.contains(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            })
    }

    pub fn resolve(&self, group_jid: &str, now: DateTime<Utc>) -> BotResult<PricingSnapshot> {
        let config = self.gateway.config_for(group_jid)?;
        let rules = self.gateway.store().list_rules(group_jid)?;
        Ok(Self::snapshot_from(&config, &rules, now))
    }

    pub fn snapshot_from(
        config: &GroupConfig,
        rules: &[TimeRule],
        now: DateTime<Utc>,
    ) -> PricingSnapshot {
        // Default pricing comes from the group config with the crypto
        // stream as source; an active rule overrides pricing fields only.
        let mut snapshot = PricingSnapshot {
            pricing_source: PricingSource::Binance,
            spread_mode: config.spread_mode,
            sell_spread: config.sell_spread,
            buy_spread: config.buy_spread,
            language: config.language,
            quote_ttl_seconds: config.quote_ttl_seconds,
            default_side: config.default_side,
            default_currency: config.default_currency,
            rule_id: None,
            rule_name: None,
        };

        if let Some(rule) = Self::active_rule(rules, now) {
            snapshot.pricing_source = rule.pricing_source;
            snapshot.spread_mode = rule.spread_mode;
            snapshot.sell_spread = rule.sell_spread;
            snapshot.buy_spread = rule.buy_spread;
            snapshot.rule_id = Some(rule.id);
            snapshot.rule_name = Some(rule.name.clone());
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActiveWindow;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn rule(id: i64, priority: u32, age_secs: i64, days: Vec<u8>) -> TimeRule {
        TimeRule {
            id,
            group_jid: "g1".into(),
            name: format!("rule-{id}"),
            pricing_source: PricingSource::Commercial,
            spread_mode: SpreadMode::AbsBrl,
            sell_spread: dec!(0.05),
            buy_spread: dec!(0.03),
            priority,
            active_window: ActiveWindow {
                days,
                start_minute: 0,
                end_minute: 24 * 60,
            },
            is_system: false,
            is_active: true,
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[test]
    fn highest_priority_then_earliest_creation() {
        // Wednesday.
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 12, 0, 0).unwrap();
        let rules = vec![
            rule(1, 50, 100, vec![3]),
            rule(2, 90, 50, vec![3]),
            rule(3, 90, 200, vec![3]),
        ];
        let active = SpreadResolver::active_rule(&rules, now).unwrap();
        // Priority 90 tie: rule 3 is older.
        assert_eq!(active.id, 3);
    }

    #[test]
    fn window_mismatch_excludes_rule() {
        let wednesday = Utc.with_ymd_and_hms(2024, 7, 3, 12, 0, 0).unwrap();
        let rules = vec![rule(1, 50, 10, vec![6, 7])];
        assert!(SpreadResolver::active_rule(&rules, wednesday).is_none());
    }

    #[test]
    fn rule_overrides_pricing_only() {
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 12, 0, 0).unwrap();
        let mut config = GroupConfig::defaults_for("g1");
        config.sell_spread = dec!(50);
        config.quote_ttl_seconds = 240;
        config.language = Language::En;

        let rules = vec![rule(1, 50, 10, vec![3])];
        let snap = SpreadResolver::snapshot_from(&config, &rules, now);

        assert_eq!(snap.pricing_source, PricingSource::Commercial);
        assert_eq!(snap.spread_mode, SpreadMode::AbsBrl);
        assert_eq!(snap.sell_spread, dec!(0.05));
        assert_eq!(snap.rule_id, Some(1));
        // Non-pricing fields stay with the base config.
        assert_eq!(snap.quote_ttl_seconds, 240);
        assert_eq!(snap.language, Language::En);
    }

    #[test]
    fn no_rule_keeps_base_config() {
        let now = Utc::now();
        let mut config = GroupConfig::defaults_for("g1");
        config.sell_spread = dec!(50);
        let snap = SpreadResolver::snapshot_from(&config, &[], now);
        assert_eq!(snap.pricing_source, PricingSource::Binance);
        assert_eq!(snap.sell_spread, dec!(50));
        assert!(snap.rule_id.is_none());
    }

    #[test]
    fn inactive_rules_ignored() {
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 12, 0, 0).unwrap();
        let mut r = rule(1, 50, 10, vec![3]);
        r.is_active = false;
        assert!(SpreadResolver::active_rule(&[r], now).is_none());
    }
}

//! Persistence gateway over SQLite.
//!
//! Thin typed façade: WAL mode, one connection behind a `parking_lot`
//! mutex, cached prepared statements. Deal transitions are compare-and-set
//! (`UPDATE … WHERE id=? AND state=?`); archiving a terminal deal inserts
//! the history row and deletes the active row in one transaction.

pub mod bronze;
pub mod cache;
pub mod gateway;

use crate::errors::{BotError, BotResult};
use crate::models::{
    ActionType, ActiveWindow, Currency, Deal, DealHistoryRecord, DealSide, DealState, Group,
    GroupConfig, GroupMode, Language, PatternType, PricingSource, SpreadMode, TimeRule, Trigger,
    TriggerScope, VolatilityPolicy,
};
use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA cache_size = -16000;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS groups (
    jid TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    is_control_group INTEGER NOT NULL DEFAULT 0,
    first_seen_at INTEGER NOT NULL,
    last_activity_at INTEGER NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS group_config (
    group_jid TEXT PRIMARY KEY,
    mode TEXT NOT NULL,
    spread_mode TEXT NOT NULL,
    sell_spread TEXT NOT NULL,
    buy_spread TEXT NOT NULL,
    quote_ttl_seconds INTEGER NOT NULL,
    default_side TEXT NOT NULL,
    default_currency TEXT NOT NULL,
    language TEXT NOT NULL,
    player_roles TEXT NOT NULL DEFAULT '{}',
    vol_enabled INTEGER NOT NULL DEFAULT 1,
    vol_threshold_bps INTEGER NOT NULL DEFAULT 30,
    vol_max_reprices INTEGER NOT NULL DEFAULT 3,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    learning_started_at INTEGER
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS group_triggers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_jid TEXT NOT NULL,
    trigger_phrase TEXT NOT NULL,
    pattern_type TEXT NOT NULL,
    action_type TEXT NOT NULL,
    action_params TEXT NOT NULL DEFAULT '{}',
    priority INTEGER NOT NULL DEFAULT 50,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_system INTEGER NOT NULL DEFAULT 0,
    scope TEXT NOT NULL DEFAULT 'group',
    created_at INTEGER NOT NULL,
    UNIQUE(group_jid, trigger_phrase)
);

CREATE INDEX IF NOT EXISTS idx_triggers_group
    ON group_triggers(group_jid, is_active, priority DESC);

CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_jid TEXT NOT NULL,
    name TEXT NOT NULL,
    pricing_source TEXT NOT NULL,
    spread_mode TEXT NOT NULL,
    sell_spread TEXT NOT NULL,
    buy_spread TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 50,
    active_window TEXT NOT NULL,
    is_system INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rules_group ON rules(group_jid, is_active);

CREATE TABLE IF NOT EXISTS deals (
    id TEXT PRIMARY KEY,
    group_jid TEXT NOT NULL,
    client_jid TEXT NOT NULL,
    state TEXT NOT NULL,
    side TEXT NOT NULL,
    base_rate TEXT NOT NULL,
    quoted_rate TEXT NOT NULL,
    locked_rate TEXT,
    locked_at INTEGER,
    amount_brl TEXT,
    amount_usdt TEXT,
    ttl_expires_at INTEGER NOT NULL,
    rule_id_used INTEGER,
    rule_name TEXT,
    pricing_source TEXT NOT NULL,
    spread_mode TEXT NOT NULL,
    sell_spread TEXT NOT NULL,
    buy_spread TEXT NOT NULL,
    reprice_count INTEGER NOT NULL DEFAULT 0,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE UNIQUE INDEX IF NOT EXISTS idx_deals_one_active
    ON deals(group_jid, client_jid)
    WHERE state IN ('quoted', 'locked', 'computing');

CREATE INDEX IF NOT EXISTS idx_deals_ttl ON deals(ttl_expires_at);

CREATE TABLE IF NOT EXISTS deal_history (
    id TEXT PRIMARY KEY,
    group_jid TEXT NOT NULL,
    client_jid TEXT NOT NULL,
    final_state TEXT NOT NULL,
    completion_reason TEXT NOT NULL,
    deal_json TEXT NOT NULL,
    archived_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_deal_history_group
    ON deal_history(group_jid, archived_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,
    group_jid TEXT NOT NULL,
    sender_jid TEXT NOT NULL,
    sender_name TEXT,
    text TEXT NOT NULL,
    route TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_group
    ON messages(group_jid, created_at DESC);

CREATE TABLE IF NOT EXISTS bronze_price_ticks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    symbol TEXT NOT NULL,
    price REAL NOT NULL,
    bid REAL,
    ask REAL,
    captured_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bronze_ticks_captured
    ON bronze_price_ticks(captured_at);

CREATE TABLE IF NOT EXISTS bronze_deal_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    deal_id TEXT NOT NULL,
    group_jid TEXT NOT NULL,
    client_jid TEXT NOT NULL,
    from_state TEXT,
    to_state TEXT NOT NULL,
    event_type TEXT NOT NULL,
    market_price TEXT,
    deal_snapshot TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bronze_deal_events_deal
    ON bronze_deal_events(deal_id, created_at);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY DEFAULT 'default',
    auth_state TEXT NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS ai_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service TEXT NOT NULL,
    model TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    group_jid TEXT,
    duration_ms INTEGER,
    success INTEGER NOT NULL,
    error_message TEXT,
    created_at INTEGER NOT NULL
);
"#;

fn ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn decimal_from_col(s: String) -> rusqlite::Result<Decimal> {
    Decimal::from_str(&s).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Shared store handle. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("Failed to open database at {}", db_path))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        info!("📦 Database ready at {}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for the simulator overlay and tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ------------------------------------------------------------------
    // Groups

    /// Upsert a group on inbound traffic; bumps activity and counter.
    pub fn touch_group(
        &self,
        jid: &str,
        name: &str,
        is_control_group: bool,
        now: DateTime<Utc>,
    ) -> BotResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO groups (jid, name, is_control_group, first_seen_at, last_activity_at, message_count)
             VALUES (?1, ?2, ?3, ?4, ?4, 1)
             ON CONFLICT(jid) DO UPDATE SET
                name = excluded.name,
                last_activity_at = excluded.last_activity_at,
                message_count = message_count + 1",
            params![jid, name, is_control_group as i64, ms(now)],
        )?;
        Ok(())
    }

    pub fn get_group(&self, jid: &str) -> BotResult<Option<Group>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT jid, name, is_control_group, first_seen_at, last_activity_at, message_count
             FROM groups WHERE jid = ?1",
        )?;
        let mut rows = stmt.query([jid])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(Group {
            jid: row.get(0)?,
            name: row.get(1)?,
            is_control_group: row.get::<_, i64>(2)? != 0,
            first_seen_at: from_ms(row.get(3)?),
            last_activity_at: from_ms(row.get(4)?),
            message_count: row.get(5)?,
        }))
    }

    pub fn list_groups(&self) -> BotResult<Vec<Group>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT jid, name, is_control_group, first_seen_at, last_activity_at, message_count
             FROM groups ORDER BY last_activity_at DESC",
        )?;
        let groups = stmt
            .query_map([], |row| {
                Ok(Group {
                    jid: row.get(0)?,
                    name: row.get(1)?,
                    is_control_group: row.get::<_, i64>(2)? != 0,
                    first_seen_at: from_ms(row.get(3)?),
                    last_activity_at: from_ms(row.get(4)?),
                    message_count: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(groups)
    }

    // ------------------------------------------------------------------
    // Group config

    pub fn get_config(&self, group_jid: &str) -> BotResult<Option<GroupConfig>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT group_jid, mode, spread_mode, sell_spread, buy_spread, quote_ttl_seconds,
                    default_side, default_currency, language, player_roles,
                    vol_enabled, vol_threshold_bps, vol_max_reprices,
                    created_at, updated_at, learning_started_at
             FROM group_config WHERE group_jid = ?1",
        )?;
        let mut rows = stmt.query([group_jid])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(Self::row_to_config(row)?))
    }

    fn row_to_config(row: &rusqlite::Row) -> rusqlite::Result<GroupConfig> {
        let mode: String = row.get(1)?;
        let spread_mode: String = row.get(2)?;
        let side: String = row.get(6)?;
        let currency: String = row.get(7)?;
        let language: String = row.get(8)?;
        let roles_json: String = row.get(9)?;
        Ok(GroupConfig {
            group_jid: row.get(0)?,
            mode: GroupMode::parse(&mode).unwrap_or(GroupMode::Learning),
            spread_mode: SpreadMode::parse(&spread_mode).unwrap_or(SpreadMode::Bps),
            sell_spread: decimal_from_col(row.get(3)?)?,
            buy_spread: decimal_from_col(row.get(4)?)?,
            quote_ttl_seconds: row.get::<_, i64>(5)? as u32,
            default_side: DealSide::parse(&side).unwrap_or(DealSide::ClientBuysUsdt),
            default_currency: Currency::parse(&currency).unwrap_or(Currency::Brl),
            language: Language::parse(&language).unwrap_or(Language::PtBr),
            player_roles: serde_json::from_str(&roles_json).unwrap_or_default(),
            volatility: VolatilityPolicy {
                enabled: row.get::<_, i64>(10)? != 0,
                threshold_bps: row.get::<_, i64>(11)? as u32,
                max_reprices: row.get::<_, i64>(12)? as u32,
            },
            created_at: from_ms(row.get(13)?),
            updated_at: from_ms(row.get(14)?),
            learning_started_at: row.get::<_, Option<i64>>(15)?.map(from_ms),
        })
    }

    pub fn upsert_config(&self, config: &GroupConfig) -> BotResult<()> {
        let roles_json = serde_json::to_string(&config.player_roles)
            .map_err(|e| BotError::Fatal(format!("serialize player_roles: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO group_config (group_jid, mode, spread_mode, sell_spread, buy_spread,
                 quote_ttl_seconds, default_side, default_currency, language, player_roles,
                 vol_enabled, vol_threshold_bps, vol_max_reprices,
                 created_at, updated_at, learning_started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(group_jid) DO UPDATE SET
                mode = excluded.mode,
                spread_mode = excluded.spread_mode,
                sell_spread = excluded.sell_spread,
                buy_spread = excluded.buy_spread,
                quote_ttl_seconds = excluded.quote_ttl_seconds,
                default_side = excluded.default_side,
                default_currency = excluded.default_currency,
                language = excluded.language,
                player_roles = excluded.player_roles,
                vol_enabled = excluded.vol_enabled,
                vol_threshold_bps = excluded.vol_threshold_bps,
                vol_max_reprices = excluded.vol_max_reprices,
                updated_at = excluded.updated_at,
                learning_started_at = excluded.learning_started_at",
            params![
                config.group_jid,
                config.mode.as_str(),
                config.spread_mode.as_str(),
                config.sell_spread.to_string(),
                config.buy_spread.to_string(),
                config.quote_ttl_seconds as i64,
                config.default_side.as_str(),
                config.default_currency.as_str(),
                config.language.as_str(),
                roles_json,
                config.volatility.enabled as i64,
                config.volatility.threshold_bps as i64,
                config.volatility.max_reprices as i64,
                ms(config.created_at),
                ms(config.updated_at),
                config.learning_started_at.map(ms),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Triggers

    pub fn list_triggers(&self, group_jid: &str) -> BotResult<Vec<Trigger>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, group_jid, trigger_phrase, pattern_type, action_type, action_params,
                    priority, is_active, is_system, scope, created_at
             FROM group_triggers WHERE group_jid = ?1
             ORDER BY priority DESC, created_at ASC",
        )?;
        let triggers = stmt
            .query_map([group_jid], Self::row_to_trigger)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(triggers)
    }

    pub fn get_trigger(&self, group_jid: &str, id: i64) -> BotResult<Option<Trigger>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, group_jid, trigger_phrase, pattern_type, action_type, action_params,
                    priority, is_active, is_system, scope, created_at
             FROM group_triggers WHERE group_jid = ?1 AND id = ?2",
        )?;
        let mut rows = stmt.query(params![group_jid, id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_trigger(row)?)),
            None => Ok(None),
        }
    }

    fn row_to_trigger(row: &rusqlite::Row) -> rusqlite::Result<Trigger> {
        let pattern: String = row.get(3)?;
        let action: String = row.get(4)?;
        let params_json: String = row.get(5)?;
        let scope: String = row.get(9)?;
        Ok(Trigger {
            id: row.get(0)?,
            group_jid: row.get(1)?,
            phrase: row.get(2)?,
            pattern_type: PatternType::parse(&pattern).unwrap_or(PatternType::Contains),
            action_type: ActionType::parse(&action).unwrap_or(ActionType::TextResponse),
            action_params: serde_json::from_str(&params_json)
                .unwrap_or(serde_json::Value::Null),
            priority: row.get::<_, i64>(6)? as u32,
            is_active: row.get::<_, i64>(7)? != 0,
            is_system: row.get::<_, i64>(8)? != 0,
            scope: TriggerScope::parse(&scope).unwrap_or(TriggerScope::Group),
            created_at: from_ms(row.get(10)?),
        })
    }

    /// Insert a trigger; `conflict` when `(group, phrase)` already exists.
    pub fn insert_trigger(&self, trigger: &Trigger) -> BotResult<i64> {
        let params_json = trigger.action_params.to_string();
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO group_triggers (group_jid, trigger_phrase, pattern_type, action_type,
                 action_params, priority, is_active, is_system, scope, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                trigger.group_jid,
                trigger.phrase,
                trigger.pattern_type.as_str(),
                trigger.action_type.as_str(),
                params_json,
                trigger.priority as i64,
                trigger.is_active as i64,
                trigger.is_system as i64,
                trigger.scope.as_str(),
                ms(trigger.created_at),
            ],
        );
        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(BotError::conflict(format!(
                "trigger phrase already exists for group: {}",
                trigger.phrase
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_trigger(&self, trigger: &Trigger) -> BotResult<bool> {
        let params_json = trigger.action_params.to_string();
        let conn = self.conn.lock();
        let result = conn.execute(
            "UPDATE group_triggers SET trigger_phrase = ?1, pattern_type = ?2, action_type = ?3,
                 action_params = ?4, priority = ?5, is_active = ?6, scope = ?7
             WHERE id = ?8 AND group_jid = ?9",
            params![
                trigger.phrase,
                trigger.pattern_type.as_str(),
                trigger.action_type.as_str(),
                params_json,
                trigger.priority as i64,
                trigger.is_active as i64,
                trigger.scope.as_str(),
                trigger.id,
                trigger.group_jid,
            ],
        );
        match result {
            Ok(n) => Ok(n > 0),
            Err(e) if is_unique_violation(&e) => Err(BotError::conflict(format!(
                "trigger phrase already exists for group: {}",
                trigger.phrase
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_trigger(&self, group_jid: &str, id: i64) -> BotResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM group_triggers WHERE id = ?1 AND group_jid = ?2",
            params![id, group_jid],
        )?;
        Ok(n > 0)
    }

    // ------------------------------------------------------------------
    // Time rules

    pub fn list_rules(&self, group_jid: &str) -> BotResult<Vec<TimeRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, group_jid, name, pricing_source, spread_mode, sell_spread, buy_spread,
                    priority, active_window, is_system, is_active, created_at
             FROM rules WHERE group_jid = ?1
             ORDER BY priority DESC, created_at ASC",
        )?;
        let rules = stmt
            .query_map([group_jid], Self::row_to_rule)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rules)
    }

    pub fn get_rule(&self, id: i64) -> BotResult<Option<TimeRule>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, group_jid, name, pricing_source, spread_mode, sell_spread, buy_spread,
                    priority, active_window, is_system, is_active, created_at
             FROM rules WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_rule(row)?)),
            None => Ok(None),
        }
    }

    fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<TimeRule> {
        let source: String = row.get(3)?;
        let spread_mode: String = row.get(4)?;
        let window_json: String = row.get(8)?;
        let window: ActiveWindow = serde_json::from_str(&window_json)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        Ok(TimeRule {
            id: row.get(0)?,
            group_jid: row.get(1)?,
            name: row.get(2)?,
            pricing_source: PricingSource::parse(&source).unwrap_or(PricingSource::Binance),
            spread_mode: SpreadMode::parse(&spread_mode).unwrap_or(SpreadMode::Bps),
            sell_spread: decimal_from_col(row.get(5)?)?,
            buy_spread: decimal_from_col(row.get(6)?)?,
            priority: row.get::<_, i64>(7)? as u32,
            active_window: window,
            is_system: row.get::<_, i64>(9)? != 0,
            is_active: row.get::<_, i64>(10)? != 0,
            created_at: from_ms(row.get(11)?),
        })
    }

    pub fn insert_rule(&self, rule: &TimeRule) -> BotResult<i64> {
        let window_json = serde_json::to_string(&rule.active_window)
            .map_err(|e| BotError::Fatal(format!("serialize active_window: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rules (group_jid, name, pricing_source, spread_mode, sell_spread,
                 buy_spread, priority, active_window, is_system, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                rule.group_jid,
                rule.name,
                rule.pricing_source.as_str(),
                rule.spread_mode.as_str(),
                rule.sell_spread.to_string(),
                rule.buy_spread.to_string(),
                rule.priority as i64,
                window_json,
                rule.is_system as i64,
                rule.is_active as i64,
                ms(rule.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update_rule(&self, rule: &TimeRule) -> BotResult<bool> {
        let window_json = serde_json::to_string(&rule.active_window)
            .map_err(|e| BotError::Fatal(format!("serialize active_window: {e}")))?;
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE rules SET name = ?1, pricing_source = ?2, spread_mode = ?3,
                 sell_spread = ?4, buy_spread = ?5, priority = ?6, active_window = ?7,
                 is_active = ?8
             WHERE id = ?9",
            params![
                rule.name,
                rule.pricing_source.as_str(),
                rule.spread_mode.as_str(),
                rule.sell_spread.to_string(),
                rule.buy_spread.to_string(),
                rule.priority as i64,
                window_json,
                rule.is_active as i64,
                rule.id,
            ],
        )?;
        Ok(n > 0)
    }

    pub fn delete_rule(&self, id: i64) -> BotResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM rules WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    // ------------------------------------------------------------------
    // Deals

    /// Insert a fresh deal. `conflict` when the (group, client) pair
    /// already has a non-terminal deal (unique partial index).
    pub fn insert_deal(&self, deal: &Deal) -> BotResult<()> {
        let conn = self.conn.lock();
        let result = conn.execute(
            "INSERT INTO deals (id, group_jid, client_jid, state, side, base_rate, quoted_rate,
                 locked_rate, locked_at, amount_brl, amount_usdt, ttl_expires_at, rule_id_used,
                 rule_name, pricing_source, spread_mode, sell_spread, buy_spread, reprice_count,
                 metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22)",
            params![
                deal.id,
                deal.group_jid,
                deal.client_jid,
                deal.state.as_str(),
                deal.side.as_str(),
                deal.base_rate.to_string(),
                deal.quoted_rate.to_string(),
                deal.locked_rate.map(|d| d.to_string()),
                deal.locked_at.map(ms),
                deal.amount_brl.map(|d| d.to_string()),
                deal.amount_usdt.map(|d| d.to_string()),
                ms(deal.ttl_expires_at),
                deal.rule_id_used,
                deal.rule_name,
                deal.pricing_source.as_str(),
                deal.spread_mode.as_str(),
                deal.sell_spread.to_string(),
                deal.buy_spread.to_string(),
                deal.reprice_count as i64,
                deal.metadata.to_string(),
                ms(deal.created_at),
                ms(deal.updated_at),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(BotError::conflict(
                "client already has an active deal in this group",
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_deal(&self, deal_id: &str) -> BotResult<Option<Deal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM deals WHERE id = ?1",
            DEAL_COLUMNS
        ))?;
        let mut rows = stmt.query([deal_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_deal(row)?)),
            None => Ok(None),
        }
    }

    /// The client's non-terminal deal in the group, if one exists.
    pub fn get_active_deal(&self, group_jid: &str, client_jid: &str) -> BotResult<Option<Deal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM deals
             WHERE group_jid = ?1 AND client_jid = ?2
               AND state IN ('quoted', 'locked', 'computing')",
            DEAL_COLUMNS
        ))?;
        let mut rows = stmt.query(params![group_jid, client_jid])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_deal(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_active_deals(&self, group_jid: Option<&str>) -> BotResult<Vec<Deal>> {
        let conn = self.conn.lock();
        let deals = if let Some(jid) = group_jid {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM deals WHERE group_jid = ?1 ORDER BY created_at DESC",
                DEAL_COLUMNS
            ))?;
            let deals: Vec<Deal> = stmt
                .query_map([jid], Self::row_to_deal)?
                .filter_map(|r| r.ok())
                .collect();
            deals
        } else {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM deals ORDER BY created_at DESC",
                DEAL_COLUMNS
            ))?;
            let deals: Vec<Deal> = stmt
                .query_map([], Self::row_to_deal)?
                .filter_map(|r| r.ok())
                .collect();
            deals
        };
        Ok(deals)
    }

    /// Non-terminal deals whose TTL elapsed at or before `now`.
    pub fn expired_deal_ids(&self, now: DateTime<Utc>) -> BotResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM deals
             WHERE ttl_expires_at <= ?1 AND state IN ('quoted', 'locked', 'computing')",
        )?;
        let ids = stmt
            .query_map([ms(now)], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// All deals currently in `quoted` for a pricing source (volatility
    /// monitor feed).
    pub fn quoted_deals_for_source(&self, source: PricingSource) -> BotResult<Vec<Deal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM deals WHERE state = 'quoted' AND pricing_source = ?1",
            DEAL_COLUMNS
        ))?;
        let deals = stmt
            .query_map([source.as_str()], Self::row_to_deal)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(deals)
    }

    /// Compare-and-set write of the full deal row. Returns false when the
    /// stored state no longer matches `expected_state` (caller re-reads).
    pub fn cas_update_deal(&self, deal: &Deal, expected_state: DealState) -> BotResult<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE deals SET state = ?1, quoted_rate = ?2, base_rate = ?3, locked_rate = ?4,
                 locked_at = ?5, amount_brl = ?6, amount_usdt = ?7, ttl_expires_at = ?8,
                 reprice_count = ?9, metadata = ?10, updated_at = ?11
             WHERE id = ?12 AND state = ?13",
            params![
                deal.state.as_str(),
                deal.quoted_rate.to_string(),
                deal.base_rate.to_string(),
                deal.locked_rate.map(|d| d.to_string()),
                deal.locked_at.map(ms),
                deal.amount_brl.map(|d| d.to_string()),
                deal.amount_usdt.map(|d| d.to_string()),
                ms(deal.ttl_expires_at),
                deal.reprice_count as i64,
                deal.metadata.to_string(),
                ms(deal.updated_at),
                deal.id,
                expected_state.as_str(),
            ],
        )?;
        Ok(n > 0)
    }

    /// Archive a terminal deal: insert into history and delete the active
    /// row in one transaction (invariant: single logical step).
    pub fn archive_deal(
        &self,
        deal: &Deal,
        completion_reason: &str,
        archived_at: DateTime<Utc>,
    ) -> BotResult<()> {
        let deal_json = serde_json::to_string(deal)
            .map_err(|e| BotError::Fatal(format!("serialize deal: {e}")))?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(BotError::Storage)?;
        tx.execute(
            "INSERT OR REPLACE INTO deal_history
                 (id, group_jid, client_jid, final_state, completion_reason, deal_json, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                deal.id,
                deal.group_jid,
                deal.client_jid,
                deal.state.as_str(),
                completion_reason,
                deal_json,
                ms(archived_at),
            ],
        )?;
        tx.execute("DELETE FROM deals WHERE id = ?1", params![deal.id])?;
        tx.commit().map_err(BotError::Storage)?;
        Ok(())
    }

    /// Archived deal by id, for idempotent no-op responses after archive.
    pub fn get_history_deal(&self, deal_id: &str) -> BotResult<Option<Deal>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT deal_json FROM deal_history WHERE id = ?1")?;
        let mut rows = stmt.query([deal_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let deal_json: String = row.get(0)?;
        let deal: Deal = serde_json::from_str(&deal_json)
            .map_err(|e| BotError::Fatal(format!("corrupt archived deal: {e}")))?;
        Ok(Some(deal))
    }

    pub fn list_deal_history(&self, group_jid: &str, limit: usize) -> BotResult<Vec<DealHistoryRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT deal_json, final_state, completion_reason, archived_at
             FROM deal_history WHERE group_jid = ?1
             ORDER BY archived_at DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![group_jid, limit as i64], |row| {
                let deal_json: String = row.get(0)?;
                let final_state: String = row.get(1)?;
                let deal: Deal = serde_json::from_str(&deal_json)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                Ok(DealHistoryRecord {
                    deal,
                    final_state: DealState::parse(&final_state).unwrap_or(DealState::Cancelled),
                    completion_reason: row.get(2)?,
                    archived_at: from_ms(row.get(3)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    fn row_to_deal(row: &rusqlite::Row) -> rusqlite::Result<Deal> {
        let state: String = row.get(3)?;
        let side: String = row.get(4)?;
        let source: String = row.get(14)?;
        let spread_mode: String = row.get(15)?;
        let metadata_json: String = row.get(19)?;
        Ok(Deal {
            id: row.get(0)?,
            group_jid: row.get(1)?,
            client_jid: row.get(2)?,
            state: DealState::parse(&state).unwrap_or(DealState::Cancelled),
            side: DealSide::parse(&side).unwrap_or(DealSide::ClientBuysUsdt),
            base_rate: decimal_from_col(row.get(5)?)?,
            quoted_rate: decimal_from_col(row.get(6)?)?,
            locked_rate: row
                .get::<_, Option<String>>(7)?
                .map(|s| Decimal::from_str(&s))
                .transpose()
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            locked_at: row.get::<_, Option<i64>>(8)?.map(from_ms),
            amount_brl: row
                .get::<_, Option<String>>(9)?
                .map(|s| Decimal::from_str(&s))
                .transpose()
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            amount_usdt: row
                .get::<_, Option<String>>(10)?
                .map(|s| Decimal::from_str(&s))
                .transpose()
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            ttl_expires_at: from_ms(row.get(11)?),
            rule_id_used: row.get(12)?,
            rule_name: row.get(13)?,
            pricing_source: PricingSource::parse(&source).unwrap_or(PricingSource::Binance),
            spread_mode: SpreadMode::parse(&spread_mode).unwrap_or(SpreadMode::Bps),
            sell_spread: decimal_from_col(row.get(16)?)?,
            buy_spread: decimal_from_col(row.get(17)?)?,
            reprice_count: row.get::<_, i64>(18)? as u32,
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
            created_at: from_ms(row.get(20)?),
            updated_at: from_ms(row.get(21)?),
        })
    }

    // ------------------------------------------------------------------
    // Messages (observe log)

    pub fn record_message(
        &self,
        message_id: &str,
        group_jid: &str,
        sender_jid: &str,
        sender_name: Option<&str>,
        text: &str,
        route: &str,
        now: DateTime<Utc>,
    ) -> BotResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO messages
                 (message_id, group_jid, sender_jid, sender_name, text, route, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![message_id, group_jid, sender_jid, sender_name, text, route, ms(now)],
        )?;
        Ok(())
    }

    /// Recent messages for a group, oldest first (simulator replay).
    pub fn recent_messages(
        &self,
        group_jid: &str,
        limit: usize,
    ) -> BotResult<Vec<(String, String, Option<String>, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT message_id, sender_jid, sender_name, text FROM messages
             WHERE group_jid = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let mut rows: Vec<(String, String, Option<String>, String)> = stmt
            .query_map(params![group_jid, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        rows.reverse();
        Ok(rows)
    }

    pub fn messages_sent_since(&self, since: DateTime<Utc>) -> BotResult<i64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE created_at >= ?1",
            [ms(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Bronze sinks (called from the drain worker only)

    pub fn insert_price_tick(
        &self,
        source: &str,
        symbol: &str,
        price: f64,
        bid: Option<f64>,
        ask: Option<f64>,
        captured_at: DateTime<Utc>,
    ) -> BotResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bronze_price_ticks (source, symbol, price, bid, ask, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![source, symbol, price, bid, ask, ms(captured_at)],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_deal_event(
        &self,
        deal_id: &str,
        group_jid: &str,
        client_jid: &str,
        from_state: Option<&str>,
        to_state: &str,
        event_type: &str,
        market_price: Option<&str>,
        deal_snapshot: &str,
        metadata: &str,
        created_at: DateTime<Utc>,
    ) -> BotResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bronze_deal_events (deal_id, group_jid, client_jid, from_state,
                 to_state, event_type, market_price, deal_snapshot, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                deal_id,
                group_jid,
                client_jid,
                from_state,
                to_state,
                event_type,
                market_price,
                deal_snapshot,
                metadata,
                ms(created_at),
            ],
        )?;
        Ok(())
    }

    /// 90-day retention for bronze ticks; run from a daily task.
    pub fn prune_bronze_ticks_before(&self, cutoff: DateTime<Utc>) -> BotResult<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM bronze_price_ticks WHERE captured_at < ?1",
            [ms(cutoff)],
        )?;
        Ok(n)
    }

    // ------------------------------------------------------------------
    // Sessions / AI usage

    pub fn get_session_auth(&self) -> BotResult<Option<String>> {
        let conn = self.conn.lock();
        let result: Option<String> = conn
            .query_row(
                "SELECT auth_state FROM sessions WHERE id = 'default'",
                [],
                |row| row.get(0),
            )
            .ok();
        Ok(result)
    }

    pub fn set_session_auth(&self, auth_state: &str, now: DateTime<Utc>) -> BotResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (id, auth_state, updated_at) VALUES ('default', ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET auth_state = excluded.auth_state,
                                           updated_at = excluded.updated_at",
            params![auth_state, ms(now)],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_ai_usage(
        &self,
        service: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        cost_usd: f64,
        group_jid: Option<&str>,
        duration_ms: Option<i64>,
        success: bool,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> BotResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ai_usage (service, model, input_tokens, output_tokens, cost_usd,
                 group_jid, duration_ms, success, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                service,
                model,
                input_tokens,
                output_tokens,
                cost_usd,
                group_jid,
                duration_ms,
                success as i64,
                error_message,
                ms(now),
            ],
        )?;
        Ok(())
    }
}

const DEAL_COLUMNS: &str = "id, group_jid, client_jid, state, side, base_rate, quoted_rate, \
     locked_rate, locked_at, amount_brl, amount_usdt, ttl_expires_at, rule_id_used, rule_name, \
     pricing_source, spread_mode, sell_spread, buy_spread, reprice_count, metadata, created_at, \
     updated_at";

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_deal(group: &str, client: &str) -> Deal {
        let now = Utc::now();
        Deal {
            id: uuid::Uuid::new_v4().to_string(),
            group_jid: group.to_string(),
            client_jid: client.to_string(),
            state: DealState::Quoted,
            side: DealSide::ClientBuysUsdt,
            base_rate: dec!(5.20),
            quoted_rate: dec!(5.2260),
            locked_rate: None,
            locked_at: None,
            amount_brl: None,
            amount_usdt: None,
            ttl_expires_at: now + chrono::Duration::seconds(180),
            rule_id_used: None,
            rule_name: None,
            pricing_source: PricingSource::Binance,
            spread_mode: SpreadMode::Bps,
            sell_spread: dec!(50),
            buy_spread: dec!(0),
            reprice_count: 0,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn active_deal_uniqueness_enforced() {
        let store = Store::open_in_memory().unwrap();
        let deal = sample_deal("g1", "c1");
        store.insert_deal(&deal).unwrap();

        let second = sample_deal("g1", "c1");
        let err = store.insert_deal(&second).unwrap_err();
        assert!(matches!(err, BotError::Conflict(_)));

        // A different client in the same group is fine.
        store.insert_deal(&sample_deal("g1", "c2")).unwrap();
    }

    #[test]
    fn terminal_deal_frees_the_slot() {
        let store = Store::open_in_memory().unwrap();
        let mut deal = sample_deal("g1", "c1");
        store.insert_deal(&deal).unwrap();

        deal.state = DealState::Cancelled;
        deal.updated_at = Utc::now();
        store.archive_deal(&deal, "client request", Utc::now()).unwrap();

        assert!(store.get_active_deal("g1", "c1").unwrap().is_none());
        store.insert_deal(&sample_deal("g1", "c1")).unwrap();

        let history = store.list_deal_history("g1", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].final_state, DealState::Cancelled);
        assert_eq!(history[0].completion_reason, "client request");
    }

    #[test]
    fn cas_update_requires_matching_state() {
        let store = Store::open_in_memory().unwrap();
        let mut deal = sample_deal("g1", "c1");
        store.insert_deal(&deal).unwrap();

        deal.state = DealState::Locked;
        deal.locked_rate = Some(dec!(5.2260));
        deal.locked_at = Some(Utc::now());
        assert!(store.cas_update_deal(&deal, DealState::Quoted).unwrap());

        // A second writer with a stale expectation loses.
        let mut stale = deal.clone();
        stale.state = DealState::Cancelled;
        assert!(!store.cas_update_deal(&stale, DealState::Quoted).unwrap());

        let stored = store.get_deal(&deal.id).unwrap().unwrap();
        assert_eq!(stored.state, DealState::Locked);
        assert_eq!(stored.locked_rate, Some(dec!(5.2260)));
    }

    #[test]
    fn decimal_fields_round_trip_exactly() {
        let store = Store::open_in_memory().unwrap();
        let mut deal = sample_deal("g1", "c1");
        deal.amount_brl = Some(dec!(4479100));
        deal.amount_usdt = Some(dec!(853161.90));
        store.insert_deal(&deal).unwrap();

        let stored = store.get_deal(&deal.id).unwrap().unwrap();
        assert_eq!(stored.base_rate, dec!(5.20));
        assert_eq!(stored.quoted_rate, dec!(5.2260));
        assert_eq!(stored.amount_usdt, Some(dec!(853161.90)));
    }

    #[test]
    fn expired_candidates_cover_all_nonterminal_states() {
        let store = Store::open_in_memory().unwrap();
        let past = Utc::now() - chrono::Duration::seconds(10);

        let mut quoted = sample_deal("g1", "c1");
        quoted.ttl_expires_at = past;
        store.insert_deal(&quoted).unwrap();

        let mut locked = sample_deal("g1", "c2");
        locked.state = DealState::Locked;
        locked.locked_rate = Some(dec!(5.2260));
        locked.ttl_expires_at = past;
        store.insert_deal(&locked).unwrap();

        let mut fresh = sample_deal("g1", "c3");
        fresh.ttl_expires_at = Utc::now() + chrono::Duration::seconds(60);
        store.insert_deal(&fresh).unwrap();

        let mut ids = store.expired_deal_ids(Utc::now()).unwrap();
        ids.sort();
        let mut expected = vec![quoted.id.clone(), locked.id.clone()];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn trigger_unique_per_group_phrase() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let trig = Trigger {
            id: 0,
            group_jid: "g1".into(),
            phrase: "preço".into(),
            pattern_type: PatternType::Contains,
            action_type: ActionType::Quote,
            action_params: serde_json::json!({}),
            priority: 80,
            is_active: true,
            is_system: true,
            scope: TriggerScope::Group,
            created_at: now,
        };
        store.insert_trigger(&trig).unwrap();
        let err = store.insert_trigger(&trig).unwrap_err();
        assert!(matches!(err, BotError::Conflict(_)));

        // Same phrase in another group is allowed.
        let mut other = trig.clone();
        other.group_jid = "g2".into();
        store.insert_trigger(&other).unwrap();
    }

    #[test]
    fn opens_on_disk_database_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        store.touch_group("g1", "OTC Desk", false, Utc::now()).unwrap();
        store.touch_group("g1", "OTC Desk", false, Utc::now()).unwrap();

        let group = store.get_group("g1").unwrap().unwrap();
        assert_eq!(group.message_count, 2);
    }

    #[test]
    fn group_config_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let mut config = GroupConfig::defaults_for("g1");
        config.sell_spread = dec!(50);
        config.mode = GroupMode::Active;
        config
            .player_roles
            .insert("op@jid".into(), "operator".into());
        store.upsert_config(&config).unwrap();

        let stored = store.get_config("g1").unwrap().unwrap();
        assert_eq!(stored.mode, GroupMode::Active);
        assert_eq!(stored.sell_spread, dec!(50));
        assert!(stored.is_operator("op@jid"));
        assert_eq!(stored.quote_ttl_seconds, 180);
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Operating mode of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    Learning,
    Assisted,
    Active,
    Paused,
}

impl GroupMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupMode::Learning => "learning",
            GroupMode::Assisted => "assisted",
            GroupMode::Active => "active",
            GroupMode::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "learning" => Some(GroupMode::Learning),
            "assisted" => Some(GroupMode::Assisted),
            "active" => Some(GroupMode::Active),
            "paused" => Some(GroupMode::Paused),
            _ => None,
        }
    }
}

/// A chat room the bot participates in. Discovered on first inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub jid: String,
    pub name: String,
    /// Authoritative when stored; derived from the control-group name
    /// pattern on discovery.
    pub is_control_group: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub message_count: i64,
}

/// How the operator margin is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadMode {
    /// Basis points over/under the mid.
    Bps,
    /// Absolute BRL added/subtracted from the mid.
    AbsBrl,
    /// The spread value IS the quoted rate.
    Flat,
}

impl SpreadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpreadMode::Bps => "bps",
            SpreadMode::AbsBrl => "abs_brl",
            SpreadMode::Flat => "flat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bps" => Some(SpreadMode::Bps),
            "abs_brl" => Some(SpreadMode::AbsBrl),
            "flat" => Some(SpreadMode::Flat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealSide {
    ClientBuysUsdt,
    ClientSellsUsdt,
}

impl DealSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealSide::ClientBuysUsdt => "client_buys_usdt",
            DealSide::ClientSellsUsdt => "client_sells_usdt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "client_buys_usdt" => Some(DealSide::ClientBuysUsdt),
            "client_sells_usdt" => Some(DealSide::ClientSellsUsdt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Brl,
    Usdt,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Brl => "BRL",
            Currency::Usdt => "USDT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BRL" | "brl" => Some(Currency::Brl),
            "USDT" | "usdt" => Some(Currency::Usdt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "pt-BR")]
    PtBr,
    #[serde(rename = "en")]
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::PtBr => "pt-BR",
            Language::En => "en",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pt-BR" | "pt-br" | "pt" => Some(Language::PtBr),
            "en" => Some(Language::En),
            _ => None,
        }
    }
}

/// Volatility-aware reprice policy, configured per group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolatilityPolicy {
    pub enabled: bool,
    /// Drift that triggers a reprice, in basis points (10..1000).
    pub threshold_bps: u32,
    /// Reprices allowed per deal before escalation (1..10).
    pub max_reprices: u32,
}

impl Default for VolatilityPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bps: 30,
            max_reprices: 3,
        }
    }
}

/// Per-group pricing and conversation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub group_jid: String,
    pub mode: GroupMode,
    pub spread_mode: SpreadMode,
    pub sell_spread: Decimal,
    pub buy_spread: Decimal,
    /// 1..3600 seconds.
    pub quote_ttl_seconds: u32,
    pub default_side: DealSide,
    pub default_currency: Currency,
    pub language: Language,
    /// participant jid -> role ("operator", "client", ...).
    pub player_roles: std::collections::HashMap<String, String>,
    pub volatility: VolatilityPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub learning_started_at: Option<DateTime<Utc>>,
}

impl GroupConfig {
    pub fn defaults_for(group_jid: &str) -> Self {
        let now = Utc::now();
        Self {
            group_jid: group_jid.to_string(),
            mode: GroupMode::Learning,
            spread_mode: SpreadMode::Bps,
            sell_spread: Decimal::ZERO,
            buy_spread: Decimal::ZERO,
            quote_ttl_seconds: 180,
            default_side: DealSide::ClientBuysUsdt,
            default_currency: Currency::Brl,
            language: Language::PtBr,
            player_roles: std::collections::HashMap::new(),
            volatility: VolatilityPolicy::default(),
            created_at: now,
            updated_at: now,
            learning_started_at: Some(now),
        }
    }

    pub fn role_of(&self, sender_jid: &str) -> Option<&str> {
        self.player_roles.get(sender_jid).map(|s| s.as_str())
    }

    pub fn is_operator(&self, sender_jid: &str) -> bool {
        matches!(self.role_of(sender_jid), Some("operator"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Exact,
    Contains,
    Regex,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Exact => "exact",
            PatternType::Contains => "contains",
            PatternType::Regex => "regex",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(PatternType::Exact),
            "contains" => Some(PatternType::Contains),
            "regex" => Some(PatternType::Regex),
            _ => None,
        }
    }
}

/// What a matched trigger makes the bot do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Open a quote for the sender.
    Quote,
    /// Lock the sender's quoted deal.
    Lock,
    /// Cancel the sender's active deal.
    Cancel,
    /// Operator confirms settlement of a locked deal.
    Complete,
    /// Reply with a fixed text (`action_params.text`).
    TextResponse,
    /// Consult the AI classifier with a prompt (`action_params.prompt`).
    AiPrompt,
    /// Control-scope: pause the bot.
    Pause,
    /// Control-scope: resume the bot.
    Resume,
    /// Control-scope: report operational status.
    Status,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Quote => "quote",
            ActionType::Lock => "lock",
            ActionType::Cancel => "cancel",
            ActionType::Complete => "complete",
            ActionType::TextResponse => "text_response",
            ActionType::AiPrompt => "ai_prompt",
            ActionType::Pause => "pause",
            ActionType::Resume => "resume",
            ActionType::Status => "status",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quote" => Some(ActionType::Quote),
            "lock" => Some(ActionType::Lock),
            "cancel" => Some(ActionType::Cancel),
            "complete" => Some(ActionType::Complete),
            "text_response" => Some(ActionType::TextResponse),
            "ai_prompt" => Some(ActionType::AiPrompt),
            "pause" => Some(ActionType::Pause),
            "resume" => Some(ActionType::Resume),
            "status" => Some(ActionType::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerScope {
    Group,
    ControlOnly,
}

impl TriggerScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerScope::Group => "group",
            TriggerScope::ControlOnly => "control_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "group" => Some(TriggerScope::Group),
            "control_only" => Some(TriggerScope::ControlOnly),
            _ => None,
        }
    }
}

/// A text pattern that makes the bot act when matched in a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: i64,
    pub group_jid: String,
    pub phrase: String,
    pub pattern_type: PatternType,
    pub action_type: ActionType,
    /// Action-specific parameters (`text`, `prompt`, ...).
    pub action_params: serde_json::Value,
    /// 0..100, higher wins.
    pub priority: u32,
    pub is_active: bool,
    /// Seeded OTC vocabulary; editable but marked.
    pub is_system: bool,
    pub scope: TriggerScope,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingSource {
    Binance,
    Commercial,
    Tradingview,
}

impl PricingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingSource::Binance => "binance",
            PricingSource::Commercial => "commercial",
            PricingSource::Tradingview => "tradingview",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "binance" => Some(PricingSource::Binance),
            "commercial" => Some(PricingSource::Commercial),
            "tradingview" => Some(PricingSource::Tradingview),
            _ => None,
        }
    }
}

/// Day-of-week x time-of-day activation window for a time rule.
///
/// `days` holds chrono weekday numbers (Mon=1..Sun=7); times are minutes
/// from midnight, `start..end` half-open. Windows wrapping midnight are
/// expressed as two rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub days: Vec<u8>,
    pub start_minute: u16,
    pub end_minute: u16,
}

impl ActiveWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        use chrono::{Datelike, Timelike};
        let day = now.weekday().number_from_monday() as u8;
        if !self.days.contains(&day) {
            return false;
        }
        let minute = (now.hour() * 60 + now.minute()) as u16;
        minute >= self.start_minute && minute < self.end_minute
    }
}

/// Scheduled per-group override of the pricing fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRule {
    pub id: i64,
    pub group_jid: String,
    pub name: String,
    pub pricing_source: PricingSource,
    pub spread_mode: SpreadMode,
    pub sell_spread: Decimal,
    pub buy_spread: Decimal,
    pub priority: u32,
    pub active_window: ActiveWindow,
    pub is_system: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealState {
    Quoted,
    Locked,
    Computing,
    Completed,
    Expired,
    Cancelled,
}

impl DealState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealState::Quoted => "quoted",
            DealState::Locked => "locked",
            DealState::Computing => "computing",
            DealState::Completed => "completed",
            DealState::Expired => "expired",
            DealState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quoted" => Some(DealState::Quoted),
            "locked" => Some(DealState::Locked),
            "computing" => Some(DealState::Computing),
            "completed" => Some(DealState::Completed),
            "expired" => Some(DealState::Expired),
            "cancelled" => Some(DealState::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DealState::Completed | DealState::Expired | DealState::Cancelled
        )
    }
}

/// The core stateful entity: one in-flight OTC conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    pub group_jid: String,
    pub client_jid: String,
    pub state: DealState,
    pub side: DealSide,
    /// Raw upstream mid at quote time.
    pub base_rate: Decimal,
    /// Rate with spread applied; what the client sees.
    pub quoted_rate: Decimal,
    pub locked_rate: Option<Decimal>,
    pub locked_at: Option<DateTime<Utc>>,
    pub amount_brl: Option<Decimal>,
    pub amount_usdt: Option<Decimal>,
    pub ttl_expires_at: DateTime<Utc>,
    pub rule_id_used: Option<i64>,
    pub rule_name: Option<String>,
    pub pricing_source: PricingSource,
    pub spread_mode: SpreadMode,
    pub sell_spread: Decimal,
    pub buy_spread: Decimal,
    pub reprice_count: u32,
    /// Implementation-specific flags ("await_operator", ...).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    /// Rate amounts are computed against: the locked rate once locked.
    pub fn effective_rate(&self) -> Decimal {
        self.locked_rate.unwrap_or(self.quoted_rate)
    }

    pub fn awaiting_operator(&self) -> bool {
        self.metadata
            .get("await_operator")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Archived terminal deal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealHistoryRecord {
    pub deal: Deal,
    pub final_state: DealState,
    pub completion_reason: String,
    pub archived_at: DateTime<Utc>,
}

/// Inbound group message as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub group_jid: String,
    pub group_name: String,
    pub sender_jid: String,
    pub sender_name: Option<String>,
    pub text: String,
    pub attachments: Vec<String>,
    pub timestamp_ms: i64,
    /// Opaque transport payload, never interpreted.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// A single upstream price observation.
#[derive(Debug, Clone, Serialize)]
pub struct PriceSample {
    pub source: &'static str,
    pub symbol: String,
    pub price: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

/// Application configuration from environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Case-insensitive substring that marks a group name as the control
    /// group.
    pub control_group_pattern: String,
    /// The bot's own participant jid, derived from the phone number.
    pub bot_jid: String,
    /// When absent the write API is open (dev mode).
    pub dashboard_secret: Option<String>,
    pub allowed_origins: Vec<String>,
    pub tradingview_url: String,
    pub tradingview_stale_ms: i64,
    pub tradingview_frozen_ms: i64,
    pub tradingview_watchdog_ms: u64,
    pub tradingview_max_nav_per_hour: u32,
    pub tradingview_rate_limit_bypass_ms: i64,
    pub market_rest_url: String,
    pub ai_endpoint_url: Option<String>,
    pub ai_api_key: Option<String>,
    pub max_group_workers: usize,
    pub group_queue_depth: usize,
    pub sweep_interval_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./otcbot.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let control_group_pattern =
            std::env::var("CONTROL_GROUP_PATTERN").unwrap_or_else(|_| "mesa".to_string());

        let phone_number = std::env::var("PHONE_NUMBER").unwrap_or_default();
        let bot_jid = if phone_number.is_empty() {
            String::new()
        } else {
            format!("{}@s.whatsapp.net", phone_number.trim_start_matches('+'))
        };

        let dashboard_secret = std::env::var("DASHBOARD_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let tradingview_url = std::env::var("TRADINGVIEW_URL")
            .unwrap_or_else(|_| "https://www.tradingview.com/symbols/USDBRL/".to_string());

        let env_i64 = |key: &str, default: i64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(default)
        };
        let env_u64 = |key: &str, default: u64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        Ok(Self {
            database_path,
            port,
            control_group_pattern,
            bot_jid,
            dashboard_secret,
            allowed_origins,
            tradingview_url,
            tradingview_stale_ms: env_i64("TRADINGVIEW_STALE_MS", 120_000),
            tradingview_frozen_ms: env_i64("TRADINGVIEW_FROZEN_MS", 90_000),
            tradingview_watchdog_ms: env_u64("TRADINGVIEW_WATCHDOG_MS", 15_000),
            tradingview_max_nav_per_hour: env_u64("TRADINGVIEW_MAX_NAV_PER_HOUR", 20) as u32,
            tradingview_rate_limit_bypass_ms: env_i64("TRADINGVIEW_RATE_LIMIT_BYPASS_MS", 300_000),
            market_rest_url: std::env::var("MARKET_REST_URL")
                .unwrap_or_else(|_| "https://api.binance.com".to_string()),
            ai_endpoint_url: std::env::var("AI_ENDPOINT_URL").ok().filter(|s| !s.is_empty()),
            ai_api_key: std::env::var("AI_API_KEY").ok().filter(|s| !s.is_empty()),
            max_group_workers: env_u64("MAX_GROUP_WORKERS", 64) as usize,
            group_queue_depth: env_u64("GROUP_QUEUE_DEPTH", 256) as usize,
            sweep_interval_ms: env_u64("SWEEP_INTERVAL_MS", 10_000),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deal_state_round_trip() {
        for s in [
            DealState::Quoted,
            DealState::Locked,
            DealState::Computing,
            DealState::Completed,
            DealState::Expired,
            DealState::Cancelled,
        ] {
            assert_eq!(DealState::parse(s.as_str()), Some(s));
        }
        assert!(DealState::parse("nope").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(!DealState::Quoted.is_terminal());
        assert!(!DealState::Locked.is_terminal());
        assert!(!DealState::Computing.is_terminal());
        assert!(DealState::Completed.is_terminal());
        assert!(DealState::Expired.is_terminal());
        assert!(DealState::Cancelled.is_terminal());
    }

    #[test]
    fn active_window_contains() {
        use chrono::TimeZone;
        // Wednesday 14:30 UTC.
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 14, 30, 0).unwrap();
        let window = ActiveWindow {
            days: vec![1, 2, 3, 4, 5],
            start_minute: 9 * 60,
            end_minute: 18 * 60,
        };
        assert!(window.contains(now));

        // Saturday same time.
        let saturday = Utc.with_ymd_and_hms(2024, 7, 6, 14, 30, 0).unwrap();
        assert!(!window.contains(saturday));

        // End minute is exclusive.
        let at_end = Utc.with_ymd_and_hms(2024, 7, 3, 18, 0, 0).unwrap();
        assert!(!window.contains(at_end));
    }

    #[test]
    fn effective_rate_prefers_locked() {
        use rust_decimal_macros::dec;
        let now = Utc::now();
        let deal = Deal {
            id: "d1".into(),
            group_jid: "g".into(),
            client_jid: "c".into(),
            state: DealState::Locked,
            side: DealSide::ClientBuysUsdt,
            base_rate: dec!(5.20),
            quoted_rate: dec!(5.2260),
            locked_rate: Some(dec!(5.2300)),
            locked_at: Some(now),
            amount_brl: None,
            amount_usdt: None,
            ttl_expires_at: now,
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
        };
        assert_eq!(deal.effective_rate(), dec!(5.2300));
    }
}

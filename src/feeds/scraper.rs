//! Commercial USD/BRL rate from a scraped page title.
//!
//! The embedded-browser automation lives outside the core; we only see a
//! `TitleSource` that yields the current page title. The supervisor
//! refreshes on a watchdog interval, detects a frozen title age, and
//! spends a bounded navigation budget (per rolling hour, with one bypass
//! per cooldown once exhausted).

use crate::error_service::ErrorService;
use crate::feeds::{FeedSource, PriceAggregator, SYMBOL_USD_BRL};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::OnceLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const SOURCE: &str = "stream_b";

/// Page-title boundary. `refresh` is the soft path; `reconnect` rebuilds
/// the underlying session.
#[async_trait]
pub trait TitleSource: Send + Sync {
    async fn fetch_title(&self) -> anyhow::Result<String>;
    async fn reconnect(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Plain HTTP fallback implementation: fetch the page and read `<title>`.
pub struct HttpTitleSource {
    client: reqwest::Client,
    url: String,
}

impl HttpTitleSource {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64)")
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl TitleSource for HttpTitleSource {
    async fn fetch_title(&self) -> anyhow::Result<String> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let title = body
            .split("<title>")
            .nth(1)
            .and_then(|rest| rest.split("</title>").next())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("page has no title"))?;
        Ok(title.to_string())
    }
}

/// First decimal number in a page title, tolerating both `5.43` and
/// `5,43` notations.
pub fn parse_title_price(title: &str) -> Option<f64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"([0-9]+[.,][0-9]+)").expect("static pattern compiles")
    });
    let captured = re.captures(title)?.get(1)?.as_str();
    captured.replace(',', ".").parse::<f64>().ok()
}

/// Rolling-hour navigation budget with a single bypass per cooldown.
pub struct NavBudget {
    max_per_hour: u32,
    bypass_cooldown: Duration,
    navs: Mutex<VecDeque<Instant>>,
    last_bypass: Mutex<Option<Instant>>,
}

impl NavBudget {
    pub fn new(max_per_hour: u32, bypass_cooldown: Duration) -> Self {
        Self {
            max_per_hour,
            bypass_cooldown,
            navs: Mutex::new(VecDeque::new()),
            last_bypass: Mutex::new(None),
        }
    }

    /// Try to spend one navigation. Exhausted budgets still grant one
    /// bypass per cooldown.
    pub fn try_spend(&self) -> bool {
        let now = Instant::now();
        let mut navs = self.navs.lock();
        while let Some(front) = navs.front() {
            if now.duration_since(*front) >= Duration::from_secs(3600) {
                navs.pop_front();
            } else {
                break;
            }
        }

        if (navs.len() as u32) < self.max_per_hour {
            navs.push_back(now);
            return true;
        }

        let mut last_bypass = self.last_bypass.lock();
        let allowed = match *last_bypass {
            Some(at) => now.duration_since(at) >= self.bypass_cooldown,
            None => true,
        };
        if allowed {
            *last_bypass = Some(now);
            navs.push_back(now);
            true
        } else {
            false
        }
    }
}

pub struct ScraperConfig {
    pub frozen_ms: i64,
    pub watchdog_interval: Duration,
    pub max_nav_per_hour: u32,
    pub bypass_cooldown: Duration,
}

pub struct StreamBSupervisor {
    source: Arc<dyn TitleSource>,
    aggregator: Arc<PriceAggregator>,
    errors: Arc<ErrorService>,
    budget: NavBudget,
    config: ScraperConfig,
}

impl StreamBSupervisor {
    pub fn new(
        source: Arc<dyn TitleSource>,
        aggregator: Arc<PriceAggregator>,
        errors: Arc<ErrorService>,
        config: ScraperConfig,
    ) -> Self {
        let budget = NavBudget::new(config.max_nav_per_hour, config.bypass_cooldown);
        Self {
            source,
            aggregator,
            errors,
            budget,
            config,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("🖥️ commercial-dollar scraper supervisor started");
        let mut ticker = tokio::time::interval(self.config.watchdog_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return,
            }

            if !self.budget.try_spend() {
                debug!("scraper navigation budget exhausted, skipping tick");
                continue;
            }

            match self.refresh_once().await {
                Ok(price) => {
                    self.aggregator.record_sample(
                        FeedSource::StreamB,
                        SYMBOL_USD_BRL,
                        price,
                        None,
                        None,
                    );
                    self.errors.record_success(SOURCE);
                }
                Err(e) => {
                    warn!(error = %e, "scraper refresh failed");
                    self.errors.record_failure(SOURCE, "refresh failed");
                }
            }

            // Frozen page: the title keeps loading but the value stopped
            // moving. Soft refresh happened above; escalate to a full
            // reconnect when the sample age stays past the threshold.
            if let Some(age) = self.aggregator.newest_age_ms(FeedSource::StreamB) {
                if age > self.config.frozen_ms {
                    warn!(age_ms = age, "scraper frozen, forcing reconnect");
                    if let Err(e) = self.source.reconnect().await {
                        warn!(error = %e, "scraper reconnect failed");
                        self.errors.record_failure(SOURCE, "reconnect failed");
                    }
                }
            }
        }
    }

    async fn refresh_once(&self) -> anyhow::Result<f64> {
        let title = self.source.fetch_title().await?;
        parse_title_price(&title)
            .ok_or_else(|| anyhow::anyhow!("no price in page title: {title:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prices_from_titles() {
        assert_eq!(parse_title_price("USDBRL 5.4321 ▲ +0.2%"), Some(5.4321));
        assert_eq!(parse_title_price("Dólar Comercial R$ 5,43"), Some(5.43));
        assert_eq!(parse_title_price("no numbers here"), None);
    }

    #[test]
    fn nav_budget_exhausts_then_allows_one_bypass() {
        let budget = NavBudget::new(2, Duration::from_secs(300));
        assert!(budget.try_spend());
        assert!(budget.try_spend());
        // Budget exhausted: one bypass allowed.
        assert!(budget.try_spend());
        // Second bypass inside the cooldown is denied.
        assert!(!budget.try_spend());
    }

    #[test]
    fn nav_budget_bypass_cooldown_elapses() {
        let budget = NavBudget::new(1, Duration::from_millis(0));
        assert!(budget.try_spend());
        assert!(budget.try_spend());
        std::thread::sleep(Duration::from_millis(5));
        assert!(budget.try_spend());
    }
}

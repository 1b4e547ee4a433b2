//! AI classifier boundary.
//!
//! Optional fallback for trigger discovery, never on the hot path for
//! already-classified messages. Strict guardrails: per-group and global
//! rate windows, a circuit breaker on upstream failures, a content filter
//! that refuses anything carrying personal or payment identifiers, and a
//! short-lived LRU result cache. The classifier never writes to deals.

use crate::storage::Store;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const PER_GROUP_LIMIT: usize = 10; // per minute
const GLOBAL_LIMIT: usize = 100; // per hour
const BREAKER_THRESHOLD: u32 = 3;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(300);
const CACHE_TTL: Duration = Duration::from_secs(300);
const CACHE_CAP: usize = 512;
const PREFIX_LEN: usize = 48;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Whether the message looks OTC-relevant.
    pub relevant: bool,
    pub label: String,
    pub confidence: f64,
}

/// Upstream model boundary.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn classify(&self, text: &str) -> anyhow::Result<ClassificationResult>;
    fn model_name(&self) -> &str;
}

/// Why a classification did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Disabled,
    RateLimited,
    BreakerOpen,
    SensitiveContent,
    UpstreamError,
}

fn sensitive_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // CPF / CNPJ, formatted or bare.
            r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b",
            r"\b\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}\b",
            r"\b\d{11}\b",
            r"\b\d{14}\b",
            // Bank account-looking: agency/account pairs.
            r"\b\d{4,5}-?\d?\s*/\s*\d{5,12}-?\d?\b",
            r"(?i)\bag[êe]ncia\b.{0,20}\bconta\b",
            // PIX keys: e-mail, phone, random key.
            r"(?i)\bpix\b",
            r"\b[\w.+-]+@[\w-]+\.[\w.]+\b",
            r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
            // Wallets: Tron, Ethereum, Bitcoin.
            r"\bT[1-9A-HJ-NP-Za-km-z]{33}\b",
            r"\b0x[0-9a-fA-F]{40}\b",
            r"\b[13][1-9A-HJ-NP-Za-km-z]{25,34}\b",
            r"\bbc1[02-9ac-hj-np-z]{11,71}\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern compiles"))
        .collect()
    })
}

pub fn contains_sensitive_content(text: &str) -> bool {
    sensitive_patterns().iter().any(|re| re.is_match(text))
}

struct SlidingWindow {
    window: Duration,
    limit: usize,
    hits: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            hits: VecDeque::new(),
        }
    }

    fn try_hit(&mut self) -> bool {
        let now = Instant::now();
        while let Some(front) = self.hits.front() {
            if now.duration_since(*front) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() >= self.limit {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}

struct CacheEntry {
    result: ClassificationResult,
    cached_at: Instant,
}

struct Breaker {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct AiClassifier {
    backend: Option<Arc<dyn AiBackend>>,
    store: Store,
    per_group: Mutex<HashMap<String, SlidingWindow>>,
    global: Mutex<SlidingWindow>,
    breaker: Mutex<Breaker>,
    // LRU by insertion order; re-inserted on hit.
    cache: Mutex<VecDeque<(String, CacheEntry)>>,
}

impl AiClassifier {
    pub fn new(backend: Option<Arc<dyn AiBackend>>, store: Store) -> Arc<Self> {
        Arc::new(Self {
            backend,
            store,
            per_group: Mutex::new(HashMap::new()),
            global: Mutex::new(SlidingWindow::new(Duration::from_secs(3600), GLOBAL_LIMIT)),
            breaker: Mutex::new(Breaker {
                consecutive_failures: 0,
                opened_at: None,
            }),
            cache: Mutex::new(VecDeque::new()),
        })
    }

    pub fn enabled(&self) -> bool {
        self.backend.is_some()
    }

    fn cache_key(group_jid: &str, text: &str) -> String {
        let normalized: String = text
            .trim()
            .to_lowercase()
            .chars()
            .take(PREFIX_LEN)
            .collect();
        format!("{group_jid}\u{1}{normalized}")
    }

    fn cache_get(&self, key: &str) -> Option<ClassificationResult> {
        let mut cache = self.cache.lock();
        let pos = cache.iter().position(|(k, _)| k == key)?;
        if cache[pos].1.cached_at.elapsed() > CACHE_TTL {
            cache.remove(pos);
            return None;
        }
        // Refresh LRU position.
        let entry = cache.remove(pos).unwrap();
        let result = entry.1.result.clone();
        cache.push_back(entry);
        Some(result)
    }

    fn cache_put(&self, key: String, result: ClassificationResult) {
        let mut cache = self.cache.lock();
        cache.retain(|(k, _)| k != &key);
        if cache.len() >= CACHE_CAP {
            cache.pop_front();
        }
        cache.push_back((
            key,
            CacheEntry {
                result,
                cached_at: Instant::now(),
            },
        ));
    }

    fn guardrails(&self, group_jid: &str, text: &str) -> Result<(), Refusal> {
        if self.backend.is_none() {
            return Err(Refusal::Disabled);
        }
        if contains_sensitive_content(text) {
            return Err(Refusal::SensitiveContent);
        }

        {
            let mut breaker = self.breaker.lock();
            if let Some(opened) = breaker.opened_at {
                if opened.elapsed() < BREAKER_COOLDOWN {
                    return Err(Refusal::BreakerOpen);
                }
                // Half-open: allow one attempt through.
                breaker.opened_at = None;
            }
        }

        if !self.global.lock().try_hit() {
            return Err(Refusal::RateLimited);
        }
        let mut groups = self.per_group.lock();
        let window = groups
            .entry(group_jid.to_string())
            .or_insert_with(|| SlidingWindow::new(Duration::from_secs(60), PER_GROUP_LIMIT));
        if !window.try_hit() {
            return Err(Refusal::RateLimited);
        }
        Ok(())
    }

    /// Classify a message under all guardrails; `Err` carries the refusal.
    pub async fn classify(
        &self,
        group_jid: &str,
        text: &str,
    ) -> Result<ClassificationResult, Refusal> {
        let key = Self::cache_key(group_jid, text);
        if let Some(cached) = self.cache_get(&key) {
            return Ok(cached);
        }

        self.guardrails(group_jid, text)?;
        let backend = self.backend.as_ref().expect("checked by guardrails").clone();

        let started = Instant::now();
        let outcome = backend.classify(text).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(result) => {
                {
                    let mut breaker = self.breaker.lock();
                    breaker.consecutive_failures = 0;
                    breaker.opened_at = None;
                }
                let _ = self.store.record_ai_usage(
                    "classifier",
                    backend.model_name(),
                    0,
                    0,
                    0.0,
                    Some(group_jid),
                    Some(duration_ms),
                    true,
                    None,
                    Utc::now(),
                );
                self.cache_put(key, result.clone());
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "classifier upstream failed");
                {
                    let mut breaker = self.breaker.lock();
                    breaker.consecutive_failures += 1;
                    if breaker.consecutive_failures >= BREAKER_THRESHOLD {
                        debug!("classifier circuit breaker opened");
                        breaker.opened_at = Some(Instant::now());
                    }
                }
                let _ = self.store.record_ai_usage(
                    "classifier",
                    backend.model_name(),
                    0,
                    0,
                    0.0,
                    Some(group_jid),
                    Some(duration_ms),
                    false,
                    Some(&e.to_string()),
                    Utc::now(),
                );
                Err(Refusal::UpstreamError)
            }
        }
    }
}

/// HTTP backend for the configured AI endpoint.
pub struct HttpAiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpAiBackend {
    pub fn new(endpoint: String, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model: "otc-classifier-v1".to_string(),
        })
    }
}

#[async_trait]
impl AiBackend for HttpAiBackend {
    async fn classify(&self, text: &str) -> anyhow::Result<ClassificationResult> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "model": self.model, "text": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let result: ClassificationResult = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubBackend {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl AiBackend for StubBackend {
        async fn classify(&self, _text: &str) -> anyhow::Result<ClassificationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("upstream 500");
            }
            Ok(ClassificationResult {
                relevant: true,
                label: "quote_request".into(),
                confidence: 0.9,
            })
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn classifier(fail: bool) -> (Arc<AiClassifier>, Arc<StubBackend>) {
        let backend = Arc::new(StubBackend {
            calls: AtomicU32::new(0),
            fail,
        });
        let store = Store::open_in_memory().unwrap();
        (
            AiClassifier::new(Some(backend.clone()), store),
            backend,
        )
    }

    #[test]
    fn content_filter_catches_identifiers() {
        assert!(contains_sensitive_content("meu cpf é 123.456.789-01"));
        assert!(contains_sensitive_content("chave pix maria@example.com"));
        assert!(contains_sensitive_content(
            "manda pra 0x52908400098527886E0F7030069857D2E4169EE7"
        ));
        assert!(contains_sensitive_content(
            "TN3W4H6rK2ce4vX9YnFQHwKENnHjoxb3m9 tron"
        ));
        assert!(!contains_sensitive_content("qual o preço de hoje?"));
    }

    #[tokio::test]
    async fn sensitive_messages_never_reach_backend() {
        let (classifier, backend) = classifier(false);
        let refusal = classifier
            .classify("g1", "pix 123.456.789-01")
            .await
            .unwrap_err();
        assert_eq!(refusal, Refusal::SensitiveContent);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn results_are_cached_by_prefix() {
        let (classifier, backend) = classifier(false);
        classifier.classify("g1", "compro usdt").await.unwrap();
        classifier.classify("g1", "compro usdt").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        // Different group misses the cache.
        classifier.classify("g2", "compro usdt").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn breaker_opens_after_three_failures() {
        let (classifier, backend) = classifier(true);
        for i in 0..3 {
            let refusal = classifier
                .classify("g1", &format!("mensagem {i}"))
                .await
                .unwrap_err();
            assert_eq!(refusal, Refusal::UpstreamError);
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

        // Breaker now open: no upstream call.
        let refusal = classifier.classify("g1", "outra").await.unwrap_err();
        assert_eq!(refusal, Refusal::BreakerOpen);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn per_group_rate_limit_applies() {
        let (classifier, _backend) = classifier(false);
        for i in 0..PER_GROUP_LIMIT {
            classifier
                .classify("g1", &format!("mensagem {i}"))
                .await
                .unwrap();
        }
        let refusal = classifier.classify("g1", "estouro").await.unwrap_err();
        assert_eq!(refusal, Refusal::RateLimited);
        // Other groups unaffected.
        classifier.classify("g2", "ok").await.unwrap();
    }

    #[tokio::test]
    async fn disabled_without_backend() {
        let store = Store::open_in_memory().unwrap();
        let classifier = AiClassifier::new(None, store);
        assert!(!classifier.enabled());
        let refusal = classifier.classify("g1", "oi").await.unwrap_err();
        assert_eq!(refusal, Refusal::Disabled);
    }
}

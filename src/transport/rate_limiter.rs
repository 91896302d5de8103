//! Per-endpoint-class token buckets with adaptive backoff on server-busy
//! responses, ported from
//! `examples/original_source/tradingbot-backend/utils/bitfinex_rate_limiter.py`'s
//! `handle_server_busy`/`reset_server_busy_count`, generalized from one
//! global bucket to a bucket per `EndpointClass`.

use crate::metrics::MetricsStore;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    PublicMarket,
    PrivateAccount,
    PrivateTrading,
    PrivateMargin,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::PublicMarket => "PUBLIC_MARKET",
            EndpointClass::PrivateAccount => "PRIVATE_ACCOUNT",
            EndpointClass::PrivateTrading => "PRIVATE_TRADING",
            EndpointClass::PrivateMargin => "PRIVATE_MARGIN",
        }
    }

    fn default_capacity(&self) -> f64 {
        match self {
            EndpointClass::PublicMarket => 90.0,
            EndpointClass::PrivateAccount => 30.0,
            EndpointClass::PrivateTrading => 60.0,
            EndpointClass::PrivateMargin => 15.0,
        }
    }

    fn default_refill_per_sec(&self) -> f64 {
        self.default_capacity() / 60.0
    }
}

fn parse_class(s: &str) -> Option<EndpointClass> {
    match s {
        "PUBLIC_MARKET" => Some(EndpointClass::PublicMarket),
        "PRIVATE_ACCOUNT" => Some(EndpointClass::PrivateAccount),
        "PRIVATE_TRADING" => Some(EndpointClass::PrivateTrading),
        "PRIVATE_MARGIN" => Some(EndpointClass::PrivateMargin),
        _ => None,
    }
}

/// Ordered regex→class table; first match wins. Unmatched endpoints fall
/// back to `PrivateAccount`, the most conservative private bucket — an
/// unrecognized endpoint is more likely private than public.
pub struct EndpointClassifier {
    rules: Vec<(Regex, EndpointClass)>,
}

impl EndpointClassifier {
    pub fn new(patterns: &[(String, String)]) -> Self {
        let rules = patterns
            .iter()
            .filter_map(|(pattern, class)| {
                let re = Regex::new(pattern).ok()?;
                let class = parse_class(class)?;
                Some((re, class))
            })
            .collect();
        Self { rules }
    }

    pub fn classify(&self, endpoint: &str) -> EndpointClass {
        for (re, class) in &self.rules {
            if re.is_match(endpoint) {
                return *class;
            }
        }
        EndpointClass::PrivateAccount
    }
}

struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    recent_failures: Vec<Instant>,
    backoff_multiplier: f64,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: Instant::now(),
            recent_failures: Vec::new(),
            backoff_multiplier: 1.0,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Seconds until at least one token is available, after refilling.
    fn wait_seconds(&mut self) -> f64 {
        self.refill();
        if self.tokens >= 1.0 {
            0.0
        } else {
            ((1.0 - self.tokens) / self.refill_per_sec) * self.backoff_multiplier
        }
    }

    fn take(&mut self) {
        self.refill();
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    fn note_failure(&mut self) {
        let now = Instant::now();
        self.recent_failures.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
        self.recent_failures.push(now);
        if self.recent_failures.len() >= 2 {
            self.backoff_multiplier = (self.backoff_multiplier * 1.5).min(4.0);
        } else {
            self.backoff_multiplier = (self.backoff_multiplier * 0.8).max(1.0);
        }
    }

    fn note_success(&mut self) {
        self.backoff_multiplier = (self.backoff_multiplier * 0.8).max(1.0);
    }

    fn utilization_pct(&mut self) -> f64 {
        self.refill();
        ((self.capacity - self.tokens) / self.capacity) * 100.0
    }
}

pub struct RateLimiter {
    classifier: EndpointClassifier,
    buckets: Mutex<HashMap<EndpointClass, TokenBucket>>,
    metrics: Arc<MetricsStore>,
}

impl RateLimiter {
    pub fn new(patterns: &[(String, String)], metrics: Arc<MetricsStore>) -> Self {
        let classifier = EndpointClassifier::new(patterns);
        let mut buckets = HashMap::new();
        for class in [
            EndpointClass::PublicMarket,
            EndpointClass::PrivateAccount,
            EndpointClass::PrivateTrading,
            EndpointClass::PrivateMargin,
        ] {
            buckets.insert(
                class,
                TokenBucket::new(class.default_capacity(), class.default_refill_per_sec()),
            );
        }
        Self {
            classifier,
            buckets: Mutex::new(buckets),
            metrics,
        }
    }

    pub fn classify(&self, endpoint: &str) -> EndpointClass {
        self.classifier.classify(endpoint)
    }

    /// Cooperatively waits (yielding the task) until a token is available
    /// for this endpoint's class, then debits one.
    pub async fn acquire(&self, endpoint: &str) {
        let class = self.classify(endpoint);
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets.get_mut(&class).expect("all classes pre-populated");
                let wait = bucket.wait_seconds();
                if wait <= 0.0 {
                    bucket.take();
                }
                self.metrics
                    .rate_limiter_tokens
                    .with_label_values(&[class.as_str()])
                    .set(bucket.tokens);
                self.metrics
                    .rate_limiter_utilization_pct
                    .with_label_values(&[class.as_str()])
                    .set(bucket.utilization_pct());
                wait
            };
            if wait <= 0.0 {
                return;
            }
            sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    pub async fn note_success(&self, endpoint: &str) {
        let class = self.classify(endpoint);
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get_mut(&class) {
            bucket.note_success();
        }
    }

    pub async fn note_failure(&self, endpoint: &str, status: u16, _retry_after: Option<&str>) {
        let class = self.classify(endpoint);
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get_mut(&class) {
            bucket.note_failure();
        }
        drop(buckets);
        if status == 429 || (500..600).contains(&status) {
            warn!("RateLimiter: endpoint {} class {:?} hit status {}", endpoint, class, status);
        }
        self.metrics
            .rate_limiter_failures_total
            .with_label_values(&[class.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(
            &[
                ("^(ticker|candles)".to_string(), "PUBLIC_MARKET".to_string()),
                ("^auth/w/".to_string(), "PRIVATE_TRADING".to_string()),
            ],
            Arc::new(MetricsStore::new()),
        )
    }

    #[test]
    fn classification_first_match_wins() {
        let rl = limiter();
        assert_eq!(rl.classify("ticker/tBTCUSD"), EndpointClass::PublicMarket);
        assert_eq!(rl.classify("auth/w/order/submit"), EndpointClass::PrivateTrading);
        assert_eq!(rl.classify("unmatched/endpoint"), EndpointClass::PrivateAccount);
    }

    #[tokio::test]
    async fn token_bucket_stays_within_capacity() {
        let rl = limiter();
        for _ in 0..5 {
            rl.acquire("ticker/tBTCUSD").await;
        }
        let buckets = rl.buckets.lock().await;
        let bucket = &buckets[&EndpointClass::PublicMarket];
        assert!(bucket.tokens >= 0.0);
        assert!(bucket.tokens <= bucket.capacity);
    }

    #[tokio::test]
    async fn exhausting_one_class_does_not_block_another() {
        let rl = limiter();
        // Drain private trading bucket far below capacity.
        for _ in 0..60 {
            rl.acquire("auth/w/order/submit").await;
        }
        // Public market bucket should still have plenty of tokens.
        let buckets = rl.buckets.lock().await;
        let public = &buckets[&EndpointClass::PublicMarket];
        assert_eq!(public.tokens, public.capacity);
    }

    #[tokio::test]
    async fn repeated_failures_increase_backoff_multiplier() {
        let rl = limiter();
        rl.note_failure("auth/w/order/submit", 429, None).await;
        rl.note_failure("auth/w/order/submit", 429, None).await;
        let buckets = rl.buckets.lock().await;
        let bucket = &buckets[&EndpointClass::PrivateTrading];
        assert!(bucket.backoff_multiplier > 1.0);
        assert!(bucket.backoff_multiplier <= 4.0);
    }

    #[tokio::test]
    async fn success_decays_backoff_multiplier() {
        let rl = limiter();
        rl.note_failure("ticker/tBTCUSD", 429, None).await;
        rl.note_failure("ticker/tBTCUSD", 429, None).await;
        let before = {
            let buckets = rl.buckets.lock().await;
            buckets[&EndpointClass::PublicMarket].backoff_multiplier
        };
        rl.note_success("ticker/tBTCUSD").await;
        let after = {
            let buckets = rl.buckets.lock().await;
            buckets[&EndpointClass::PublicMarket].backoff_multiplier
        };
        assert!(after < before);
    }
}

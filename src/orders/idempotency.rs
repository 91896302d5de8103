//! TTL request-idempotency cache keyed by an order fingerprint, ported from
//! `services/idempotency_service.py`'s `IdempotencyService`
//! (`check_and_register`/`store_response`, in-flight placeholder pattern),
//! restyled on the teacher's in-memory `HashMap` + `Instant`-expiry idiom
//! used across `application/risk_management` (e.g. pending-order TTL
//! tracking).

use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderFingerprint {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub amount: String,
    pub price: String,
    pub client_id: Option<i64>,
    pub minute_bucket: i64,
}

impl OrderFingerprint {
    pub fn new(
        symbol: &str,
        side: &str,
        order_type: &str,
        amount: Decimal,
        price: Option<Decimal>,
        client_id: Option<i64>,
        now_unix_secs: i64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: side.to_string(),
            order_type: order_type.to_string(),
            amount: amount.to_string(),
            price: price.map(|p| p.to_string()).unwrap_or_default(),
            client_id,
            minute_bucket: now_unix_secs / 60,
        }
    }

    fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.symbol,
            self.side,
            self.order_type,
            self.amount,
            self.price,
            self.client_id.map(|c| c.to_string()).unwrap_or_default(),
            self.minute_bucket
        )
    }
}

#[derive(Debug, Clone)]
pub enum CacheOutcome {
    Hit(Value),
    Miss,
}

struct Entry {
    registered_at: Instant,
    response: Option<Value>,
}

pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, Entry>>,
    default_ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Returns the cached response if a non-expired entry exists; otherwise
    /// registers an in-flight placeholder (response `None`) and reports a
    /// miss so the caller proceeds with submission.
    pub async fn check_and_register(&self, fp: &OrderFingerprint, ttl: Option<Duration>) -> CacheOutcome {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let key = fp.key();
        let mut guard = self.entries.lock().await;

        if let Some(entry) = guard.get(&key) {
            if entry.registered_at.elapsed() < ttl {
                if let Some(resp) = &entry.response {
                    return CacheOutcome::Hit(resp.clone());
                }
                // In-flight placeholder still live: treat as a hit with no
                // response yet, same as the Python original's None resp.
                return CacheOutcome::Hit(Value::Null);
            }
        }

        guard.insert(
            key,
            Entry {
                registered_at: Instant::now(),
                response: None,
            },
        );
        CacheOutcome::Miss
    }

    pub async fn store_response(&self, fp: &OrderFingerprint, response: Value) {
        let key = fp.key();
        let mut guard = self.entries.lock().await;
        guard.insert(
            key,
            Entry {
                registered_at: Instant::now(),
                response: Some(response),
            },
        );
    }
}

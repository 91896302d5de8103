//! Strictly increasing, persisted per-API-key nonce issuance.
//!
//! Ported from `examples/original_source/tradingbot-backend/utils/nonce_manager.py`:
//! the new nonce is `max(now_micros, last + 1)`, serialized under a mutex the
//! same way the teacher's file-owning components (`Database`, trading-rules
//! repositories) serialize writes to their exclusively-owned file.

use crate::config::ensure_parent_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct NonceStoreFile {
    #[serde(flatten)]
    last_by_key: HashMap<String, i64>,
}

pub struct NonceSource {
    path: PathBuf,
    state: Mutex<HashMap<String, i64>>,
}

fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_micros() as i64
}

impl NonceSource {
    pub fn new(path: PathBuf) -> Self {
        let loaded = Self::load_from_disk(&path).unwrap_or_else(|| {
            warn!("NonceSource: store unreadable or absent at {:?}; starting fresh", path);
            HashMap::new()
        });
        Self {
            path,
            state: Mutex::new(loaded),
        }
    }

    fn load_from_disk(path: &PathBuf) -> Option<HashMap<String, i64>> {
        let bytes = std::fs::read(path).ok()?;
        let parsed: NonceStoreFile = serde_json::from_slice(&bytes).ok()?;
        Some(parsed.last_by_key)
    }

    fn persist(&self, map: &HashMap<String, i64>) {
        if ensure_parent_dir(&self.path).is_err() {
            warn!("NonceSource: failed to create parent dir for {:?}", self.path);
            return;
        }
        let file = NonceStoreFile {
            last_by_key: map.clone(),
        };
        match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    warn!("NonceSource: failed to persist store: {}", e);
                }
            }
            Err(e) => warn!("NonceSource: failed to serialize store: {}", e),
        }
    }

    /// Issue the next nonce for `key`. Monotonic per key, real-time ordered:
    /// for any two issued nonces n1 < n2 (by wall-clock issuance order),
    /// n1 < n2 as integers.
    pub async fn next(&self, key: &str) -> i64 {
        let mut guard = self.state.lock().await;
        let now = now_micros();
        let last = guard.get(key).copied().unwrap_or(0);
        let next = now.max(last + 1);
        guard.insert(key.to_string(), next);
        self.persist(&guard);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile_like::temp_path;

    mod tempfile_like {
        use std::path::PathBuf;

        pub fn temp_path(name: &str) -> PathBuf {
            let mut p = std::env::temp_dir();
            p.push(format!(
                "bfx_core_nonce_test_{}_{}",
                name,
                uuid::Uuid::new_v4()
            ));
            p
        }
    }

    #[tokio::test]
    async fn issues_strictly_increasing_nonces_per_key() {
        let path = temp_path("monotonic");
        let src = NonceSource::new(path.clone());

        let mut last = 0;
        for _ in 0..50 {
            let n = src.next("key-a").await;
            assert!(n > last, "nonce must strictly increase");
            last = n;
        }
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let path = temp_path("independent");
        let src = NonceSource::new(path.clone());

        let a1 = src.next("a").await;
        let b1 = src.next("b").await;
        let a2 = src.next("a").await;
        assert!(a2 > a1);
        assert!(b1 > 0);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn persists_across_instances() {
        let path = temp_path("persist");
        {
            let src = NonceSource::new(path.clone());
            src.next("k").await;
        }
        let reopened = NonceSource::new(path.clone());
        let n = reopened.next("k").await;
        assert!(n > 0);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn corrupt_store_reinitializes_from_now_without_panicking() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"not json").unwrap();
        let src = NonceSource::new(path.clone());
        let n = src.next("k").await;
        assert!(n > 0);
        let _ = std::fs::remove_file(path);
    }
}

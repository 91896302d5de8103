//! Daily trade counter with per-symbol breakdown and cooldown tracking,
//! persisted to JSON and rolled over at local-midnight in the configured
//! timezone. Ported from
//! `examples/original_source/tradingbot-backend/services/trade_counter.py`
//! (`TradeCounterService`), confirmed against its unit tests
//! (`test_trade_counter_max_per_day_blocks`, `test_trade_counter_cooldown_blocks`,
//! `test_trade_counter_per_symbol`). Per-symbol limit enforcement itself lives
//! in [`super::policy_engine`], matching the original's split between
//! `TradeCounterService` (bookkeeping) and `TradeConstraintsService` (policy).

use crate::config::ensure_parent_dir;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CounterState {
    day: NaiveDate,
    count: u32,
    #[serde(default)]
    per_symbol: HashMap<String, u32>,
    #[serde(default)]
    last_trade_ts: Option<DateTime<Utc>>,
}

impl CounterState {
    fn fresh(day: NaiveDate) -> Self {
        Self {
            day,
            count: 0,
            per_symbol: HashMap::new(),
            last_trade_ts: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TradeCounterStats {
    pub count: u32,
    pub max_per_day: u32,
    pub cooldown_seconds: u64,
    pub cooldown_active: bool,
}

pub struct TradeCounter {
    path: PathBuf,
    tz: Tz,
    state: RwLock<CounterState>,
}

impl TradeCounter {
    pub fn new(path: PathBuf, tz: Tz) -> Self {
        let today = Utc::now().with_timezone(&tz).date_naive();
        let state = Self::load_from_disk(&path)
            .filter(|s| s.day == today)
            .unwrap_or_else(|| CounterState::fresh(today));
        Self {
            path,
            tz,
            state: RwLock::new(state),
        }
    }

    fn load_from_disk(path: &PathBuf) -> Option<CounterState> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn persist(&self, state: &CounterState) {
        if ensure_parent_dir(&self.path).is_err() {
            warn!("TradeCounter: failed to create parent dir for {:?}", self.path);
            return;
        }
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    warn!("TradeCounter: failed to persist state: {}", e);
                }
            }
            Err(e) => warn!("TradeCounter: failed to serialize state: {}", e),
        }
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.tz).date_naive()
    }

    async fn reset_if_new_day(&self, guard: &mut CounterState) {
        let today = self.today();
        if guard.day != today {
            *guard = CounterState::fresh(today);
            self.persist(guard);
        }
    }

    pub async fn can_execute(&self, max_trades_per_day: u32, cooldown_seconds: u64) -> bool {
        let mut guard = self.state.write().await;
        self.reset_if_new_day(&mut guard).await;

        if guard.count >= max_trades_per_day {
            return false;
        }
        if let Some(last) = guard.last_trade_ts {
            let elapsed = (Utc::now() - last).num_seconds();
            if elapsed < cooldown_seconds as i64 {
                return false;
            }
        }
        true
    }

    pub async fn record_trade(&self, symbol: Option<&str>) {
        let mut guard = self.state.write().await;
        self.reset_if_new_day(&mut guard).await;
        guard.count += 1;
        guard.last_trade_ts = Some(Utc::now());
        if let Some(symbol) = symbol {
            let key = symbol.to_uppercase();
            *guard.per_symbol.entry(key).or_insert(0) += 1;
        }
        self.persist(&guard);
    }

    pub async fn count_for_symbol(&self, symbol: &str) -> u32 {
        let mut guard = self.state.write().await;
        self.reset_if_new_day(&mut guard).await;
        guard.per_symbol.get(&symbol.to_uppercase()).copied().unwrap_or(0)
    }

    pub async fn stats(&self, max_trades_per_day: u32, cooldown_seconds: u64) -> TradeCounterStats {
        let mut guard = self.state.write().await;
        self.reset_if_new_day(&mut guard).await;
        let cooldown_active = guard
            .last_trade_ts
            .map(|last| (Utc::now() - last).num_seconds() < cooldown_seconds as i64)
            .unwrap_or(false);
        TradeCounterStats {
            count: guard.count,
            max_per_day: max_trades_per_day,
            cooldown_seconds,
            cooldown_active,
        }
    }
}

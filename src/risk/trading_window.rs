//! Time-of-day trading windows with timezone + pause flag, persisted to
//! JSON. Ported from
//! `examples/original_source/tradingbot-backend/services/trading_window.py`
//! (confirmed by its unit tests `test_trading_window_defaults_closed`,
//! `test_trading_window_open_after_setting_window`,
//! `test_trading_window_persist_reload`): weekday-keyed window lists,
//! `is_open`/`is_paused`/`set_paused`/`next_open`, persisted on every
//! mutation the way the crate's other file-owning components do (spec §5).

use crate::config::ensure_parent_dir;
use crate::errors::CoreError;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::warn;

/// Weekday keys in the order the Python original enumerates them.
pub const WEEKDAY_KEYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

fn weekday_key(now: &DateTime<Tz>) -> &'static str {
    WEEKDAY_KEYS[now.weekday().num_days_from_monday() as usize]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingRules {
    pub timezone: String,
    pub windows: HashMap<String, Vec<(String, String)>>,
    pub paused: bool,
    pub max_trades_per_day: u32,
    pub max_trades_per_symbol_per_day: u32,
    pub trade_cooldown_seconds: u64,
}

impl Default for TradingRules {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            windows: WEEKDAY_KEYS.iter().map(|k| (k.to_string(), Vec::new())).collect(),
            paused: false,
            max_trades_per_day: 50,
            max_trades_per_symbol_per_day: 10,
            trade_cooldown_seconds: 5,
        }
    }
}

struct State {
    rules: TradingRules,
    tz: Tz,
}

pub struct TradingWindow {
    path: PathBuf,
    state: RwLock<State>,
}

impl TradingWindow {
    pub fn new(path: PathBuf) -> Result<Self, CoreError> {
        let rules = Self::load_from_disk(&path).unwrap_or_default();
        let tz = Tz::from_str(&rules.timezone)
            .map_err(|_| CoreError::InvalidTimezone(rules.timezone.clone()))?;
        Ok(Self {
            path,
            state: RwLock::new(State { rules, tz }),
        })
    }

    fn load_from_disk(path: &PathBuf) -> Option<TradingRules> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn persist(&self, rules: &TradingRules) {
        if ensure_parent_dir(&self.path).is_err() {
            warn!("TradingWindow: failed to create parent dir for {:?}", self.path);
            return;
        }
        match serde_json::to_vec_pretty(rules) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    warn!("TradingWindow: failed to persist rules: {}", e);
                }
            }
            Err(e) => warn!("TradingWindow: failed to serialize rules: {}", e),
        }
    }

    pub async fn rules(&self) -> TradingRules {
        self.state.read().await.rules.clone()
    }

    pub async fn save_rules(&self, rules: TradingRules) -> Result<(), CoreError> {
        let tz = Tz::from_str(&rules.timezone)
            .map_err(|_| CoreError::InvalidTimezone(rules.timezone.clone()))?;
        let mut guard = self.state.write().await;
        guard.tz = tz;
        guard.rules = rules;
        self.persist(&guard.rules);
        Ok(())
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.rules.paused
    }

    pub async fn set_paused(&self, paused: bool) {
        let mut guard = self.state.write().await;
        guard.rules.paused = paused;
        self.persist(&guard.rules);
    }

    /// Looks up today's weekday key (in the configured timezone) and checks
    /// whether `now`'s time-of-day falls inside any configured window.
    pub async fn is_open(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.read().await;
        if state.rules.paused {
            return false;
        }
        let local = now.with_timezone(&state.tz);
        let key = weekday_key(&local);
        let Some(windows) = state.rules.windows.get(key) else {
            return false;
        };
        let t = local.time();
        windows.iter().any(|(start, end)| {
            match (parse_hhmm(start), parse_hhmm(end)) {
                (Some(s), Some(e)) => t >= s && t <= e,
                _ => false,
            }
        })
    }

    /// The next window start at or after `now`, scanning up to 7 days
    /// forward; `None` if no window is configured at all.
    pub async fn next_open(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let state = self.state.read().await;
        if state.rules.windows.values().all(|w| w.is_empty()) {
            return None;
        }
        let local_now = now.with_timezone(&state.tz);
        for day_offset in 0..8 {
            let candidate_day = local_now + ChronoDuration::days(day_offset);
            let key = WEEKDAY_KEYS[candidate_day.weekday().num_days_from_monday() as usize];
            let Some(windows) = state.rules.windows.get(key) else { continue };
            for (start, _end) in windows {
                let Some(start_time) = parse_hhmm(start) else { continue };
                let candidate = candidate_day
                    .date_naive()
                    .and_time(start_time)
                    .and_local_timezone(state.tz)
                    .single()?;
                if candidate >= local_now {
                    return Some(candidate.with_timezone(&Utc));
                }
            }
        }
        None
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("bfx_core_tw_test_{}_{}", name, uuid::Uuid::new_v4()));
        p
    }

    #[tokio::test]
    async fn defaults_to_closed() {
        let tw = TradingWindow::new(temp_path("closed")).unwrap();
        assert!(!tw.is_open(Utc::now()).await);
    }

    #[tokio::test]
    async fn open_after_setting_full_day_window() {
        let tw = TradingWindow::new(temp_path("open")).unwrap();
        let now = Utc::now();
        let key = WEEKDAY_KEYS[now.weekday().num_days_from_monday() as usize];
        let mut rules = TradingRules::default();
        rules.windows.insert(key.to_string(), vec![("00:00".to_string(), "23:59".to_string())]);
        tw.save_rules(rules).await.unwrap();
        assert!(tw.is_open(now).await);
    }

    #[tokio::test]
    async fn paused_overrides_open_window() {
        let tw = TradingWindow::new(temp_path("paused")).unwrap();
        let now = Utc::now();
        let key = WEEKDAY_KEYS[now.weekday().num_days_from_monday() as usize];
        let mut rules = TradingRules::default();
        rules.windows.insert(key.to_string(), vec![("00:00".to_string(), "23:59".to_string())]);
        rules.paused = true;
        tw.save_rules(rules).await.unwrap();
        assert!(!tw.is_open(now).await);
        tw.set_paused(false).await;
        assert!(tw.is_open(now).await);
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let path = temp_path("persist");
        {
            let tw = TradingWindow::new(path.clone()).unwrap();
            let mut rules = TradingRules::default();
            rules.max_trades_per_day = 7;
            tw.save_rules(rules).await.unwrap();
        }
        let reopened = TradingWindow::new(path.clone()).unwrap();
        assert_eq!(reopened.rules().await.max_trades_per_day, 7);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn invalid_timezone_is_rejected() {
        let tw = TradingWindow::new(temp_path("tzcheck")).unwrap();
        let mut rules = TradingRules::default();
        rules.timezone = "Not/AZone".to_string();
        assert!(matches!(tw.save_rules(rules).await, Err(CoreError::InvalidTimezone(_))));
    }

    #[tokio::test]
    async fn outside_window_time_of_day_is_closed() {
        let tw = TradingWindow::new(temp_path("tod")).unwrap();
        let fixed = Utc.with_ymd_and_hms(2026, 1, 5, 20, 0, 0).unwrap(); // Monday 20:00 UTC
        let mut rules = TradingRules::default();
        rules.windows.insert("mon".to_string(), vec![("08:00".to_string(), "17:00".to_string())]);
        tw.save_rules(rules).await.unwrap();
        assert!(!tw.is_open(fixed).await);
        let within = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
        assert!(tw.is_open(within).await);
    }
}

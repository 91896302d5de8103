//! Hot-reloadable runtime knobs — a copy-on-write snapshot readers see
//! consistently per call, matching spec §9's "copy-on-write dictionary"
//! design note.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketDataMode {
    Auto,
    RestOnly,
    WsOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfigInner {
    pub marketdata_mode: MarketDataMode,
    pub ws_ticker_stale_secs: u64,
    pub ws_ticker_warmup_ms: u64,
    pub ticker_cache_ttl_secs: u64,

    pub ws_use_pool: bool,
    pub ws_max_subs_per_socket: usize,
    pub ws_public_sockets_max: usize,

    pub bitfinex_rate_limit_enabled: bool,
    pub rate_limit_patterns: Vec<(String, String)>,

    pub cb_enabled: bool,
    pub cb_error_window_seconds: u64,
    pub cb_max_errors_per_window: u32,

    pub max_trades_per_day: u32,
    pub max_trades_per_symbol_per_day: u32,
    pub trade_cooldown_seconds: u64,
    pub trading_paused: bool,

    pub dry_run_enabled: bool,
    pub autotrade_enabled: bool,
    pub bracket_partial_adjust: bool,

    pub candle_cache_retention_days: u32,
    pub candle_cache_max_rows_per_pair: u32,

    pub private_rest_concurrency: usize,
    pub dead_man_switch_timeout_secs: u64,
}

impl Default for RuntimeConfigInner {
    fn default() -> Self {
        Self {
            marketdata_mode: MarketDataMode::Auto,
            ws_ticker_stale_secs: 5,
            ws_ticker_warmup_ms: 500,
            ticker_cache_ttl_secs: 2,

            ws_use_pool: true,
            ws_max_subs_per_socket: 30,
            ws_public_sockets_max: 10,

            bitfinex_rate_limit_enabled: true,
            rate_limit_patterns: vec![
                ("^(ticker|trades|candles|book)".to_string(), "PUBLIC_MARKET".to_string()),
                ("^auth/w/order".to_string(), "PRIVATE_TRADING".to_string()),
                ("^auth/w/position".to_string(), "PRIVATE_MARGIN".to_string()),
                ("^auth/r/".to_string(), "PRIVATE_ACCOUNT".to_string()),
                ("^auth/w/".to_string(), "PRIVATE_ACCOUNT".to_string()),
            ],

            cb_enabled: true,
            cb_error_window_seconds: 60,
            cb_max_errors_per_window: 5,

            max_trades_per_day: 50,
            max_trades_per_symbol_per_day: 10,
            trade_cooldown_seconds: 5,
            trading_paused: false,

            dry_run_enabled: false,
            autotrade_enabled: false,
            bracket_partial_adjust: true,

            candle_cache_retention_days: 30,
            candle_cache_max_rows_per_pair: 5000,

            private_rest_concurrency: 2,
            dead_man_switch_timeout_secs: 60,
        }
    }
}

/// Shared, hot-swappable configuration. Cloning `RuntimeConfig` clones the
/// `Arc<ArcSwap<..>>` handle, not the data — all clones observe the same
/// live snapshot.
#[derive(Clone)]
pub struct RuntimeConfig {
    inner: Arc<ArcSwap<RuntimeConfigInner>>,
}

impl RuntimeConfig {
    pub fn new(inner: RuntimeConfigInner) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(inner)),
        }
    }

    /// A consistent point-in-time snapshot; readers never see a torn update.
    pub fn snapshot(&self) -> Arc<RuntimeConfigInner> {
        self.inner.load_full()
    }

    pub fn update(&self, f: impl FnOnce(&mut RuntimeConfigInner)) {
        let mut next = (**self.inner.load()).clone();
        f(&mut next);
        self.inner.store(Arc::new(next));
    }

    pub fn marketdata_mode(&self) -> MarketDataMode {
        self.snapshot().marketdata_mode
    }

    pub fn trading_paused(&self) -> bool {
        self.snapshot().trading_paused
    }

    pub fn set_trading_paused(&self, paused: bool) {
        self.update(|c| c.trading_paused = paused);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(RuntimeConfigInner::default())
    }
}

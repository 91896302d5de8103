//! O(1)-per-candle EMA/RSI/ATR state, ported formula-for-formula from
//! `examples/original_source/tradingbot-backend/services/incremental_indicators.py`
//! (EMA/RSI/ATR states), keyed per `(symbol, timeframe)` in a map the way
//! the teacher's `domain::risk::volatility_manager` keeps running state.

use crate::market_data::candle_store::Candle;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Default)]
struct EmaState {
    period: u32,
    value: Option<f64>,
}

impl EmaState {
    fn update(&mut self, price: f64) -> f64 {
        let alpha = 2.0 / (self.period as f64 + 1.0);
        let next = match self.value {
            None => price,
            Some(prev) => alpha * price + (1.0 - alpha) * prev,
        };
        self.value = Some(next);
        next
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RsiState {
    period: u32,
    avg_gain: Option<f64>,
    avg_loss: Option<f64>,
    prev_close: Option<f64>,
}

impl RsiState {
    fn update(&mut self, close: f64) -> f64 {
        let prev = match self.prev_close {
            None => {
                self.prev_close = Some(close);
                return 50.0;
            }
            Some(p) => p,
        };
        let delta = close - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);

        let (avg_gain, avg_loss) = match (self.avg_gain, self.avg_loss) {
            (None, _) | (_, None) => (gain, loss),
            (Some(ag), Some(al)) => {
                let p = self.period as f64;
                ((ag * (p - 1.0) + gain) / p, (al * (p - 1.0) + loss) / p)
            }
        };
        self.avg_gain = Some(avg_gain);
        self.avg_loss = Some(avg_loss);
        self.prev_close = Some(close);

        if avg_loss == 0.0 {
            return 100.0;
        }
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct AtrState {
    period: u32,
    atr: Option<f64>,
    prev_close: Option<f64>,
}

impl AtrState {
    fn update(&mut self, high: f64, low: f64, close: f64) -> f64 {
        let p = self.period as f64;
        let tr = match self.prev_close {
            None => high - low,
            Some(prev) => (high - low).max((high - prev).abs()).max((low - prev).abs()),
        };
        let atr = match self.atr {
            None => tr,
            Some(prev_atr) => (prev_atr * (p - 1.0) + tr) / p,
        };
        self.atr = Some(atr);
        self.prev_close = Some(close);
        atr
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndicatorSnapshot {
    pub ema: f64,
    pub rsi: f64,
    pub atr: f64,
}

struct SymbolState {
    ema: EmaState,
    rsi: RsiState,
    atr: AtrState,
    last: Option<IndicatorSnapshot>,
}

/// Per-(symbol, timeframe) incremental indicator state, updated once per new
/// candle in O(1).
pub struct IncrementalIndicators {
    periods: (u32, u32, u32), // (ema, rsi, atr)
    states: RwLock<HashMap<(String, String), SymbolState>>,
}

impl IncrementalIndicators {
    pub fn new(ema_period: u32, rsi_period: u32, atr_period: u32) -> Self {
        Self {
            periods: (ema_period, rsi_period, atr_period),
            states: RwLock::new(HashMap::new()),
        }
    }

    pub async fn update_candle(&self, symbol: &str, timeframe: &str, candle: &Candle) -> IndicatorSnapshot {
        let key = (symbol.to_string(), timeframe.to_string());
        let mut guard = self.states.write().await;
        let (ema_p, rsi_p, atr_p) = self.periods;
        let state = guard.entry(key).or_insert_with(|| SymbolState {
            ema: EmaState { period: ema_p, value: None },
            rsi: RsiState { period: rsi_p, ..Default::default() },
            atr: AtrState { period: atr_p, ..Default::default() },
            last: None,
        });

        let close = candle.close.to_f64().unwrap_or(0.0);
        let high = candle.high.to_f64().unwrap_or(0.0);
        let low = candle.low.to_f64().unwrap_or(0.0);

        let snapshot = IndicatorSnapshot {
            ema: state.ema.update(close),
            rsi: state.rsi.update(close),
            atr: state.atr.update(high, low, close),
        };
        state.last = Some(snapshot);
        snapshot
    }

    pub async fn snapshot(&self, symbol: &str, timeframe: &str) -> Option<IndicatorSnapshot> {
        let key = (symbol.to_string(), timeframe.to_string());
        let guard = self.states.read().await;
        guard.get(&key)?.last
    }
}

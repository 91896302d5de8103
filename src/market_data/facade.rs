//! WS-first, REST-fallback market data access (spec §4.10), ported from
//! `examples/original_source/tradingbot-backend/services/market_data_facade.py`'s
//! mode handling (`auto`/`rest_only`/`ws_only`) and 500ms WS-wait-then-REST
//! timeout, composed here with `WSPublicPool`'s live ticker cache,
//! `CandleStore` and `SignedHttpClient` rather than the Python's
//! `WSFirstDataService` indirection.

use crate::config::runtime::{MarketDataMode, RuntimeConfig};
use crate::errors::{CoreError, CoreResult};
use crate::market_data::candle_store::{Candle, CandleStore};
use crate::market_data::indicators::IncrementalIndicators;
use crate::transport::http_client::SignedHttpClient;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerSource {
    Ws,
    Rest,
}

#[derive(Debug, Clone)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last_price: Decimal,
    pub source: TickerSource,
    pub reason: &'static str,
    pub observed_at: Instant,
}

struct CachedTicker {
    snapshot: TickerSnapshot,
}

/// Live WS-fed ticker cache; `WSPublicPool`'s ticker channel handler writes
/// here, `MarketDataFacade::get_ticker` reads it.
#[derive(Default)]
pub struct TickerCache {
    by_symbol: RwLock<HashMap<String, CachedTicker>>,
}

impl TickerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, symbol: &str, bid: Decimal, ask: Decimal, last_price: Decimal) {
        let mut guard = self.by_symbol.write().await;
        guard.insert(
            symbol.to_string(),
            CachedTicker {
                snapshot: TickerSnapshot {
                    symbol: symbol.to_string(),
                    bid,
                    ask,
                    last_price,
                    source: TickerSource::Ws,
                    reason: "ws_snapshot",
                    observed_at: Instant::now(),
                },
            },
        );
    }

    async fn get_if_fresh(&self, symbol: &str, max_age: Duration) -> Option<TickerSnapshot> {
        let guard = self.by_symbol.read().await;
        let cached = guard.get(symbol)?;
        if cached.snapshot.observed_at.elapsed() < max_age {
            Some(cached.snapshot.clone())
        } else {
            None
        }
    }
}

pub struct MarketDataFacade {
    runtime_config: RuntimeConfig,
    ticker_cache: Arc<TickerCache>,
    candle_store: Arc<CandleStore>,
    indicators: Arc<IncrementalIndicators>,
    http: Arc<SignedHttpClient>,
}

impl MarketDataFacade {
    pub fn new(
        runtime_config: RuntimeConfig,
        ticker_cache: Arc<TickerCache>,
        candle_store: Arc<CandleStore>,
        indicators: Arc<IncrementalIndicators>,
        http: Arc<SignedHttpClient>,
    ) -> Self {
        Self {
            runtime_config,
            ticker_cache,
            candle_store,
            indicators,
            http,
        }
    }

    /// WS-first with REST fallback: a fresh WS snapshot wins outright; a
    /// stale-or-missing one waits up to `WS_TICKER_WARMUP_MS` for the next
    /// tick before falling back to a signed/public REST call (spec §4.10).
    pub async fn get_ticker(&self, symbol: &str) -> CoreResult<TickerSnapshot> {
        let cfg = self.runtime_config.snapshot();

        match cfg.marketdata_mode {
            MarketDataMode::RestOnly => return self.fetch_ticker_rest(symbol, "forced_mode").await,
            MarketDataMode::WsOnly | MarketDataMode::Auto => {}
        }

        let stale_after = Duration::from_secs(cfg.ws_ticker_stale_secs);
        if let Some(snapshot) = self.ticker_cache.get_if_fresh(symbol, stale_after).await {
            return Ok(snapshot);
        }

        if cfg.marketdata_mode == MarketDataMode::WsOnly {
            let warmup = Duration::from_millis(cfg.ws_ticker_warmup_ms);
            return self.await_ws_tick(symbol, warmup).await;
        }

        // auto: wait up to the warmup budget for a fresh WS tick, else REST.
        let warmup = Duration::from_millis(cfg.ws_ticker_warmup_ms);
        match self.await_ws_tick(symbol, warmup).await {
            Ok(snapshot) => Ok(snapshot),
            Err(_) => self.fetch_ticker_rest(symbol, "ws_timeout").await,
        }
    }

    async fn await_ws_tick(&self, symbol: &str, warmup: Duration) -> CoreResult<TickerSnapshot> {
        let deadline = Instant::now() + warmup;
        let poll_interval = Duration::from_millis(25);
        loop {
            if let Some(snapshot) = self.ticker_cache.get_if_fresh(symbol, warmup).await {
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                return Err(CoreError::WsNotConnected);
            }
            tokio::time::sleep(poll_interval.min(deadline - Instant::now())).await;
        }
    }

    async fn fetch_ticker_rest(&self, symbol: &str, reason: &'static str) -> CoreResult<TickerSnapshot> {
        let endpoint = format!("ticker/{}", symbol);
        let body = timeout(Duration::from_millis(500), self.http.public_get(&endpoint, &[]))
            .await
            .map_err(|_| CoreError::TransportError("ticker REST timeout".into()))??;

        let arr = body.as_array().ok_or_else(|| CoreError::TransportError("malformed ticker body".into()))?;
        let dec_at = |i: usize| -> Decimal {
            arr.get(i).and_then(|v| v.as_f64()).map(Decimal::try_from).and_then(Result::ok).unwrap_or(Decimal::ZERO)
        };

        info!("marketdata.source=rest reason={} symbol={}", reason, symbol);
        Ok(TickerSnapshot {
            symbol: symbol.to_string(),
            bid: dec_at(0),
            ask: dec_at(2),
            last_price: dec_at(6),
            source: TickerSource::Rest,
            reason,
            observed_at: Instant::now(),
        })
    }

    /// Serves from `CandleStore` if coverage/freshness is acceptable,
    /// otherwise fetches from REST, upserts, and returns the merged view.
    pub async fn get_candles(&self, symbol: &str, timeframe: &str, limit: i64) -> CoreResult<Vec<Candle>> {
        let cached = self
            .candle_store
            .load(symbol, timeframe, limit)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        if cached.len() as i64 >= limit {
            return Ok(cached);
        }

        let endpoint = format!("candles/trade:{}:{}/hist", timeframe, symbol);
        let body = self
            .http
            .public_get(&endpoint, &[("limit", &limit.to_string())])
            .await?;

        let rows = body.as_array().cloned().unwrap_or_default();
        let fetched: Vec<Candle> = rows
            .iter()
            .filter_map(|row| {
                let row = row.as_array()?;
                let f = |i: usize| -> Decimal {
                    row.get(i).and_then(|v| v.as_f64()).and_then(|v| Decimal::try_from(v).ok()).unwrap_or(Decimal::ZERO)
                };
                Some(Candle {
                    mts: row.first()?.as_i64()?,
                    open: f(1),
                    close: f(2),
                    high: f(3),
                    low: f(4),
                    volume: f(5),
                })
            })
            .collect();

        if !fetched.is_empty() {
            self.candle_store
                .store(symbol, timeframe, &fetched)
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            for c in fetched.iter().rev() {
                self.indicators.update_candle(symbol, timeframe, c).await;
            }
        }

        self.candle_store
            .load(symbol, timeframe, limit)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn ticker_cache_reports_stale_after_max_age() {
        let cache = TickerCache::new();
        cache.put("tBTCUSD", dec!(100), dec!(101), dec!(100.5)).await;
        assert!(cache.get_if_fresh("tBTCUSD", Duration::from_secs(5)).await.is_some());
        assert!(cache.get_if_fresh("tBTCUSD", Duration::from_nanos(1)).await.is_none());
    }

    #[tokio::test]
    async fn missing_symbol_is_none() {
        let cache = TickerCache::new();
        assert!(cache.get_if_fresh("tETHUSD", Duration::from_secs(5)).await.is_none());
    }
}

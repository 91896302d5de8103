//! Pure coordinator methods invoked by the scheduler loop, ported 1:1 from
//! `examples/original_source/tradingbot-backend/services/coordinator.py`'s
//! `CoordinatorService`: no business logic lives in the scheduler itself,
//! only these methods. The probability model's math and the market-regime
//! detector's math are external collaborators (spec §1 "OUT of scope");
//! `Coordinator` only specifies the trait shape it calls through and
//! records the result dict each method returns, per
//! `domain::market::market_regime`'s `MarketRegimeType`/`MarketRegime`
//! result shape (without its detection math).

use crate::market_data::candle_store::{Candle, CandleStore};
use crate::market_data::facade::MarketDataFacade;
use crate::risk::guards::EquitySource;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegimeType {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRegime {
    pub regime_type: MarketRegimeType,
    pub confidence: Decimal,
}

/// Brier score / log-loss produced by validating a fitted probability model
/// against realized outcomes on a window of candles. The model's training
/// and scoring math is an external collaborator; CORE only records what it
/// returns.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProbMetrics {
    pub brier: Option<f64>,
    pub logloss: Option<f64>,
}

#[async_trait]
pub trait ProbabilityModel: Send + Sync {
    /// Validates the current model on a window of candles for one
    /// (symbol, timeframe) pair.
    async fn validate(&self, symbol: &str, timeframe: &str, candles: &[Candle]) -> ProbMetrics;

    /// Fits a fresh model on a window of candles and exports it to
    /// `out_path`; returns `Err` if training failed.
    async fn train_and_export(
        &self,
        symbol: &str,
        timeframe: &str,
        candles: &[Candle],
        out_path: &Path,
    ) -> anyhow::Result<()>;

    /// Reloads the live model from the last exported artifact; `true` if a
    /// new model was picked up.
    async fn reload(&self) -> bool;
}

#[async_trait]
pub trait RegimeClassifier: Send + Sync {
    async fn classify(&self, symbol: &str, candles: &[Candle]) -> Option<MarketRegime>;
}

#[derive(Debug, Clone, Serialize)]
pub struct EquitySnapshotResult {
    pub ok: bool,
    pub equity: Option<Decimal>,
    pub reason: String,
    pub ts: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetentionResult {
    pub ok: bool,
    pub removed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbValidationResult {
    pub ok: bool,
    pub disabled: bool,
    pub symbols_processed: usize,
    pub avg_brier: Option<f64>,
    pub avg_logloss: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbRetrainResult {
    pub ok: bool,
    pub disabled: bool,
    pub events: usize,
    pub reloaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegimeUpdateResult {
    pub ok: bool,
    pub updated: usize,
}

/// Scheduler-facing configuration for which symbols/timeframes each
/// coordinator job sweeps; loaded from `RuntimeConfig`/boot config rather
/// than hard-coded, mirroring the Python original's `WS_SUBSCRIBE_SYMBOLS`
/// fallback chain.
#[derive(Debug, Clone)]
pub struct CoordinatorJobConfig {
    pub prob_validate_enabled: bool,
    pub prob_validate_symbols: Vec<String>,
    pub prob_validate_timeframe: String,
    pub prob_validate_limit: i64,

    pub prob_retrain_enabled: bool,
    pub prob_retrain_symbols: Vec<String>,
    pub prob_retrain_timeframe: String,
    pub prob_retrain_limit: i64,
    pub prob_retrain_output_dir: std::path::PathBuf,

    pub regime_symbols: Vec<String>,
    pub regime_timeframe: String,
    pub regime_candle_limit: i64,

    pub candle_cache_retention_days: u32,
    pub candle_cache_max_rows_per_pair: u32,
}

impl Default for CoordinatorJobConfig {
    fn default() -> Self {
        Self {
            prob_validate_enabled: true,
            prob_validate_symbols: vec!["tBTCUSD".to_string()],
            prob_validate_timeframe: "1m".to_string(),
            prob_validate_limit: 1200,
            prob_retrain_enabled: false,
            prob_retrain_symbols: vec!["tBTCUSD".to_string()],
            prob_retrain_timeframe: "1m".to_string(),
            prob_retrain_limit: 5000,
            prob_retrain_output_dir: std::path::PathBuf::from("state/models"),
            regime_symbols: vec!["tBTCUSD".to_string()],
            regime_timeframe: "1h".to_string(),
            regime_candle_limit: 200,
            candle_cache_retention_days: 30,
            candle_cache_max_rows_per_pair: 5000,
        }
    }
}

/// Owns the business logic the scheduler drives; the scheduler itself is a
/// dumb loop over these methods (spec §4.19 — "Scheduler anropar endast
/// dessa metoder; ingen affärslogik i scheduler" in the original).
pub struct Coordinator {
    config: CoordinatorJobConfig,
    equity_source: Arc<dyn EquitySource>,
    market_data: Arc<MarketDataFacade>,
    candle_store: Arc<CandleStore>,
    prob_model: Option<Arc<dyn ProbabilityModel>>,
    regime_classifier: Option<Arc<dyn RegimeClassifier>>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorJobConfig,
        equity_source: Arc<dyn EquitySource>,
        market_data: Arc<MarketDataFacade>,
        candle_store: Arc<CandleStore>,
        prob_model: Option<Arc<dyn ProbabilityModel>>,
        regime_classifier: Option<Arc<dyn RegimeClassifier>>,
    ) -> Self {
        Self {
            config,
            equity_source,
            market_data,
            candle_store,
            prob_model,
            regime_classifier,
        }
    }

    pub async fn equity_snapshot(&self, reason: &str) -> EquitySnapshotResult {
        let equity = self.equity_source.current_equity().await;
        if let Some(eq) = equity {
            crate::metrics::global().account_equity.set(eq.to_f64().unwrap_or(0.0));
        } else {
            warn!("Coordinator: equity_snapshot({}) had no equity reading", reason);
        }
        EquitySnapshotResult {
            ok: equity.is_some(),
            equity,
            reason: reason.to_string(),
            ts: Utc::now(),
        }
    }

    pub async fn enforce_candle_cache_retention(&self) -> RetentionResult {
        let days = self.config.candle_cache_retention_days;
        let max_rows = self.config.candle_cache_max_rows_per_pair;
        if days == 0 && max_rows == 0 {
            return RetentionResult { ok: true, removed: 0 };
        }
        match self.candle_store.enforce_retention(days, max_rows).await {
            Ok(removed) => RetentionResult { ok: true, removed },
            Err(e) => {
                warn!("Coordinator: candle retention enforcement failed: {}", e);
                RetentionResult { ok: false, removed: 0 }
            }
        }
    }

    pub async fn prob_validation(&self) -> ProbValidationResult {
        if !self.config.prob_validate_enabled {
            return ProbValidationResult {
                ok: false,
                disabled: true,
                symbols_processed: 0,
                avg_brier: None,
                avg_logloss: None,
            };
        }
        let Some(model) = &self.prob_model else {
            return ProbValidationResult {
                ok: false,
                disabled: true,
                symbols_processed: 0,
                avg_brier: None,
                avg_logloss: None,
            };
        };

        let tf = &self.config.prob_validate_timeframe;
        let mut briers = Vec::new();
        let mut loglosses = Vec::new();
        let mut processed = 0usize;

        for symbol in &self.config.prob_validate_symbols {
            let candles = match self
                .market_data
                .get_candles(symbol, tf, self.config.prob_validate_limit)
                .await
            {
                Ok(c) if !c.is_empty() => c,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Coordinator: prob_validation candles fetch failed for {}: {}", symbol, e);
                    continue;
                }
            };
            let metrics = model.validate(symbol, tf, &candles).await;
            if let Some(b) = metrics.brier {
                briers.push(b);
            }
            if let Some(l) = metrics.logloss {
                loglosses.push(l);
            }
            processed += 1;
        }

        let avg = |v: &[f64]| if v.is_empty() { None } else { Some(v.iter().sum::<f64>() / v.len() as f64) };
        ProbValidationResult {
            ok: true,
            disabled: false,
            symbols_processed: processed,
            avg_brier: avg(&briers),
            avg_logloss: avg(&loglosses),
        }
    }

    pub async fn prob_retrain(&self) -> ProbRetrainResult {
        if !self.config.prob_retrain_enabled {
            return ProbRetrainResult {
                ok: false,
                disabled: true,
                events: 0,
                reloaded: false,
            };
        }
        let Some(model) = &self.prob_model else {
            return ProbRetrainResult {
                ok: false,
                disabled: true,
                events: 0,
                reloaded: false,
            };
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.config.prob_retrain_output_dir).await {
            warn!("Coordinator: could not create prob retrain output dir: {}", e);
        }

        let tf = &self.config.prob_retrain_timeframe;
        let mut events = 0usize;
        for symbol in &self.config.prob_retrain_symbols {
            let candles = match self
                .market_data
                .get_candles(symbol, tf, self.config.prob_retrain_limit)
                .await
            {
                Ok(c) if !c.is_empty() => c,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Coordinator: prob_retrain candles fetch failed for {}: {}", symbol, e);
                    continue;
                }
            };
            let clean = symbol.trim_start_matches('t').replace([':', '-'], "_");
            let out_path = self.config.prob_retrain_output_dir.join(format!("{}_{}.json", clean, tf));
            match model.train_and_export(symbol, tf, &candles, &out_path).await {
                Ok(()) => events += 1,
                Err(e) => warn!("Coordinator: training failed for {}: {}", symbol, e),
            }
        }

        let reloaded = model.reload().await;
        ProbRetrainResult {
            ok: true,
            disabled: false,
            events,
            reloaded,
        }
    }

    pub async fn update_regime(&self) -> RegimeUpdateResult {
        let Some(classifier) = &self.regime_classifier else {
            return RegimeUpdateResult { ok: false, updated: 0 };
        };

        let tf = &self.config.regime_timeframe;
        let mut updated = 0usize;
        for symbol in &self.config.regime_symbols {
            let candles = match self
                .market_data
                .get_candles(symbol, tf, self.config.regime_candle_limit)
                .await
            {
                Ok(c) if !c.is_empty() => c,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Coordinator: update_regime candles fetch failed for {}: {}", symbol, e);
                    continue;
                }
            };
            if classifier.classify(symbol, &candles).await.is_some() {
                updated += 1;
            }
        }
        RegimeUpdateResult { ok: true, updated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::runtime::RuntimeConfig;
    use crate::market_data::facade::{MarketDataFacade, TickerCache};
    use crate::market_data::indicators::IncrementalIndicators;
    use crate::metrics::MetricsStore;
    use crate::transport::circuit_breaker::TransportCircuitBreaker;
    use crate::transport::http_client::{HttpClientFactory, SignedHttpClient};
    use crate::transport::nonce::NonceSource;
    use crate::transport::rate_limiter::RateLimiter;
    use crate::transport::signer::Signer;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedEquity(Decimal);
    #[async_trait]
    impl EquitySource for FixedEquity {
        async fn current_equity(&self) -> Option<Decimal> {
            Some(self.0)
        }
    }

    struct StubProbModel {
        reload_called: AtomicBool,
    }
    #[async_trait]
    impl ProbabilityModel for StubProbModel {
        async fn validate(&self, _symbol: &str, _tf: &str, _candles: &[Candle]) -> ProbMetrics {
            ProbMetrics {
                brier: Some(0.2),
                logloss: Some(0.5),
            }
        }
        async fn train_and_export(
            &self,
            _symbol: &str,
            _tf: &str,
            _candles: &[Candle],
            _out_path: &Path,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn reload(&self) -> bool {
            self.reload_called.store(true, Ordering::SeqCst);
            true
        }
    }

    struct StubRegime;
    #[async_trait]
    impl RegimeClassifier for StubRegime {
        async fn classify(&self, _symbol: &str, _candles: &[Candle]) -> Option<MarketRegime> {
            Some(MarketRegime {
                regime_type: MarketRegimeType::Ranging,
                confidence: dec!(0.8),
            })
        }
    }

    async fn facade_with_candles() -> (Arc<MarketDataFacade>, Arc<CandleStore>) {
        let candle_store = Arc::new(CandleStore::new("sqlite::memory:").await.unwrap());
        candle_store
            .store(
                "tBTCUSD",
                "1m",
                &(0..5)
                    .map(|i| Candle {
                        mts: i * 60_000,
                        open: dec!(100),
                        close: dec!(101),
                        high: dec!(102),
                        low: dec!(99),
                        volume: dec!(10),
                    })
                    .collect::<Vec<_>>(),
            )
            .await
            .unwrap();

        let metrics = Arc::new(MetricsStore::new());
        let nonce = Arc::new(NonceSource::new(std::env::temp_dir().join(format!("coord_nonce_{}", uuid::Uuid::new_v4()))));
        let signer = Signer::new("key", "secret").unwrap();
        let limiter = Arc::new(RateLimiter::new(&[], metrics.clone()));
        let breaker = Arc::new(TransportCircuitBreaker::new(5, metrics.clone()));
        let client = HttpClientFactory::create_client(std::time::Duration::from_secs(1), std::time::Duration::from_secs(1));
        let http = Arc::new(SignedHttpClient::new(
            client,
            limiter,
            breaker,
            signer,
            nonce,
            "test-key".to_string(),
            "http://localhost".to_string(),
            "http://localhost".to_string(),
            metrics,
        ));

        let facade = Arc::new(MarketDataFacade::new(
            RuntimeConfig::default(),
            Arc::new(TickerCache::new()),
            candle_store.clone(),
            Arc::new(IncrementalIndicators::new(12, 14, 14)),
            http,
        ));
        (facade, candle_store)
    }

    #[tokio::test]
    async fn equity_snapshot_reports_reading() {
        let (facade, candle_store) = facade_with_candles().await;
        let coordinator = Coordinator::new(
            CoordinatorJobConfig::default(),
            Arc::new(FixedEquity(dec!(12345))),
            facade,
            candle_store,
            None,
            None,
        );
        let result = coordinator.equity_snapshot("scheduled").await;
        assert!(result.ok);
        assert_eq!(result.equity, Some(dec!(12345)));
    }

    #[tokio::test]
    async fn retention_job_is_noop_when_both_limits_zero() {
        let (facade, candle_store) = facade_with_candles().await;
        let mut config = CoordinatorJobConfig::default();
        config.candle_cache_retention_days = 0;
        config.candle_cache_max_rows_per_pair = 0;
        let coordinator = Coordinator::new(config, Arc::new(FixedEquity(dec!(1))), facade, candle_store, None, None);
        let result = coordinator.enforce_candle_cache_retention().await;
        assert!(result.ok);
        assert_eq!(result.removed, 0);
    }

    #[tokio::test]
    async fn prob_validation_disabled_reports_disabled() {
        let (facade, candle_store) = facade_with_candles().await;
        let mut config = CoordinatorJobConfig::default();
        config.prob_validate_enabled = false;
        let coordinator = Coordinator::new(config, Arc::new(FixedEquity(dec!(1))), facade, candle_store, None, None);
        let result = coordinator.prob_validation().await;
        assert!(result.disabled);
    }

    #[tokio::test]
    async fn prob_validation_averages_metrics_across_symbols() {
        let (facade, candle_store) = facade_with_candles().await;
        let mut config = CoordinatorJobConfig::default();
        config.prob_validate_symbols = vec!["tBTCUSD".to_string()];
        let model: Arc<dyn ProbabilityModel> = Arc::new(StubProbModel {
            reload_called: AtomicBool::new(false),
        });
        let coordinator = Coordinator::new(config, Arc::new(FixedEquity(dec!(1))), facade, candle_store, Some(model), None);
        let result = coordinator.prob_validation().await;
        assert!(result.ok);
        assert_eq!(result.symbols_processed, 1);
        assert_eq!(result.avg_brier, Some(0.2));
    }

    #[tokio::test]
    async fn prob_retrain_reloads_model_after_training() {
        let (facade, candle_store) = facade_with_candles().await;
        let mut config = CoordinatorJobConfig::default();
        config.prob_retrain_enabled = true;
        config.prob_retrain_output_dir = std::env::temp_dir().join(format!("coord_models_{}", uuid::Uuid::new_v4()));
        let model: Arc<dyn ProbabilityModel> = Arc::new(StubProbModel {
            reload_called: AtomicBool::new(false),
        });
        let coordinator = Coordinator::new(config, Arc::new(FixedEquity(dec!(1))), facade, candle_store, Some(model), None);
        let result = coordinator.prob_retrain().await;
        assert!(result.ok);
        assert_eq!(result.events, 1);
        assert!(result.reloaded);
    }

    #[tokio::test]
    async fn update_regime_counts_successful_classifications() {
        let (facade, candle_store) = facade_with_candles().await;
        let config = CoordinatorJobConfig::default();
        let classifier: Arc<dyn RegimeClassifier> = Arc::new(StubRegime);
        let coordinator = Coordinator::new(config, Arc::new(FixedEquity(dec!(1))), facade, candle_store, None, Some(classifier));
        let result = coordinator.update_regime().await;
        assert!(result.ok);
        assert_eq!(result.updated, 1);
    }
}

//! Periodic scheduler driving `Coordinator` methods (spec §4.19): a loop
//! with per-job budget + jitter, cooperative tasks, no timer-thread-per-job
//! (spec §9 "Schedulers" design note). Mirrors the teacher's `RiskManager::run`
//! `tokio::select!`-over-`tokio::time::interval` shape (one ticker per
//! periodic concern, `Interval`'s own missed-tick accumulation standing in
//! for a persistent job queue), generalized so each job executes as its own
//! spawned, cancellable, individually-timed-out task rather than inline in
//! the select arm -- a hang in one job must never delay another's tick.

pub mod coordinator;

use crate::metrics::global as metrics;
use coordinator::Coordinator;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub equity_snapshot_interval: Duration,
    pub candle_retention_interval: Duration,
    pub prob_validation_interval: Duration,
    pub prob_retrain_interval: Duration,
    pub regime_update_interval: Duration,
    /// Hard per-run deadline; a job that blows through this is recorded as
    /// a scheduler failure but never brought down the loop.
    pub job_timeout: Duration,
    /// Upper bound of the random per-tick delay added before a job runs, so
    /// that many processes started at the same instant don't all hit the
    /// exchange/DB in lockstep (spec §9 "per-job budget + jitter").
    pub jitter_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            equity_snapshot_interval: Duration::from_secs(60),
            candle_retention_interval: Duration::from_secs(3600),
            prob_validation_interval: Duration::from_secs(900),
            prob_retrain_interval: Duration::from_secs(21_600),
            regime_update_interval: Duration::from_secs(300),
            job_timeout: Duration::from_secs(30),
            jitter_max: Duration::from_millis(2500),
        }
    }
}

/// Drives `Coordinator` jobs on independent tickers. Owns no business logic
/// itself -- every tick just calls through to a `Coordinator` method.
pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(coordinator: Arc<Coordinator>, config: SchedulerConfig) -> Self {
        Self { coordinator, config }
    }

    /// Runs until `shutdown` reports `true`. Every in-flight job is aborted
    /// on shutdown rather than left to finish, per spec §5 "every scheduled
    /// job is cancellable and must release resources on cancel".
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut equity_tick = ticker(self.config.equity_snapshot_interval);
        let mut retention_tick = ticker(self.config.candle_retention_interval);
        let mut prob_validation_tick = ticker(self.config.prob_validation_interval);
        let mut prob_retrain_tick = ticker(self.config.prob_retrain_interval);
        let mut regime_tick = ticker(self.config.regime_update_interval);

        let mut inflight: JoinSet<()> = JoinSet::new();

        info!("Scheduler: started");
        loop {
            tokio::select! {
                _ = equity_tick.tick() => {
                    self.spawn_job(&mut inflight, "equity_snapshot", {
                        let coordinator = self.coordinator.clone();
                        async move { coordinator.equity_snapshot("scheduled").await; }
                    });
                }
                _ = retention_tick.tick() => {
                    self.spawn_job(&mut inflight, "enforce_candle_cache_retention", {
                        let coordinator = self.coordinator.clone();
                        async move { coordinator.enforce_candle_cache_retention().await; }
                    });
                }
                _ = prob_validation_tick.tick() => {
                    self.spawn_job(&mut inflight, "prob_validation", {
                        let coordinator = self.coordinator.clone();
                        async move { coordinator.prob_validation().await; }
                    });
                }
                _ = prob_retrain_tick.tick() => {
                    self.spawn_job(&mut inflight, "prob_retrain", {
                        let coordinator = self.coordinator.clone();
                        async move { coordinator.prob_retrain().await; }
                    });
                }
                _ = regime_tick.tick() => {
                    self.spawn_job(&mut inflight, "update_regime", {
                        let coordinator = self.coordinator.clone();
                        async move { coordinator.update_regime().await; }
                    });
                }
                // Reap completed jobs so the set doesn't grow unbounded;
                // a panic inside a job is caught here and logged rather
                // than propagated.
                Some(result) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            warn!("Scheduler: a job panicked: {}", e);
                        }
                    }
                }
                Ok(()) = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler: shutdown requested, aborting {} in-flight job(s)", inflight.len());
                        inflight.abort_all();
                        while inflight.join_next().await.is_some() {}
                        break;
                    }
                }
            }
        }
        info!("Scheduler: stopped");
    }

    /// Spawns `job` wrapped in a hard per-run timeout and jittered start
    /// delay; records `scheduler_jobs_total`/`scheduler_job_failures_total`/
    /// `scheduler_job_duration_seconds` regardless of outcome.
    fn spawn_job<F>(&self, inflight: &mut JoinSet<()>, name: &'static str, job: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let job_timeout = self.config.job_timeout;
        let jitter_max = self.config.jitter_max;
        inflight.spawn(async move {
            let jitter = if jitter_max.is_zero() {
                Duration::ZERO
            } else {
                Duration::from_millis(rand::rng().random_range(0..=jitter_max.as_millis() as u64))
            };
            tokio::time::sleep(jitter).await;

            let start = std::time::Instant::now();
            let outcome = timeout(job_timeout, job).await;
            metrics()
                .scheduler_job_duration_seconds
                .with_label_values(&[name])
                .observe(start.elapsed().as_secs_f64());
            metrics().scheduler_jobs_total.with_label_values(&[name]).inc();

            if outcome.is_err() {
                warn!("Scheduler: job '{}' exceeded its {:?} budget", name, job_timeout);
                metrics().scheduler_job_failures_total.with_label_values(&[name]).inc();
            }
        });
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut i = interval(period.max(Duration::from_millis(1)));
    // Missed ticks collapse into one instead of bursting, matching the
    // teacher's plain `tokio::time::interval` default use in `RiskManager::run`
    // but made explicit since jittered job starts can push us past a tick.
    i.set_missed_tick_behavior(MissedTickBehavior::Delay);
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::candle_store::CandleStore;
    use crate::market_data::facade::{MarketDataFacade, TickerCache};
    use crate::market_data::indicators::IncrementalIndicators;
    use crate::metrics::MetricsStore;
    use crate::risk::guards::EquitySource;
    use crate::transport::circuit_breaker::TransportCircuitBreaker;
    use crate::transport::http_client::{HttpClientFactory, SignedHttpClient};
    use crate::transport::nonce::NonceSource;
    use crate::transport::rate_limiter::RateLimiter;
    use crate::transport::signer::Signer;
    use async_trait::async_trait;
    use coordinator::CoordinatorJobConfig;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct FixedEquity(Decimal);
    #[async_trait]
    impl EquitySource for FixedEquity {
        async fn current_equity(&self) -> Option<Decimal> {
            Some(self.0)
        }
    }

    async fn coordinator() -> Arc<Coordinator> {
        let candle_store = Arc::new(CandleStore::new("sqlite::memory:").await.unwrap());
        let metrics = Arc::new(MetricsStore::new());
        let nonce = Arc::new(NonceSource::new(std::env::temp_dir().join(format!("sched_nonce_{}", uuid::Uuid::new_v4()))));
        let signer = Signer::new("key", "secret").unwrap();
        let limiter = Arc::new(RateLimiter::new(&[], metrics.clone()));
        let breaker = Arc::new(TransportCircuitBreaker::new(5, metrics.clone()));
        let client = HttpClientFactory::create_client(Duration::from_secs(1), Duration::from_secs(1));
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
            crate::config::runtime::RuntimeConfig::default(),
            Arc::new(TickerCache::new()),
            candle_store.clone(),
            Arc::new(IncrementalIndicators::new(12, 14, 14)),
            http,
        ));
        Arc::new(Coordinator::new(
            CoordinatorJobConfig::default(),
            Arc::new(FixedEquity(dec!(1000))),
            facade,
            candle_store,
            None,
            None,
        ))
    }

    #[tokio::test]
    async fn runs_at_least_one_job_cycle_then_shuts_down_cleanly() {
        let scheduler = Scheduler::new(
            coordinator().await,
            SchedulerConfig {
                equity_snapshot_interval: Duration::from_millis(10),
                candle_retention_interval: Duration::from_secs(3600),
                prob_validation_interval: Duration::from_secs(3600),
                prob_retrain_interval: Duration::from_secs(3600),
                regime_update_interval: Duration::from_secs(3600),
                job_timeout: Duration::from_secs(1),
                jitter_max: Duration::ZERO,
            },
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not shut down in time")
            .unwrap();

        assert!(metrics().scheduler_jobs_total.with_label_values(&["equity_snapshot"]).get() >= 1.0);
    }

    #[tokio::test]
    async fn job_exceeding_its_budget_is_recorded_as_a_failure() {
        let scheduler = Scheduler::new(
            coordinator().await,
            SchedulerConfig {
                equity_snapshot_interval: Duration::from_secs(3600),
                candle_retention_interval: Duration::from_secs(3600),
                prob_validation_interval: Duration::from_secs(3600),
                prob_retrain_interval: Duration::from_secs(3600),
                regime_update_interval: Duration::from_secs(3600),
                job_timeout: Duration::from_millis(1),
                jitter_max: Duration::ZERO,
            },
        );
        let mut inflight = JoinSet::new();
        let before = metrics()
            .scheduler_job_failures_total
            .with_label_values(&["slow_test_job"])
            .get();
        scheduler.spawn_job(&mut inflight, "slow_test_job", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        inflight.join_next().await.unwrap().unwrap();
        let after = metrics()
            .scheduler_job_failures_total
            .with_label_values(&["slow_test_job"])
            .get();
        assert_eq!(after, before + 1.0);
    }
}

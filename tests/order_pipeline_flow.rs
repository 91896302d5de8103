//! End-to-end exercises of the order submission pipeline against spec §8's
//! concrete scenarios: happy-path dry-run submit, idempotent duplicate
//! rejection, and policy denial outside the trading window. Network-facing
//! steps (REST/WS submit) are out of reach without a live exchange, so
//! these drive the pipeline in dry-run mode, which still walks every gate
//! ahead of the transport call.

use bitfinex_core::config::runtime::{MarketDataMode, RuntimeConfig, RuntimeConfigInner};
use bitfinex_core::errors::CoreError;
use bitfinex_core::market_data::symbols::SymbolResolver;
use bitfinex_core::market_data::ws_private_session::WSPrivateSession;
use bitfinex_core::metrics::MetricsStore;
use bitfinex_core::orders::bracket_manager::{BracketManager, OrderCanceller};
use bitfinex_core::orders::idempotency::IdempotencyCache;
use bitfinex_core::orders::pipeline::{OrderPipeline, SubmitVia};
use bitfinex_core::orders::types::OrderIntent;
use bitfinex_core::orders::validator::OrderValidator;
use bitfinex_core::risk::guards::{EquitySource, RiskGuards, RiskGuardsConfig};
use bitfinex_core::risk::policy_engine::RiskPolicyEngine;
use bitfinex_core::risk::trade_counter::TradeCounter;
use bitfinex_core::risk::trading_window::{TradingRules, TradingWindow};
use bitfinex_core::transport::circuit_breaker::TransportCircuitBreaker;
use bitfinex_core::transport::http_client::{HttpClientFactory, SignedHttpClient};
use bitfinex_core::transport::nonce::NonceSource;
use bitfinex_core::transport::rate_limiter::RateLimiter;
use bitfinex_core::transport::signer::Signer;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

fn temp_path(name: &str) -> std::path::PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("bfx_core_pipeline_test_{}_{}", name, uuid::Uuid::new_v4()));
    p
}

struct FixedEquity(Decimal);

#[async_trait]
impl EquitySource for FixedEquity {
    async fn current_equity(&self) -> Option<Decimal> {
        Some(self.0)
    }
}

struct NoopCanceller;

#[async_trait]
impl OrderCanceller for NoopCanceller {
    async fn cancel_order(&self, _order_id: i64) -> Result<(), CoreError> {
        Ok(())
    }
    async fn resize_order(&self, _order_id: i64, _amount: Decimal) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Wires up a full pipeline with an open trading window, generous limits,
/// and no credentials configured -- the REST/WS submit legs are never
/// reached as long as every scenario here stays inside dry-run or gets
/// denied earlier in the chain.
async fn build_pipeline(name: &str, dry_run: bool, window_open: bool) -> OrderPipeline {
    let symbols = Arc::new(SymbolResolver::new(["tBTCUSD".to_string(), "tETHUSD".to_string()]));
    let validator = Arc::new(OrderValidator::new(symbols));

    let trading_window = TradingWindow::new(temp_path(&format!("{name}_tw"))).unwrap();
    let mut rules = TradingRules::default();
    if window_open {
        let now = Utc::now();
        let key = bitfinex_core::risk::trading_window::WEEKDAY_KEYS
            [now.weekday().num_days_from_monday() as usize];
        rules
            .windows
            .insert(key.to_string(), vec![("00:00".to_string(), "23:59".to_string())]);
    }
    rules.max_trades_per_day = 10;
    rules.max_trades_per_symbol_per_day = 10;
    rules.trade_cooldown_seconds = 0;
    trading_window.save_rules(rules).await.unwrap();

    let trade_counter = Arc::new(TradeCounter::new(temp_path(&format!("{name}_tc")), Tz::UTC));
    let guards = Arc::new(RiskGuards::new(
        RiskGuardsConfig::default(),
        Arc::new(FixedEquity(dec!(10000))),
    ));
    let policy = Arc::new(RiskPolicyEngine::new(
        Arc::new(trading_window),
        trade_counter,
        guards,
        true,
    ));

    let idempotency = Arc::new(IdempotencyCache::new(Duration::from_secs(60)));
    let bracket_manager = Arc::new(BracketManager::new(
        temp_path(&format!("{name}_bracket")),
        Arc::new(NoopCanceller),
        true,
    ));

    let metrics = Arc::new(MetricsStore::new());
    let rate_limiter = Arc::new(RateLimiter::new(&[], metrics.clone()));
    let breaker = Arc::new(TransportCircuitBreaker::new(5, metrics.clone()));
    let signer = Signer::new("test-key", "test-secret").unwrap();
    let nonce_source = Arc::new(NonceSource::new(temp_path(&format!("{name}_nonce"))));
    let http = Arc::new(SignedHttpClient::new(
        HttpClientFactory::create_client(Duration::from_secs(5), Duration::from_secs(5)),
        rate_limiter,
        breaker,
        signer,
        nonce_source.clone(),
        "test-key".to_string(),
        "https://api-pub.bitfinex.com".to_string(),
        "https://api.bitfinex.com".to_string(),
        metrics,
    ));
    let ws_private = WSPrivateSession::new(
        "wss://api.bitfinex.com/ws/2".to_string(),
        Arc::new(Signer::new("test-key", "test-secret").unwrap()),
        nonce_source,
        "test-key".to_string(),
        60_000,
    );

    let mut inner = RuntimeConfigInner::default();
    inner.marketdata_mode = MarketDataMode::Auto;
    inner.dry_run_enabled = dry_run;
    inner.autotrade_enabled = true;
    let runtime_config = RuntimeConfig::new(inner);

    OrderPipeline::new(validator, policy, idempotency, bracket_manager, http, ws_private, runtime_config)
}

fn limit_buy_intent() -> OrderIntent {
    OrderIntent {
        symbol: "tBTCUSD".to_string(),
        order_type: "EXCHANGE LIMIT".to_string(),
        side: "buy".to_string(),
        amount: dec!(0.002),
        price: Some(dec!(30000)),
        price_aux_limit: None,
        flags: Default::default(),
        client_id: Some(1001),
        gid: None,
    }
}

/// Scenario 1 (dry-run variant): a well-formed limit buy inside an open
/// trading window is validated, allowed, and short-circuited by dry-run
/// before any transport call -- returning a simulated active order.
#[tokio::test]
async fn dry_run_submit_returns_simulated_active_order() {
    let pipeline = build_pipeline("happy", true, true).await;
    let order = pipeline
        .submit(limit_buy_intent(), SubmitVia::Rest, None)
        .await
        .expect("dry-run submit should succeed");

    assert_eq!(order.id, -1);
    assert_eq!(order.symbol, "tBTCUSD");
    assert_eq!(order.status, bitfinex_core::orders::types::OrderStatus::Active);
}

/// Scenario 2: an identical submission within the idempotency TTL returns
/// the cached response without re-evaluating policy a second time in a way
/// that would double-count the trade.
#[tokio::test]
async fn duplicate_submit_within_ttl_returns_cached_response() {
    let pipeline = build_pipeline("dup", true, true).await;
    let first = pipeline
        .submit(limit_buy_intent(), SubmitVia::Rest, None)
        .await
        .expect("first submit should succeed");
    let second = pipeline
        .submit(limit_buy_intent(), SubmitVia::Rest, None)
        .await
        .expect("duplicate submit should return cached response");

    assert_eq!(first.id, second.id);
    assert_eq!(first.symbol, second.symbol);
}

/// Scenario 3: with no open trading window for today, the pipeline denies
/// the order at the policy gate before validation ever reaches the
/// transport layer, and the rejection reason is stable and enumerated.
#[tokio::test]
async fn policy_denies_outside_trading_window() {
    let pipeline = build_pipeline("closed", true, false).await;
    let err = pipeline
        .submit(limit_buy_intent(), SubmitVia::Rest, None)
        .await
        .expect_err("submit outside the trading window must be denied");

    match err {
        CoreError::PolicyDenied(reason) => assert_eq!(reason, "outside_trading_window"),
        other => panic!("expected policy_denied:outside_trading_window, got {other:?}"),
    }
}

/// An order with a zero amount never reaches the policy gate: validation
/// fails first and no trade is recorded.
#[tokio::test]
async fn invalid_order_rejected_before_policy_gate() {
    let pipeline = build_pipeline("invalid", true, true).await;
    let mut intent = limit_buy_intent();
    intent.amount = Decimal::ZERO;

    let err = pipeline
        .submit(intent, SubmitVia::Rest, None)
        .await
        .expect_err("zero amount must be rejected");

    assert!(matches!(err, CoreError::InvalidOrder(_)));
}

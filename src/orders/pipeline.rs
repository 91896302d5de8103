//! Order submission pipeline, implementing spec §4.18's eight-step flow:
//! validate → policy gate → idempotency check → dry-run check → local rate
//! limit → submit (REST or WS) → record, with every step short-circuiting on
//! a typed `CoreError` in the teacher's `Result<T, E>` + `?` style (e.g.
//! `domain::risk::risk_config::RiskConfigError`).

use crate::config::runtime::RuntimeConfig;
use crate::errors::{CoreError, CoreResult};
use crate::market_data::ws_private_session::WSPrivateSession;
use crate::metrics::global as metrics;
use crate::orders::bracket_manager::BracketManager;
use crate::orders::idempotency::{CacheOutcome, IdempotencyCache, OrderFingerprint};
use crate::orders::types::{Order, OrderIntent, OrderStatus, OrderType};
use crate::orders::validator::OrderValidator;
use crate::risk::policy_engine::RiskPolicyEngine;
use crate::transport::http_client::{SignedDomain, SignedHttpClient};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

/// Which transport submits the order: REST is the default; WS is used when
/// the caller asks for lower latency via the private session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitVia {
    Rest,
    Ws,
}

/// Optional bracket children to register atomically with a successful
/// entry submission.
pub struct BracketRequest {
    pub gid: String,
    pub sl_id: i64,
    pub tp_id: i64,
}

pub struct OrderPipeline {
    validator: Arc<OrderValidator>,
    policy: Arc<RiskPolicyEngine>,
    idempotency: Arc<IdempotencyCache>,
    bracket_manager: Arc<BracketManager>,
    http: Arc<SignedHttpClient>,
    ws_private: Arc<WSPrivateSession>,
    runtime_config: RuntimeConfig,
    private_rest_permits: Arc<Semaphore>,
}

impl OrderPipeline {
    pub fn new(
        validator: Arc<OrderValidator>,
        policy: Arc<RiskPolicyEngine>,
        idempotency: Arc<IdempotencyCache>,
        bracket_manager: Arc<BracketManager>,
        http: Arc<SignedHttpClient>,
        ws_private: Arc<WSPrivateSession>,
        runtime_config: RuntimeConfig,
    ) -> Self {
        let permits = runtime_config.snapshot().private_rest_concurrency.max(1);
        Self {
            validator,
            policy,
            idempotency,
            bracket_manager,
            http,
            ws_private,
            runtime_config,
            private_rest_permits: Arc::new(Semaphore::new(permits)),
        }
    }

    pub async fn submit(
        &self,
        intent: OrderIntent,
        via: SubmitVia,
        bracket: Option<BracketRequest>,
    ) -> CoreResult<Order> {
        // 1. Validate + normalize.
        let normalized = self.validator.normalize(&intent)?;

        // 2. Risk policy gate.
        let decision = self.policy.evaluate(Some(&normalized.symbol)).await;
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "unknown".to_string());
            metrics()
                .orders_failed_total
                .with_label_values(&[&normalized.symbol, &reason])
                .inc();
            return Err(CoreError::PolicyDenied(reason));
        }

        // 3. Idempotency check.
        let fingerprint = OrderFingerprint::new(
            &normalized.symbol,
            normalized.side.as_str(),
            normalized.order_type.as_str(),
            normalized.amount,
            normalized.price,
            normalized.client_id,
            chrono::Utc::now().timestamp(),
        );
        if let CacheOutcome::Hit(cached) = self.idempotency.check_and_register(&fingerprint, None).await {
            if !cached.is_null() {
                if let Ok(order) = serde_json::from_value::<Order>(cached) {
                    return Ok(order);
                }
            }
            return Err(CoreError::DuplicateRequest);
        }

        // 4. Dry-run short-circuit.
        let cfg = self.runtime_config.snapshot();
        if cfg.dry_run_enabled {
            metrics().orders_total.with_label_values(&[&normalized.symbol]).inc();
            let simulated = Order {
                id: -1,
                symbol: normalized.symbol.clone(),
                order_type: normalized.order_type,
                side: normalized.side,
                amount: normalized.amount,
                price: normalized.price,
                status: OrderStatus::Active,
                gid: normalized.gid,
            };
            let response = serde_json::to_value(&simulated).map_err(|e| CoreError::Internal(e.to_string()))?;
            self.idempotency.store_response(&fingerprint, response).await;
            return Ok(simulated);
        }

        if !cfg.autotrade_enabled {
            return Err(CoreError::PolicyDenied("autotrade_disabled".to_string()));
        }

        // 5. Local rate limit (bounded concurrency for private submissions).
        let _permit = self
            .private_rest_permits
            .acquire()
            .await
            .map_err(|_| CoreError::RateLimited)?;

        // 6. Submit via REST or WS.
        let submit_result = match via {
            SubmitVia::Rest => self.submit_rest(&normalized).await,
            SubmitVia::Ws => self.submit_ws(&normalized).await,
        };
        // 8. On failure: increment failure metrics; do not record trade.
        let order = match submit_result {
            Ok(order) => order,
            Err(e) => {
                metrics()
                    .orders_failed_total
                    .with_label_values(&[&normalized.symbol, e.kind()])
                    .inc();
                return Err(e);
            }
        };

        // 7. On success: record trade, metrics, idempotency, bracket group.
        self.policy.record_trade(Some(&normalized.symbol)).await;
        metrics().orders_total.with_label_values(&[&order.symbol]).inc();
        let response = serde_json::to_value(&order).map_err(|e| CoreError::Internal(e.to_string()))?;
        self.idempotency.store_response(&fingerprint, response).await;

        if let Some(bracket) = bracket {
            self.bracket_manager
                .register_group(bracket.gid, order.id, bracket.sl_id, bracket.tp_id)
                .await;
        }

        info!("OrderPipeline: submitted order {} for {}", order.id, order.symbol);
        Ok(order)
    }

    async fn submit_rest(&self, normalized: &crate::orders::validator::NormalizedOrder) -> CoreResult<Order> {
        let mut fields = BTreeMap::new();
        fields.insert("type".to_string(), serde_json::json!(normalized.order_type.as_str()));
        fields.insert("symbol".to_string(), serde_json::json!(normalized.symbol));
        let signed_amount = if normalized.side == crate::orders::types::OrderSide::Sell {
            -normalized.amount
        } else {
            normalized.amount
        };
        fields.insert("amount".to_string(), serde_json::json!(signed_amount.to_string()));
        if let Some(price) = normalized.price {
            fields.insert("price".to_string(), serde_json::json!(price.to_string()));
        }
        if let Some(aux) = normalized.price_aux_limit {
            fields.insert("price_aux_limit".to_string(), serde_json::json!(aux.to_string()));
        }
        let flags = normalized.flags.as_bitmask();
        if flags != 0 {
            fields.insert("flags".to_string(), serde_json::json!(flags));
        }

        let response = self
            .http
            .signed_request("auth/w/order/submit", SignedDomain::Private, fields)
            .await?;

        Self::parse_order_response(&response, normalized)
    }

    async fn submit_ws(&self, normalized: &crate::orders::validator::NormalizedOrder) -> CoreResult<Order> {
        let signed_amount = if normalized.side == crate::orders::types::OrderSide::Sell {
            -normalized.amount
        } else {
            normalized.amount
        };
        let mut payload = serde_json::json!({
            "type": normalized.order_type.as_str(),
            "symbol": normalized.symbol,
            "amount": signed_amount.to_string(),
        });
        if let Some(price) = normalized.price {
            payload["price"] = serde_json::json!(price.to_string());
        }
        self.ws_private.submit_order(payload).await?;

        Ok(Order {
            id: 0,
            symbol: normalized.symbol.clone(),
            order_type: normalized.order_type,
            side: normalized.side,
            amount: normalized.amount,
            price: normalized.price,
            status: OrderStatus::Active,
            gid: normalized.gid,
        })
    }

    /// Exchange order-submit responses look like
    /// `[mts, "on-req", ..., [[order...]], null, "SUCCESS"|"ERROR", msg]`.
    fn parse_order_response(
        value: &serde_json::Value,
        normalized: &crate::orders::validator::NormalizedOrder,
    ) -> CoreResult<Order> {
        let arr = value.as_array().ok_or_else(|| CoreError::ExchangeError {
            code: "malformed".to_string(),
            msg: "order submit response was not an array".to_string(),
        })?;

        let status_word = arr.get(6).and_then(|v| v.as_str()).unwrap_or("");
        if status_word == "ERROR" {
            let msg = arr.get(7).and_then(|v| v.as_str()).unwrap_or("unknown error").to_string();
            return Err(CoreError::ExchangeError {
                code: "ERROR".to_string(),
                msg,
            });
        }

        let order_id = arr
            .get(4)
            .and_then(|v| v.as_array())
            .and_then(|orders| orders.first())
            .and_then(|o| o.as_array())
            .and_then(|o| o.first())
            .and_then(|id| id.as_i64())
            .unwrap_or(0);

        Ok(Order {
            id: order_id,
            symbol: normalized.symbol.clone(),
            order_type: normalized.order_type,
            side: normalized.side,
            amount: normalized.amount,
            price: normalized.price,
            status: OrderStatus::Active,
            gid: normalized.gid,
        })
    }
}

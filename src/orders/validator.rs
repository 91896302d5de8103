//! Order intent validation and normalization against a per-type schema
//! table, ported from `rest/order_validator.py`'s `OrderValidator` (confirmed
//! by `tests/test_order_validator.py`'s required-parameter/zero-amount/
//! negative-price/unknown-type rejection cases), generalized over
//! `OrderType`'s Bitfinex string vocabulary instead of a scraped schema.

use crate::errors::CoreError;
use crate::market_data::symbols::SymbolResolver;
use crate::orders::types::{OrderIntent, OrderSide, OrderType};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct OrderValidator {
    symbols: Arc<SymbolResolver>,
}

/// A validated, normalized order ready for the pipeline's rate-limit and
/// submit steps.
#[derive(Debug, Clone)]
pub struct NormalizedOrder {
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub price_aux_limit: Option<Decimal>,
    pub flags: crate::orders::types::OrderFlags,
    pub client_id: Option<i64>,
    pub gid: Option<i64>,
}

impl OrderValidator {
    pub fn new(symbols: Arc<SymbolResolver>) -> Self {
        Self { symbols }
    }

    /// Idempotent: `normalize(normalize(x).into_intent()) == normalize(x)`.
    pub fn normalize(&self, intent: &OrderIntent) -> Result<NormalizedOrder, CoreError> {
        let order_type = OrderType::from_str(intent.order_type.trim())
            .ok_or_else(|| CoreError::InvalidOrder(format!("unknown order type: {}", intent.order_type)))?;

        let symbol = self.symbols.resolve(&intent.symbol)?;

        let side = match intent.side.trim().to_ascii_lowercase().as_str() {
            "buy" => OrderSide::Buy,
            "sell" => OrderSide::Sell,
            other => return Err(CoreError::InvalidOrder(format!("invalid side: {}", other))),
        };

        if intent.amount.is_zero() {
            return Err(CoreError::InvalidOrder("amount cannot be zero".to_string()));
        }

        if order_type.requires_price() {
            let price = intent
                .price
                .ok_or_else(|| CoreError::InvalidOrder(format!("missing required parameter: price for {}", order_type.as_str())))?;
            if price <= Decimal::ZERO {
                return Err(CoreError::InvalidOrder("price must be greater than zero".to_string()));
            }
        } else if let Some(price) = intent.price {
            if price <= Decimal::ZERO {
                return Err(CoreError::InvalidOrder("price must be greater than zero".to_string()));
            }
        }

        if order_type.requires_price_aux_limit() && intent.price_aux_limit.is_none() {
            return Err(CoreError::InvalidOrder(format!(
                "missing required parameter: price_aux_limit for {}",
                order_type.as_str()
            )));
        }

        Ok(NormalizedOrder {
            symbol,
            order_type,
            side,
            amount: intent.amount,
            price: intent.price,
            price_aux_limit: intent.price_aux_limit,
            flags: intent.flags,
            client_id: intent.client_id,
            gid: intent.gid,
        })
    }

    pub fn suggest_test_alias(&self, symbol: &str) -> Option<String> {
        self.symbols.suggest_test_alias(symbol)
    }
}

//! Order domain types: intent, live order, and bracket groups, extending the
//! teacher's `domain::trading::types::{Order, OrderSide, OrderType,
//! OrderStatus}` enums with Bitfinex's order-type string vocabulary and
//! per-order flags.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Bitfinex v2 order-type strings; `EXCHANGE *` variants trade from the
/// exchange wallet, the bare variants from margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "EXCHANGE LIMIT")]
    ExchangeLimit,
    #[serde(rename = "EXCHANGE MARKET")]
    ExchangeMarket,
    #[serde(rename = "EXCHANGE STOP")]
    ExchangeStop,
    #[serde(rename = "EXCHANGE STOP LIMIT")]
    ExchangeStopLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::ExchangeLimit => "EXCHANGE LIMIT",
            OrderType::ExchangeMarket => "EXCHANGE MARKET",
            OrderType::ExchangeStop => "EXCHANGE STOP",
            OrderType::ExchangeStopLimit => "EXCHANGE STOP LIMIT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "EXCHANGE LIMIT" => Some(OrderType::ExchangeLimit),
            "EXCHANGE MARKET" => Some(OrderType::ExchangeMarket),
            "EXCHANGE STOP" => Some(OrderType::ExchangeStop),
            "EXCHANGE STOP LIMIT" => Some(OrderType::ExchangeStopLimit),
            _ => None,
        }
    }

    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::ExchangeLimit | OrderType::ExchangeStopLimit)
    }

    pub fn requires_price_aux_limit(&self) -> bool {
        matches!(self, OrderType::ExchangeStopLimit)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFlags {
    #[serde(default)]
    pub post_only: bool,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub hidden: bool,
}

impl OrderFlags {
    /// Bitfinex encodes flags as a bitmask sum: POST_ONLY=4096,
    /// REDUCE_ONLY=1024, HIDDEN=64.
    pub fn as_bitmask(&self) -> i64 {
        let mut mask = 0i64;
        if self.post_only {
            mask += 4096;
        }
        if self.reduce_only {
            mask += 1024;
        }
        if self.hidden {
            mask += 64;
        }
        mask
    }
}

/// A caller-submitted order request, prior to validation/normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub price_aux_limit: Option<Decimal>,
    #[serde(default)]
    pub flags: OrderFlags,
    pub client_id: Option<i64>,
    pub gid: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Active,
    #[serde(rename = "PARTIALLY FILLED")]
    PartiallyFilled,
    Executed,
    Canceled,
}

/// A validator-normalized intent, confirmed live on the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub gid: Option<i64>,
}

/// An OCO-style bracket: one entry plus two protective children (stop-loss,
/// take-profit) where filling either child cancels its sibling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketGroup {
    pub gid: String,
    pub entry_id: i64,
    pub sl_id: i64,
    pub tp_id: i64,
    pub active: bool,
    pub entry_filled_size: Decimal,
}

impl BracketGroup {
    pub fn new(gid: impl Into<String>, entry_id: i64, sl_id: i64, tp_id: i64) -> Self {
        Self {
            gid: gid.into(),
            entry_id,
            sl_id,
            tp_id,
            active: true,
            entry_filled_size: Decimal::ZERO,
        }
    }

    pub fn sibling_of(&self, order_id: i64) -> Option<i64> {
        if order_id == self.sl_id {
            Some(self.tp_id)
        } else if order_id == self.tp_id {
            Some(self.sl_id)
        } else {
            None
        }
    }

    pub fn is_child(&self, order_id: i64) -> bool {
        order_id == self.sl_id || order_id == self.tp_id
    }
}

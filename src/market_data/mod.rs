//! WebSocket fabric, candle/indicator state, symbol resolution, and the
//! WS-first/REST-fallback market-data facade (spec §4.6-4.10).

pub mod candle_store;
pub mod facade;
pub mod indicators;
pub mod symbols;
pub mod ws_private_session;
pub mod ws_public_pool;

pub use candle_store::{Candle, CandleStore};
pub use facade::{MarketDataFacade, TickerSnapshot, TickerSource};
pub use indicators::{IncrementalIndicators, IndicatorSnapshot};
pub use symbols::SymbolResolver;
pub use ws_private_session::{PrivateEvent, WSPrivateSession};
pub use ws_public_pool::{Channel, WSPublicPool};

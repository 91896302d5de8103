//! Order validation, idempotency, bracket (OCO) management, and the
//! submission pipeline composing them (spec §4.11-4.18).

pub mod bracket_manager;
pub mod idempotency;
pub mod pipeline;
pub mod types;
pub mod validator;

pub use bracket_manager::{BracketManager, OrderCanceller};
pub use idempotency::{CacheOutcome, IdempotencyCache, OrderFingerprint};
pub use pipeline::{BracketRequest, OrderPipeline, SubmitVia};
pub use types::{BracketGroup, Order, OrderFlags, OrderIntent, OrderSide, OrderStatus, OrderType};
pub use validator::{NormalizedOrder, OrderValidator};

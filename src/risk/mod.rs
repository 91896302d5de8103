//! Risk policy engine: trading windows, daily/per-symbol trade counters,
//! cooldown and runtime guards composed into a single allow/deny decision
//! (spec §4.13-4.16).

pub mod guards;
pub mod policy_engine;
pub mod trade_counter;
pub mod trading_window;

pub use guards::{EquitySource, RiskGuards};
pub use policy_engine::{PolicyDecision, RiskPolicyEngine};
pub use trade_counter::TradeCounter;
pub use trading_window::{TradingRules, TradingWindow};

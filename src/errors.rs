//! Stable, user-facing error kinds for the core pipeline.
//!
//! External responses must never leak stack traces or raw exception text;
//! every error surfaces as `{success: false, error: "<stable_kind>"}` with an
//! optional sanitized `details` bag.

use serde::Serialize;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("auth_not_configured")]
    AuthNotConfigured,

    #[error("invalid_order: {0}")]
    InvalidOrder(String),

    #[error("unknown_symbol: {0}")]
    UnknownSymbol(String),

    #[error("policy_denied:{0}")]
    PolicyDenied(String),

    #[error("rate_limited")]
    RateLimited,

    #[error("circuit_open:{endpoint} retry_in={retry_in_secs}s")]
    CircuitOpen { endpoint: String, retry_in_secs: u64 },

    #[error("transport_error: {0}")]
    TransportError(String),

    #[error("nonce_conflict")]
    NonceConflict,

    #[error("exchange_error: code={code} msg={msg}")]
    ExchangeError { code: String, msg: String },

    #[error("pool_saturated")]
    PoolSaturated,

    #[error("ws_not_connected")]
    WsNotConnected,

    #[error("dead_man_switch_failed: {0}")]
    DeadManSwitchFailed(String),

    #[error("duplicate_request")]
    DuplicateRequest,

    #[error("invalid_timezone: {0}")]
    InvalidTimezone(String),

    #[error("internal_error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The stable, enumerated kind string — never includes message detail
    /// that could leak internals.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::AuthNotConfigured => "auth_not_configured",
            CoreError::InvalidOrder(_) => "invalid_order",
            CoreError::UnknownSymbol(_) => "unknown_symbol",
            CoreError::PolicyDenied(_) => "policy_denied",
            CoreError::RateLimited => "rate_limited",
            CoreError::CircuitOpen { .. } => "circuit_open",
            CoreError::TransportError(_) => "transport_error",
            CoreError::NonceConflict => "nonce_conflict",
            CoreError::ExchangeError { .. } => "exchange_error",
            CoreError::PoolSaturated => "pool_saturated",
            CoreError::WsNotConnected => "ws_not_connected",
            CoreError::DeadManSwitchFailed(_) => "dead_man_switch_failed",
            CoreError::DuplicateRequest => "duplicate_request",
            CoreError::InvalidTimezone(_) => "invalid_timezone",
            CoreError::Internal(_) => "internal_error",
        }
    }
}

/// Sanitized external response shape — the only thing ever serialized back
/// to a caller or transport.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&CoreError> for ErrorResponse {
    fn from(err: &CoreError) -> Self {
        let details = match err {
            CoreError::PolicyDenied(reason) => {
                Some(serde_json::json!({ "reason": reason }))
            }
            CoreError::CircuitOpen {
                endpoint,
                retry_in_secs,
            } => Some(serde_json::json!({
                "endpoint": endpoint,
                "retry_in_secs": retry_in_secs,
            })),
            CoreError::ExchangeError { code, msg } => {
                Some(serde_json::json!({ "code": code, "msg": msg }))
            }
            _ => None,
        };
        ErrorResponse {
            success: false,
            error: err.kind().to_string(),
            details,
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

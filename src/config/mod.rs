//! Static boot-time configuration and hot-reloadable runtime knobs.

pub mod runtime;

pub use runtime::{MarketDataMode, RuntimeConfig};

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Boot-time configuration: credentials, base URLs, timeouts. Unlike
/// `RuntimeConfig`, these never change after the process starts — changing
/// the exchange base URL mid-flight would invalidate in-flight signed
/// requests.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_secret: String,
    pub rest_public_base_url: String,
    pub rest_auth_base_url: String,
    pub ws_public_url: String,
    pub ws_auth_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub nonce_store_path: std::path::PathBuf,
    pub trading_rules_path: std::path::PathBuf,
    pub trade_counter_path: std::path::PathBuf,
    pub bracket_state_path: std::path::PathBuf,
    pub candle_db_url: String,
    pub timezone: String,
}

impl Config {
    /// Load from environment variables, mirroring the teacher's
    /// `Config::from_env` + `dotenvy::dotenv()` pattern in `main.rs`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            api_key: env::var("BFX_API_KEY").unwrap_or_default(),
            api_secret: env::var("BFX_API_SECRET").unwrap_or_default(),
            rest_public_base_url: env::var("BFX_REST_PUBLIC_URL")
                .unwrap_or_else(|_| "https://api-pub.bitfinex.com".to_string()),
            rest_auth_base_url: env::var("BFX_REST_AUTH_URL")
                .unwrap_or_else(|_| "https://api.bitfinex.com".to_string()),
            ws_public_url: env::var("BFX_WS_PUBLIC_URL")
                .unwrap_or_else(|_| "wss://api-pub.bitfinex.com/ws/2".to_string()),
            ws_auth_url: env::var("BFX_WS_AUTH_URL")
                .unwrap_or_else(|_| "wss://api.bitfinex.com/ws/2".to_string()),
            connect_timeout: Duration::from_secs(
                env::var("BFX_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
            request_timeout: Duration::from_secs(
                env::var("BFX_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            nonce_store_path: env::var("BFX_NONCE_STORE_PATH")
                .unwrap_or_else(|_| "state/nonce_store.json".to_string())
                .into(),
            trading_rules_path: env::var("BFX_TRADING_RULES_PATH")
                .unwrap_or_else(|_| "state/trading_rules.json".to_string())
                .into(),
            trade_counter_path: env::var("BFX_TRADE_COUNTER_PATH")
                .unwrap_or_else(|_| "state/trade_counter.json".to_string())
                .into(),
            bracket_state_path: env::var("BFX_BRACKET_STATE_PATH")
                .unwrap_or_else(|_| "state/bracket_state.json".to_string())
                .into(),
            candle_db_url: env::var("BFX_CANDLE_DB_URL")
                .unwrap_or_else(|_| "sqlite://state/candles.db".to_string()),
            timezone: env::var("BFX_TIMEZONE").unwrap_or_else(|_| "UTC".to_string()),
        })
    }

    pub fn require_credentials(&self) -> Result<()> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            anyhow::bail!("auth_not_configured");
        }
        Ok(())
    }
}

pub fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    Ok(())
}

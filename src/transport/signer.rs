//! HMAC-SHA384 request signing for REST (v1/v2) and WS auth payloads.
//!
//! Signature style mirrors the teacher's `BinanceExecutionService::sign_request`
//! (HMAC over a deterministic message, hex-encoded), upgraded to the exchange's
//! SHA-384 digest and its `/api/v2/<endpoint><nonce><body>` message layout.

use crate::errors::CoreError;
use hmac::{Hmac, Mac};
use sha2::Sha384;

type HmacSha384 = Hmac<Sha384>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1,
    V2,
}

#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub bfx_apikey: String,
    pub bfx_nonce: String,
    pub bfx_signature: String,
    pub content_type: &'static str,
}

pub struct Signer {
    api_key: String,
    api_secret: String,
}

impl Signer {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self, CoreError> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(CoreError::AuthNotConfigured);
        }
        Ok(Self { api_key, api_secret })
    }

    fn hmac_hex(&self, message: &[u8]) -> String {
        let mut mac = HmacSha384::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts a key of any size");
        mac.update(message);
        hex::encode(mac.finalize().into_bytes())
    }

    /// `message = "/api/v2/" + endpoint + nonce + body_bytes` for v2;
    /// v1 keeps the historical `/api/` prefix used by a handful of
    /// legacy endpoints still present in the exchange dialect.
    pub fn rest_headers(
        &self,
        endpoint: &str,
        body_bytes: &[u8],
        version: ApiVersion,
        nonce: i64,
    ) -> SignedHeaders {
        let prefix = match version {
            ApiVersion::V1 => "/api/",
            ApiVersion::V2 => "/api/v2/",
        };
        let mut message = Vec::with_capacity(prefix.len() + endpoint.len() + 20 + body_bytes.len());
        message.extend_from_slice(prefix.as_bytes());
        message.extend_from_slice(endpoint.as_bytes());
        message.extend_from_slice(nonce.to_string().as_bytes());
        message.extend_from_slice(body_bytes);

        SignedHeaders {
            bfx_apikey: self.api_key.clone(),
            bfx_nonce: nonce.to_string(),
            bfx_signature: self.hmac_hex(&message),
            content_type: "application/json",
        }
    }

    /// WS auth frame: `authPayload = "AUTH" + nonce`, signed the same way.
    pub fn ws_auth_payload(&self, nonce: i64) -> serde_json::Value {
        let auth_payload = format!("AUTH{}", nonce);
        let auth_sig = self.hmac_hex(auth_payload.as_bytes());

        serde_json::json!({
            "event": "auth",
            "apiKey": self.api_key,
            "authNonce": nonce,
            "authPayload": auth_payload,
            "authSig": auth_sig,
        })
    }
}

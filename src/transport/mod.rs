//! Signed-transport layer: nonce issuance, HMAC signing, per-endpoint rate
//! limiting and circuit breaking, and the pooled signed HTTP client that
//! composes them (spec §4.1-4.5).

pub mod circuit_breaker;
pub mod http_client;
pub mod nonce;
pub mod rate_limiter;
pub mod signer;

pub use circuit_breaker::{CircuitState, TransportCircuitBreaker, UnifiedCircuitBreaker};
pub use http_client::{HttpClientFactory, SignedDomain, SignedHttpClient};
pub use nonce::NonceSource;
pub use rate_limiter::{EndpointClass, EndpointClassifier, RateLimiter};
pub use signer::{ApiVersion, Signer};

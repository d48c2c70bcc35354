//! HTTP middleware for admission control, security and observability.
//!
//! - **Request ID**: reuse or generate `X-Request-Id` for log correlation
//! - **Security Headers**: baseline headers, stricter set in production
//! - **JWT Authentication**: bearer validation on protected routes
//! - **Rate Limiting**: fixed window per route class and client
//! - **Request Timeout**: client-specified forward timeout
//! - **Trusted Proxy Validation**: CIDR-based proxy source validation
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Security Headers → JWT Auth → Rate Limit → Timeout → Handler
//!               ↓               ↓               ↓           ↓
//!         X-Request-Id     nosniff, HSTS   401 / 429      429 + Retry-After
//! ```
//!
//! Authentication runs before rate limiting so an authenticated caller is
//! limited by its subject id rather than its address.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;
pub mod timeout;

pub use auth::{AuthFailureGuard, JwtAuthLayer};
pub use ip::{UNKNOWN_IP, client_key, resolve_client_ip};
pub use rate_limit::{RateLimitLayer, TrustedProxyConfig};
pub use request_id::{RequestId, RequestIdLayer};
pub use security_headers::SecurityHeadersLayer;
pub use timeout::{
    ClientTimeout, MAX_REQUEST_TIMEOUT_MS, MIN_REQUEST_TIMEOUT_MS, REQUEST_TIMEOUT_HEADER,
    RequestTimeoutExt, TimeoutHeaderError, client_timeout,
};

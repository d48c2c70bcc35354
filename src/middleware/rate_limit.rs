//! Per-route-class rate limiting middleware.
//!
//! # Algorithm
//!
//! Fixed-window counters from [`FixedWindowLimiter`]: each request is mapped to
//! a route class by path prefix (`/api/auth` -> `auth`, `/api/ai` -> `ai`,
//! everything else -> `default`) and counted against the caller's key in that
//! class. See [`crate::services::rate_limiter`] for the window semantics.
//!
//! # Client Key
//!
//! Authenticated principal id, else client IP, else the shared `"unknown"`
//! bucket (see [`super::ip::client_key`]). This layer must run after the auth
//! layer so the principal is already in the request extensions.
//!
//! # Bypass
//!
//! Health paths (`/api/health`, `/health/*`) are never counted.
//!
//! # Response Headers
//!
//! On admission:
//! - `X-RateLimit-Limit`: Class limit per window
//! - `X-RateLimit-Remaining`: Requests left in the current window
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the window resets
//! - `X-RateLimit-Limit`
//! - `X-RateLimit-Remaining: 0`
//!
//! # IP Spoofing Mitigation
//!
//! `X-Forwarded-For` only overrides the socket peer address when the peer is
//! inside `TRUSTED_PROXIES`. Configure it with your reverse proxy's CIDR ranges
//! when the gateway is not directly exposed.

use std::net::IpAddr;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::client_key;
use crate::error::GatewayError;
use crate::metrics;
use crate::route_table::is_health_path;
use crate::services::rate_limiter::{Admission, FixedWindowLimiter};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    /// Network address
    network: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let parts: Vec<&str> = cidr.trim().split('/').collect();

        if parts.len() != 2 {
            // Try parsing as a single IP (implicit /32 or /128)
            if let Ok(ip) = parts.first()?.parse::<IpAddr>() {
                let prefix_len = match ip {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                return Some(Self {
                    network: ip,
                    prefix_len,
                });
            }
            return None;
        }

        let ip: IpAddr = parts.first()?.parse().ok()?;
        let prefix_len: u8 = parts.get(1)?.parse().ok()?;

        // Validate prefix length
        let max_prefix = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        if prefix_len > max_prefix {
            return None;
        }

        Some(Self {
            network: ip,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let net_bits = u32::from(*net);
                let addr_bits = u32::from(*addr);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (net_bits & mask) == (addr_bits & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let net_bits = u128::from(*net);
                let addr_bits = u128::from(*addr);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (net_bits & mask) == (addr_bits & mask)
            }
            // IPv4 and IPv6 don't match
            _ => false,
        }
    }
}

/// Proxies allowed to report the client address via `X-Forwarded-For`.
///
/// Empty means no peer is trusted and the socket address is always used.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    /// Parsed CIDR ranges for trusted proxies
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Create a new trusted proxy configuration from CIDR strings.
    ///
    /// Invalid CIDR strings are logged as warnings and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges loaded");
        }

        Self { ranges }
    }

    /// Check if trusted proxy validation is enabled (any ranges configured).
    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Check if a socket peer is a configured trusted proxy. Always `false`
    /// when no ranges are configured.
    pub fn is_trusted_peer(&self, ip: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(FixedWindowLimiter::new(&config.rate_limit_classes)?);
/// let app = Router::new()
///     .route("/api/{service}/{*rest}", any(handler))
///     .layer(RateLimitLayer::new(limiter, trusted_proxies));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<FixedWindowLimiter>,
    /// Trusted proxy configuration for IP spoofing mitigation
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<FixedWindowLimiter>, trusted_proxies: Arc<TrustedProxyConfig>) -> Self {
        Self {
            limiter,
            trusted_proxies,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<FixedWindowLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if is_health_path(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let key = client_key(&req, &self.trusted_proxies).into_owned();
        let (class, admission) = self.limiter.admit_path(req.uri().path(), &key);
        let class = class.to_string();

        Box::pin(async move {
            match admission {
                Admission::Admitted { limit, remaining } => {
                    debug!(client_key = %key, class = %class, remaining, "Request admitted");
                    let mut response = inner.call(req).await?;
                    let headers = response.headers_mut();
                    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
                    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
                    Ok(response)
                }
                Admission::Rejected {
                    limit,
                    retry_after_secs,
                } => {
                    warn!(
                        client_key = %key,
                        class = %class,
                        path = %req.uri().path(),
                        retry_after_secs,
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limited(&class);

                    let mut response =
                        GatewayError::RateLimited { retry_after_secs }.into_response();
                    let headers = response.headers_mut();
                    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
                    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from_static("0"));
                    Ok(response)
                }
            }
        })
    }
}

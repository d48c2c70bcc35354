//! Client identity extraction shared by rate limiting, auth throttling and
//! the proxy.
//!
//! # Resolution Order
//!
//! 1. Socket peer address (`ConnectInfo<SocketAddr>`), unless the peer is a
//!    trusted proxy
//! 2. `X-Forwarded-For` (first hop), then `X-Real-IP`
//! 3. [`UNKNOWN_IP`]
//!
//! Forwarded headers are only honoured when the peer sits inside
//! `TRUSTED_PROXIES`, or when no peer address is available at all (for
//! example a router driven through `oneshot` in tests). A client connecting
//! directly cannot pick its own rate-limit key by sending `X-Forwarded-For`.
//!
//! # The "unknown" Fallback
//!
//! When nothing identifies the caller, all such requests share the `"unknown"`
//! key and therefore one rate-limit bucket. Anonymous clients behind a
//! misconfigured proxy can starve each other. Monitor for high "unknown"
//! traffic in production logs.
//!
//! # Rate-Limit Key
//!
//! [`client_key`] prefers the authenticated [`Principal`] id over any address,
//! so users sharing a NAT get separate buckets once they log in.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use tracing::debug;

use super::rate_limit::TrustedProxyConfig;
use crate::models::Principal;

/// Fallback value when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Where a client IP came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    /// First entry of X-Forwarded-For.
    FromXff(&'a str),
    /// X-Real-IP header.
    FromRealIp(&'a str),
    NotFound,
}

/// Read the forwarded client IP from headers without allocating.
#[inline]
fn extract_ip_from_headers(headers: &HeaderMap) -> ExtractedIp<'_> {
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    if let Some(forwarded) = headers.get(X_FORWARDED_FOR)
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next().map(str::trim)
        && !first_ip.is_empty()
    {
        return ExtractedIp::FromXff(first_ip);
    }

    if let Some(real_ip) = headers.get(X_REAL_IP)
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// Socket peer address recorded by `into_make_service_with_connect_info`.
#[inline]
pub fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Forwarded client IP from headers only, or [`UNKNOWN_IP`].
#[inline]
pub fn forwarded_client_ip(headers: &HeaderMap) -> Cow<'static, str> {
    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ExtractedIp::NotFound => Cow::Borrowed(UNKNOWN_IP),
    }
}

/// Resolve the caller's IP address.
///
/// # Returns
///
/// `Cow<'static, str>`: borrowed for "unknown" (no allocation), owned for
/// actual IPs.
pub fn resolve_client_ip<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> Cow<'static, str> {
    match peer_ip(req) {
        Some(peer) if trusted_proxies.is_trusted_peer(&peer) => {
            match extract_ip_from_headers(req.headers()) {
                ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => {
                    debug!(peer = %peer, client_ip = %ip, "Using forwarded client IP from trusted proxy");
                    Cow::Owned(ip.to_string())
                }
                ExtractedIp::NotFound => Cow::Owned(peer.to_string()),
            }
        }
        Some(peer) => Cow::Owned(peer.to_string()),
        None => forwarded_client_ip(req.headers()),
    }
}

/// Rate-limit key: principal id, else client IP, else "unknown".
pub fn client_key<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> Cow<'static, str> {
    match req.extensions().get::<Principal>() {
        Some(principal) if !principal.subject_id.is_empty() => {
            Cow::Owned(format!("user:{}", principal.subject_id))
        }
        _ => resolve_client_ip(req, trusted_proxies),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn with_peer(mut req: Request<Body>, addr: &str) -> Request<Body> {
        req.extensions_mut()
            .insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        req
    }

    #[test]
    fn test_extract_ip_from_xff() {
        let req = Request::builder()
            .header("x-forwarded-for", "192.168.1.1, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(forwarded_client_ip(req.headers()), "192.168.1.1");
    }

    #[test]
    fn test_extract_ip_from_real_ip() {
        let req = Request::builder()
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(forwarded_client_ip(req.headers()), "192.168.1.1");
    }

    #[test]
    fn test_extract_ip_xff_priority_over_real_ip() {
        let req = Request::builder()
            .header("x-forwarded-for", "10.0.0.1")
            .header("x-real-ip", "192.168.1.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(forwarded_client_ip(req.headers()), "10.0.0.1");
    }

    #[test]
    fn test_empty_xff_falls_through_to_real_ip() {
        let req = Request::builder()
            .header("x-forwarded-for", "   ")
            .header("x-real-ip", "192.168.1.9")
            .body(Body::empty())
            .unwrap();

        assert_eq!(forwarded_client_ip(req.headers()), "192.168.1.9");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let req = Request::builder().body(Body::empty()).unwrap();

        let ip = forwarded_client_ip(req.headers());
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_extract_ip_xff_with_ipv6() {
        let req = Request::builder()
            .header("x-forwarded-for", "2001:db8::1, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(forwarded_client_ip(req.headers()), "2001:db8::1");
    }

    #[test]
    fn test_peer_address_wins_over_spoofed_header() {
        let req = Request::builder()
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::empty())
            .unwrap();
        let req = with_peer(req, "203.0.113.7:51000");

        let ip = resolve_client_ip(&req, &TrustedProxyConfig::default());
        assert_eq!(ip, "203.0.113.7");
    }

    #[test]
    fn test_trusted_proxy_peer_uses_forwarded_header() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let req = Request::builder()
            .header("x-forwarded-for", "198.51.100.4, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        let req = with_peer(req, "10.1.2.3:40000");

        assert_eq!(resolve_client_ip(&req, &trusted), "198.51.100.4");
    }

    #[test]
    fn test_trusted_proxy_without_header_uses_peer() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let req = with_peer(Request::builder().body(Body::empty()).unwrap(), "10.1.2.3:40000");

        assert_eq!(resolve_client_ip(&req, &trusted), "10.1.2.3");
    }

    #[test]
    fn test_untrusted_peer_ignores_header() {
        let trusted = TrustedProxyConfig::new(&["10.0.0.0/8".to_string()]);
        let req = Request::builder()
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::empty())
            .unwrap();
        let req = with_peer(req, "192.0.2.10:40000");

        assert_eq!(resolve_client_ip(&req, &trusted), "192.0.2.10");
    }

    #[test]
    fn test_no_peer_falls_back_to_headers_then_unknown() {
        let trusted = TrustedProxyConfig::default();

        let req = Request::builder()
            .header("x-real-ip", "::1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(resolve_client_ip(&req, &trusted), "::1");

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(resolve_client_ip(&req, &trusted), UNKNOWN_IP);
    }

    #[test]
    fn test_client_key_prefers_principal() {
        let mut req = with_peer(Request::builder().body(Body::empty()).unwrap(), "192.0.2.1:1");
        req.extensions_mut().insert(Principal::new("user-42"));

        assert_eq!(
            client_key(&req, &TrustedProxyConfig::default()),
            "user:user-42"
        );
    }

    #[test]
    fn test_client_key_falls_back_to_ip() {
        let req = with_peer(Request::builder().body(Body::empty()).unwrap(), "192.0.2.1:1");
        assert_eq!(client_key(&req, &TrustedProxyConfig::default()), "192.0.2.1");
    }
}

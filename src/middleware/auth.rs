//! Bearer token authentication middleware.
//!
//! # Behaviour
//!
//! - Routes whose [`RouteEntry`](crate::route_table::RouteEntry) has
//!   `auth_required = false` (health, public services, unmatched paths) pass
//!   through untouched and never carry a [`Principal`].
//! - Protected routes need `Authorization: Bearer <jwt>`. A valid token puts
//!   the [`Principal`] into request extensions; anything else is answered with
//!   401 and the request never reaches the proxy.
//!
//! # Brute Force Protection
//!
//! Failed validations are counted per client IP (10 per minute, burst 5).
//! Once an IP exhausts that budget it is answered with 429 before its token
//! is even looked at, until the governor quota frees up again.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use super::ip::resolve_client_ip;
use super::rate_limit::TrustedProxyConfig;
use crate::error::{AuthRejection, GatewayError};
use crate::metrics;
use crate::route_table::RouteTable;
use crate::services::auth::{AuthValidator, bearer_token};

/// Default maximum auth failures per IP per minute before blocking.
const DEFAULT_AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Default burst capacity for auth failure rate limiting.
const DEFAULT_AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Type alias for auth failure rate limiter (per-IP).
type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Per-IP tracker of failed authentication attempts.
pub struct AuthFailureGuard {
    limiter: AuthFailureLimiter,
    blocked_until: DashMap<String, Instant>,
}

impl Default for AuthFailureGuard {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_FAILURE_LIMIT, DEFAULT_AUTH_FAILURE_BURST)
    }
}

impl AuthFailureGuard {
    pub fn new(per_minute: NonZeroU32, burst: NonZeroU32) -> Self {
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota),
            blocked_until: DashMap::new(),
        }
    }

    /// Seconds left on an active block for `client_ip`, if any.
    pub fn blocked_for(&self, client_ip: &str) -> Option<u64> {
        let now = Instant::now();
        let until = *self.blocked_until.get(client_ip)?;
        if until > now {
            Some(until.duration_since(now).as_secs().max(1))
        } else {
            self.blocked_until.remove(client_ip);
            None
        }
    }

    /// Count one failure. Returns the block length in seconds once the
    /// budget is exhausted.
    pub fn record_failure(&self, client_ip: &str) -> Option<u64> {
        match self.limiter.check_key(&client_ip.to_string()) {
            Ok(()) => None,
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                let wait = wait.max(Duration::from_secs(1));
                self.blocked_until
                    .insert(client_ip.to_string(), Instant::now() + wait);
                Some(wait.as_secs().max(1))
            }
        }
    }

    /// Drop expired blocks and idle limiter state.
    pub fn purge(&self) {
        let now = Instant::now();
        self.blocked_until.retain(|_, until| *until > now);
        self.limiter.retain_recent();
    }
}

/// JWT authentication layer.
#[derive(Clone)]
pub struct JwtAuthLayer {
    validator: Arc<AuthValidator>,
    routes: Arc<RouteTable>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    failures: Arc<AuthFailureGuard>,
}

impl JwtAuthLayer {
    pub fn new(
        validator: Arc<AuthValidator>,
        routes: Arc<RouteTable>,
        trusted_proxies: Arc<TrustedProxyConfig>,
        failures: Arc<AuthFailureGuard>,
    ) -> Self {
        Self {
            validator,
            routes,
            trusted_proxies,
            failures,
        }
    }
}

impl<S> Layer<S> for JwtAuthLayer {
    type Service = JwtAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JwtAuthService {
            inner,
            validator: self.validator.clone(),
            routes: self.routes.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
            failures: self.failures.clone(),
        }
    }
}

/// JWT authentication service wrapper.
#[derive(Clone)]
pub struct JwtAuthService<S> {
    inner: S,
    validator: Arc<AuthValidator>,
    routes: Arc<RouteTable>,
    trusted_proxies: Arc<TrustedProxyConfig>,
    failures: Arc<AuthFailureGuard>,
}

impl<S> Service<Request<Body>> for JwtAuthService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if !self.routes.auth_required(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let validator = self.validator.clone();
        let failures = self.failures.clone();
        let client_ip = resolve_client_ip(&req, &self.trusted_proxies).into_owned();

        Box::pin(async move {
            if let Some(retry_after_secs) = failures.blocked_for(&client_ip) {
                error!(
                    client_ip = %client_ip,
                    retry_after_secs,
                    "IP blocked due to excessive auth failures"
                );
                return Ok(GatewayError::RateLimited { retry_after_secs }.into_response());
            }

            let token = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token);

            let outcome = match token {
                Some(token) => validator.validate(token),
                None => Err(AuthRejection::Malformed),
            };

            match outcome {
                Ok(principal) => {
                    debug!(subject = %principal.subject_id, "Bearer token accepted");
                    req.extensions_mut().insert(principal);
                    inner.call(req).await
                }
                Err(reason) => {
                    metrics::record_auth_failure(reason.as_str());
                    warn!(
                        path = %req.uri().path(),
                        client_ip = %client_ip,
                        reason = %reason,
                        "Authentication rejected"
                    );

                    if let Some(retry_after_secs) = failures.record_failure(&client_ip) {
                        return Ok(GatewayError::RateLimited { retry_after_secs }.into_response());
                    }
                    Ok(GatewayError::AuthRejected(reason).into_response())
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use axum::routing::any;
    use tower::ServiceExt;

    use crate::models::Principal;
    use crate::registry::ServiceRegistry;

    const SECRET: &str = "middleware-secret";

    fn app() -> (Router, Arc<AuthValidator>) {
        let validator = Arc::new(AuthValidator::new(SECRET, Duration::from_secs(60)));
        let registry = ServiceRegistry::from_entries([
            ("auth", "http://auth"),
            ("expense", "http://expense"),
        ])
        .unwrap();
        let routes = Arc::new(RouteTable::new(&registry, &["auth".to_string()]));

        let router = Router::new()
            .route("/api/health", any(|| async { "ok" }))
            .route(
                "/api/{service}/{*rest}",
                any(|principal: Option<Extension<Principal>>| async move {
                    principal.map_or_else(|| "anonymous".to_string(), |p| p.0.subject_id)
                }),
            )
            .layer(JwtAuthLayer::new(
                validator.clone(),
                routes,
                Arc::new(TrustedProxyConfig::default()),
                Arc::new(AuthFailureGuard::default()),
            ));

        (router, validator)
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_needs_no_token() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_public_route_is_anonymous() {
        let (app, validator) = app();
        let token = validator.issue(&Principal::new("user-1")).unwrap();

        let response = app
            .oneshot(
                Request::post("/api/auth/login")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_protected_route_without_token_is_401() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/api/expense/items").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get("www-authenticate").unwrap(), "Bearer");
    }

    #[tokio::test]
    async fn test_protected_route_with_token_attaches_principal() {
        let (app, validator) = app();
        let token = validator.issue(&Principal::new("user-7")).unwrap();

        let response = app
            .oneshot(
                Request::get("/api/expense/items")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "user-7");
    }

    #[tokio::test]
    async fn test_foreign_token_rejected() {
        let (app, _) = app();
        let foreign = AuthValidator::new("other", Duration::from_secs(60))
            .issue(&Principal::new("user-1"))
            .unwrap();

        let response = app
            .oneshot(
                Request::get("/api/expense/items")
                    .header("authorization", format!("Bearer {foreign}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(response).await.contains("invalid-signature"));
    }

    #[tokio::test]
    async fn test_repeated_failures_are_throttled() {
        let (app, _) = app();
        let mut statuses = Vec::new();
        for _ in 0..8 {
            let response = app
                .clone()
                .oneshot(
                    Request::get("/api/expense/items")
                        .header("x-forwarded-for", "198.51.100.9")
                        .header("authorization", "Bearer garbage")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            statuses.push(response.status());
        }

        assert_eq!(statuses.first(), Some(&StatusCode::UNAUTHORIZED));
        assert_eq!(statuses.last(), Some(&StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn test_failure_guard_blocks_after_burst() {
        let guard = AuthFailureGuard::new(NonZeroU32::new(1).unwrap(), NonZeroU32::new(2).unwrap());

        assert!(guard.record_failure("ip").is_none());
        assert!(guard.record_failure("ip").is_none());
        assert!(guard.record_failure("ip").is_some());
        assert!(guard.blocked_for("ip").is_some());
        assert!(guard.blocked_for("other-ip").is_none());
    }
}

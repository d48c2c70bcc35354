//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (request order)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP span per request
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← X-Request-Id on the response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Preflight answered here
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Security Headers │ ← nosniff, frame options, HSTS in production
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 if invalid (bypassed for health and public services)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (bypassed for health)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Request Timeout  │ ← X-Request-Timeout
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/api/health`, `/health`, `/health/liveness`, `/health/readiness`
//! - `/api/{service}/...` - forwarded to the backend registered as `service`
//! - anything else - JSON 404

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderValue, Method, Request};
use axum::routing::{any, get};
use tower_http::cors::{AllowHeaders, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{AppResult, GatewayError};
use crate::handlers;
use crate::middleware::{
    JwtAuthLayer, RateLimitLayer, RequestIdLayer, SecurityHeadersLayer, client_timeout,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Errors
///
/// `ConfigError` if a CORS origin is not a valid header value.
pub fn build_router(state: AppState) -> AppResult<Router> {
    let config = &state.config;
    let cors = build_cors_layer(&config.cors_allowed_origins)?;

    let mut router = Router::new()
        // Health (always accessible)
        .route("/api/health", any(handlers::api_health))
        .route("/health", get(handlers::health))
        .route("/health/liveness", get(handlers::liveness))
        .route("/health/readiness", get(handlers::readiness))
        // Backend services
        .route("/api/{service}", any(handlers::proxy))
        .route("/api/{service}/", any(handlers::proxy))
        .route("/api/{service}/{*rest}", any(handlers::proxy))
        .fallback(handlers::not_found);

    // =========================================================================
    // Apply Middleware Stack (order matters - applied bottom to top)
    // =========================================================================

    // 1. Client timeout header
    router = router.layer(axum::middleware::from_fn(client_timeout));

    // 2. Rate limiting (if enabled)
    match &state.limiter {
        Some(limiter) => {
            info!(
                classes = config.rate_limit_classes.len(),
                trusted_proxies = state.trusted_proxies.is_enabled(),
                "Rate limiting enabled"
            );
            router = router.layer(RateLimitLayer::new(
                limiter.clone(),
                state.trusted_proxies.clone(),
            ));
        }
        None => info!("Rate limiting disabled (RATE_LIMIT_ENABLED=false)"),
    }

    // 3. Authentication
    router = router.layer(JwtAuthLayer::new(
        state.validator.clone(),
        state.routes.clone(),
        state.trusted_proxies.clone(),
        state.auth_failures.clone(),
    ));

    // 4. Security headers
    router = router.layer(SecurityHeadersLayer::new(config.is_production()));

    // 5. CORS
    router = router.layer(cors);

    // 6. Request ID
    router = router.layer(RequestIdLayer::new());

    // 7. Tracing (outermost, so the request id lands on its span)
    router = router.layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
        tracing::info_span!(
            "http_request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = tracing::field::Empty,
        )
    }));

    Ok(router.with_state(state))
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin without credentials. Explicit origins are matched
/// exactly, allow credentials and mirror the requested headers.
fn build_cors_layer(allowed_origins: &[String]) -> AppResult<CorsLayer> {
    if allowed_origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }

    let origins = allowed_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|_| GatewayError::ConfigError(format!("Invalid CORS origin: {o}")))
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn app(config: Config) -> Router {
        build_router(AppState::new(config).unwrap()).unwrap()
    }

    #[test]
    fn test_build_cors_layer_any() {
        assert!(build_cors_layer(&["*".to_string()]).is_ok());
    }

    #[test]
    fn test_build_cors_layer_specific() {
        let origins = vec![
            "https://example.com".to_string(),
            "https://app.example.com".to_string(),
        ];
        assert!(build_cors_layer(&origins).is_ok());
    }

    #[test]
    fn test_build_cors_layer_rejects_invalid_origin() {
        assert!(build_cors_layer(&["https://bad\norigin".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_api_health_lists_configured_services() {
        let app = app(Config::default().with_service("expense", "http://127.0.0.1:1"));

        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["services"], serde_json::json!(["expense"]));
    }

    #[tokio::test]
    async fn test_unknown_path_is_json_404() {
        let app = app(Config::default());

        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "not_found");
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let app = app(Config::default().with_service("expense", "http://127.0.0.1:1"));

        let response = app
            .oneshot(Request::get("/api/expense/items").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
    }

    #[tokio::test]
    async fn test_trailing_slash_reaches_proxy() {
        let state = AppState::new(Config::default().with_service("expense", "http://127.0.0.1:1"))
            .unwrap();
        let token = state
            .validator
            .issue(&crate::models::Principal::new("user-1"))
            .unwrap();
        let app = build_router(state).unwrap();

        let response = app
            .oneshot(
                Request::get("/api/expense/")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // Forwarded to the (unreachable) backend rather than the 404 fallback
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_liveness_is_public() {
        let app = app(Config::default());

        let response = app
            .oneshot(Request::get("/health/liveness").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}

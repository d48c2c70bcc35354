use axum::http::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Reason a bearer token was rejected.
///
/// Callers learn that the token is unusable and roughly why, never which
/// key or claim failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthRejection {
    /// Token signature verified but `exp` is in the past.
    Expired,
    /// Missing header, wrong scheme, undecodable token or missing claims.
    Malformed,
    /// Token was not signed with the configured secret.
    InvalidSignature,
}

impl AuthRejection {
    /// Stable label used in logs, metrics and response bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthRejection::Expired => "expired",
            AuthRejection::Malformed => "malformed",
            AuthRejection::InvalidSignature => "invalid-signature",
        }
    }
}

impl std::fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway-wide error types with appropriate HTTP status codes.
///
/// # Backend Errors
///
/// Every failure to reach a backend (refused connection, timeout, protocol
/// error) collapses into [`GatewayError::BackendUnavailable`] so callers see
/// one uniform 503. The underlying detail is always logged; it is echoed to
/// the caller only when `expose_detail` is set (non-production environments).
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Authentication rejected: {0}")]
    AuthRejected(AuthRejection),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Service '{0}' not found or not configured")]
    ServiceNotConfigured(String),

    #[error("Backend '{service}' unavailable: {detail}")]
    BackendUnavailable {
        service: String,
        detail: String,
        expose_detail: bool,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type, message, details) = match &self {
            GatewayError::AuthRejected(reason) => {
                tracing::debug!(reason = %reason, "Request rejected by auth");
                (
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "Invalid or missing bearer token".to_string(),
                    Some(reason.as_str().to_string()),
                )
            }
            GatewayError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                "Too many requests, please try again later".to_string(),
                None,
            ),
            GatewayError::ServiceNotConfigured(name) => (
                StatusCode::NOT_FOUND,
                "service_not_configured",
                format!("Service '{name}' not found or not configured"),
                None,
            ),
            GatewayError::BackendUnavailable {
                service,
                detail,
                expose_detail,
            } => {
                // Full detail stays server-side; topology leaks only outside production
                tracing::error!(service = %service, error = %detail, "Proxy error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "Service temporarily unavailable".to_string(),
                    expose_detail.then(|| detail.clone()),
                )
            }
            GatewayError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "not_found", msg.clone(), None)
            }
            GatewayError::ConfigError(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "config_error",
                    "Service configuration error. Please contact support.".to_string(),
                    None,
                )
            }
            GatewayError::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred. Please contact support if the issue persists."
                        .to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        };

        let mut response = (status, axum::Json(body)).into_response();

        match &self {
            GatewayError::AuthRejected(_) => {
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            GatewayError::RateLimited { retry_after_secs } => {
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            _ => {}
        }

        response
    }
}

/// Convenience type alias for Results with GatewayError.
pub type AppResult<T> = Result<T, GatewayError>;

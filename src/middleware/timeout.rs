//! Client-specified forward timeout.
//!
//! `X-Request-Timeout: <ms>` lets a caller say how long it is willing to wait
//! for a backend. The gateway only ever shortens its own forward timeout with
//! it; a value above `PROXY_TIMEOUT_SECS` changes nothing.
//!
//! ```text
//! X-Request-Timeout: 5000
//! ```
//!
//! Values that are not a plain integer, or fall outside
//! `MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS`, are ignored.

use std::ops::RangeInclusive;
use std::time::Duration;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;

pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

const ALLOWED_MS: RangeInclusive<u64> = MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS;

/// Why an `X-Request-Timeout` value was ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutHeaderError {
    #[error("not a whole number of milliseconds")]
    NotANumber,
    #[error("{0}ms is outside 100..=300000ms")]
    OutOfRange(u64),
}

/// Accepted client deadline, stored in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeout(pub Duration);

impl TryFrom<&HeaderValue> for ClientTimeout {
    type Error = TimeoutHeaderError;

    fn try_from(value: &HeaderValue) -> Result<Self, Self::Error> {
        let ms = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or(TimeoutHeaderError::NotANumber)?;

        if ALLOWED_MS.contains(&ms) {
            Ok(Self(Duration::from_millis(ms)))
        } else {
            Err(TimeoutHeaderError::OutOfRange(ms))
        }
    }
}

/// Record a valid `X-Request-Timeout` as a [`ClientTimeout`] extension.
pub async fn client_timeout(mut request: Request, next: Next) -> Response {
    if let Some(value) = request.headers().get(REQUEST_TIMEOUT_HEADER) {
        match ClientTimeout::try_from(value) {
            Ok(timeout) => {
                debug!(timeout_ms = timeout.0.as_millis() as u64, "Client timeout accepted");
                request.extensions_mut().insert(timeout);
            }
            Err(reason) => debug!(%reason, "X-Request-Timeout ignored"),
        }
    }

    next.run(request).await
}

pub trait RequestTimeoutExt {
    /// The client deadline capped at `default`, or `default`.
    fn effective_timeout(&self, default: Duration) -> Duration;
}

impl<B> RequestTimeoutExt for axum::http::Request<B> {
    fn effective_timeout(&self, default: Duration) -> Duration {
        self.extensions()
            .get::<ClientTimeout>()
            .map_or(default, |t| t.0.min(default))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use tower::ServiceExt;

    fn parse(raw: &'static str) -> Result<ClientTimeout, TimeoutHeaderError> {
        ClientTimeout::try_from(&HeaderValue::from_static(raw))
    }

    #[test]
    fn test_parse_accepts_bounds() {
        assert_eq!(parse("100"), Ok(ClientTimeout(Duration::from_millis(100))));
        assert_eq!(parse(" 2500 "), Ok(ClientTimeout(Duration::from_millis(2500))));
        assert_eq!(parse("300000"), Ok(ClientTimeout(Duration::from_secs(300))));
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert_eq!(parse("0"), Err(TimeoutHeaderError::OutOfRange(0)));
        assert_eq!(parse("99"), Err(TimeoutHeaderError::OutOfRange(99)));
        assert_eq!(parse("300001"), Err(TimeoutHeaderError::OutOfRange(300_001)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for raw in ["", "5s", "-100", "1.5"] {
            assert_eq!(parse(raw), Err(TimeoutHeaderError::NotANumber), "{raw:?}");
        }
    }

    #[test]
    fn test_effective_timeout_only_shortens() {
        let default = Duration::from_secs(30);
        let mut req = axum::http::Request::new(());
        assert_eq!(req.effective_timeout(default), default);

        req.extensions_mut().insert(ClientTimeout(Duration::from_secs(2)));
        assert_eq!(req.effective_timeout(default), Duration::from_secs(2));

        req.extensions_mut().insert(ClientTimeout(Duration::from_secs(120)));
        assert_eq!(req.effective_timeout(default), default);
    }

    async fn seen_timeout(header: Option<&'static str>) -> String {
        let app = Router::new()
            .route(
                "/",
                get(|req: Request| async move {
                    format!("{:?}", req.extensions().get::<ClientTimeout>().map(|t| t.0))
                }),
            )
            .layer(axum::middleware::from_fn(client_timeout));

        let mut builder = axum::http::Request::get("/");
        if let Some(value) = header {
            builder = builder.header(REQUEST_TIMEOUT_HEADER, value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_middleware_records_valid_header_only() {
        assert_eq!(seen_timeout(Some("1500")).await, "Some(1.5s)");
        assert_eq!(seen_timeout(Some("50")).await, "None");
        assert_eq!(seen_timeout(Some("soon")).await, "None");
        assert_eq!(seen_timeout(None).await, "None");
    }
}

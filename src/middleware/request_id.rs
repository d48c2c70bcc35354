//! Request ID middleware for log correlation.
//!
//! # Features
//!
//! - Reuses an inbound `X-Request-Id` header when present
//! - Generates a UUIDv4 otherwise
//! - Adds `X-Request-Id` to every response that does not already carry one
//! - Records the ID on the current tracing span
//!
//! # Forwarding
//!
//! Only an ID supplied by the client is forwarded to backends (it stays in
//! the request headers untouched). A generated ID lives in request extensions
//! as [`RequestId`] and is echoed on the response, but is never injected into
//! the backend request.
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:3000/api/expense/items
//! ```

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Span, debug};
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Fallback header value when request ID parsing fails.
/// Using `from_static` avoids runtime parsing and is infallible.
static UNKNOWN_REQUEST_ID: HeaderValue = HeaderValue::from_static("unknown");

/// Request ID attached to request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId {
    pub id: String,
    /// `true` when the gateway minted the ID itself.
    pub generated: bool,
}

/// Request ID layer for Tower middleware stack.
#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    /// Create a new request ID layer.
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Request ID service wrapper.
#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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
        let RequestId { id: request_id, generated } = extract_or_generate_request_id(&req);

        req.extensions_mut().insert(RequestId {
            id: request_id.clone(),
            generated,
        });

        // Record in current span
        Span::current().record("request_id", &request_id);
        debug!(request_id = %request_id, generated, "Processing request");

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;

            // A backend's own id wins on proxied responses
            response
                .headers_mut()
                .entry(REQUEST_ID_HEADER)
                .or_insert_with(|| {
                    request_id
                        .parse()
                        .unwrap_or_else(|_| UNKNOWN_REQUEST_ID.clone())
                });

            Ok(response)
        })
    }
}

/// Extract request ID from headers or generate a new one.
fn extract_or_generate_request_id<B>(req: &Request<B>) -> RequestId {
    if let Some(header_value) = req.headers().get(REQUEST_ID_HEADER)
        && let Ok(value) = header_value.to_str()
        && !value.is_empty()
    {
        return RequestId {
            id: value.to_string(),
            generated: false,
        };
    }

    RequestId {
        id: Uuid::new_v4().to_string(),
        generated: true,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_existing_request_id() {
        let req = Request::builder()
            .header("x-request-id", "existing-id-123")
            .body(Body::empty())
            .unwrap();

        let extracted = extract_or_generate_request_id(&req);
        assert_eq!(extracted.id, "existing-id-123");
        assert!(!extracted.generated);
    }

    #[test]
    fn test_generate_new_request_id() {
        let req = Request::builder().body(Body::empty()).unwrap();

        let extracted = extract_or_generate_request_id(&req);

        assert!(Uuid::parse_str(&extracted.id).is_ok());
        assert!(extracted.generated);
    }

    #[tokio::test]
    async fn test_generated_id_not_written_to_request_headers() {
        use axum::Router;
        use axum::routing::get;
        use tower::ServiceExt;

        let app = Router::new()
            .route(
                "/",
                get(|req: Request<Body>| async move {
                    let in_headers = req.headers().contains_key(REQUEST_ID_HEADER);
                    let in_extensions = req.extensions().get::<RequestId>().is_some();
                    format!("{in_headers}/{in_extensions}")
                }),
            )
            .layer(RequestIdLayer::new());

        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"false/true");
    }

    #[tokio::test]
    async fn test_inbound_id_echoed() {
        use axum::Router;
        use axum::routing::get;
        use tower::ServiceExt;

        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(RequestIdLayer::new());

        let response = app
            .oneshot(
                Request::get("/")
                    .header(REQUEST_ID_HEADER, "client-id-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "client-id-1");
    }

    #[tokio::test]
    async fn test_response_id_from_inner_service_kept() {
        use axum::Router;
        use axum::routing::get;
        use tower::ServiceExt;

        let app = Router::new()
            .route("/", get(|| async { ([(REQUEST_ID_HEADER, "backend-id")], "ok") }))
            .layer(RequestIdLayer::new());

        let response = app
            .oneshot(
                Request::get("/")
                    .header(REQUEST_ID_HEADER, "client-id-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "backend-id");
    }
}

//! Streaming reverse proxy to backend services.
//!
//! # Resolution
//!
//! The first path segment after `/api` names the logical service; the
//! `/api/<service>` prefix is stripped and the remainder (or `/`) is appended
//! to the service's base URL. The query string is carried over verbatim.
//!
//! ```text
//! /api/expense/items?page=2  ->  http://expense:3001/items?page=2
//! ```
//!
//! # Headers
//!
//! - Hop-by-hop headers and `Host` are dropped in both directions
//! - Inbound `X-User-*` headers are always dropped; `X-User-ID`,
//!   `X-User-Email` and `X-User-Roles` are set from the [`Principal`] only
//! - `X-Request-ID` passes through when the client sent it
//! - `X-Forwarded-For` is set from the client IP when absent
//! - Responses gain `X-Proxied-By`
//!
//! # Bodies
//!
//! Request and response bodies are streamed, never buffered. A body is only
//! attached upstream when the inbound request announces one.
//!
//! # Failures
//!
//! Connection errors, timeouts and protocol errors all become
//! [`GatewayError::BackendUnavailable`]. No retries. Once headers are sent, a
//! backend body that fails or goes quiet for longer than the forward timeout
//! aborts the client response.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use reqwest::Url;
use futures::{Stream, StreamExt, stream};
use reqwest::redirect::Policy;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{AppResult, GatewayError};
use crate::metrics;
use crate::models::Principal;
use crate::registry::ServiceRegistry;
use crate::route_table::split_service_path;

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_EMAIL: &str = "x-user-email";
pub const X_USER_ROLES: &str = "x-user-roles";
pub const X_PROXIED_BY: &str = "x-proxied-by";

const X_USER_PREFIX: &str = "x-user-";

/// Resolved destination of one proxied call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub service: String,
    /// Path sent to the backend, without query.
    pub rewritten_path: String,
    pub url: Url,
}

/// Target URL for `rest` under `base`. `rest` never climbs above the base
/// path: `.` and `..` segments, plain or percent-encoded, are refused.
fn join_base(
    service: &str,
    base: &Url,
    rest: &str,
    query: Option<&str>,
) -> AppResult<ForwardTarget> {
    if rest.split(['/', '\\']).any(is_dot_segment) {
        return Err(GatewayError::NotFound(format!(
            "Path segment not allowed in /api/{service}{rest}"
        )));
    }

    let rewritten_path = if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    };

    let mut url = base.clone();
    let joined = format!("{}{}", base.path().trim_end_matches('/'), rewritten_path);
    url.set_path(&joined);
    url.set_query(query);

    Ok(ForwardTarget {
        service: service.to_string(),
        rewritten_path,
        url,
    })
}

fn is_dot_segment(segment: &str) -> bool {
    matches!(
        segment.to_ascii_lowercase().as_str(),
        "." | ".." | "%2e" | "%2e%2e" | ".%2e" | "%2e."
    )
}

/// Forwards requests to the backend named by the path.
#[derive(Debug, Clone)]
pub struct ProxyRouter {
    registry: Arc<ServiceRegistry>,
    client: reqwest::Client,
    timeout: Duration,
    proxied_by: HeaderValue,
    expose_errors: bool,
}

impl ProxyRouter {
    /// Build the shared forwarding client.
    ///
    /// # Errors
    ///
    /// `ConfigError` if the HTTP client cannot be built or `PROXIED_BY` is not
    /// a valid header value.
    pub fn new(registry: Arc<ServiceRegistry>, config: &Config) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.proxy_connect_timeout)
            .read_timeout(config.proxy_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(Policy::none())
            .build()
            .map_err(|e| GatewayError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        let proxied_by = HeaderValue::from_str(&config.proxied_by).map_err(|e| {
            GatewayError::ConfigError(format!("Invalid PROXIED_BY value: {e}"))
        })?;

        Ok(Self {
            registry,
            client,
            timeout: config.proxy_timeout,
            proxied_by,
            expose_errors: !config.is_production(),
        })
    }

    /// Default forward timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve `path_and_query` (e.g. `/api/expense/foo?x=1`) to a target.
    ///
    /// # Errors
    ///
    /// `ServiceNotConfigured` for unknown or disabled services, `NotFound` for
    /// paths outside `/api/<service>` or containing dot segments.
    pub fn resolve(&self, path_and_query: &str) -> AppResult<ForwardTarget> {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let (service, rest) = split_service_path(path)
            .ok_or_else(|| GatewayError::NotFound(format!("No route for {path}")))?;

        let endpoint = self.registry.resolve(service)?;
        let base = endpoint
            .base_url
            .as_ref()
            .ok_or_else(|| GatewayError::ServiceNotConfigured(service.to_string()))?;

        join_base(&endpoint.name, base, rest, query)
    }

    /// Stream `req` to its backend and stream the response back.
    ///
    /// `client_ip` fills `X-Forwarded-For` when the client did not send one.
    #[instrument(skip(self, req, principal), fields(method = %req.method(), path = %req.uri().path()))]
    pub async fn forward(
        &self,
        req: Request<Body>,
        principal: Option<&Principal>,
        client_ip: Option<&str>,
        timeout: Duration,
    ) -> AppResult<Response<Body>> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map_or_else(|| req.uri().path().to_string(), |pq| pq.as_str().to_string());
        let target = self.resolve(&path_and_query)?;

        let (parts, body) = req.into_parts();
        let headers = upstream_headers(&parts.headers, principal, client_ip);

        let mut builder = self
            .client
            .request(parts.method.clone(), target.url.clone())
            .headers(headers);
        if has_body(&parts.headers) {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        debug!(service = %target.service, url = %target.url, "Forwarding request");
        let started = Instant::now();

        let upstream = match tokio::time::timeout(timeout, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let kind = if e.is_connect() {
                    "connect"
                } else if e.is_timeout() {
                    "timeout"
                } else {
                    "protocol"
                };
                return Err(self.unavailable(&target.service, kind, e.to_string()));
            }
            Err(_) => {
                return Err(self.unavailable(
                    &target.service,
                    "timeout",
                    format!("no response within {}ms", timeout.as_millis()),
                ));
            }
        };

        let status = upstream.status();
        metrics::record_proxy_request(
            &target.service,
            parts.method.as_str(),
            status.as_u16(),
            started.elapsed(),
        );
        debug!(service = %target.service, status = status.as_u16(), "Backend responded");

        let headers = response_headers(upstream.headers(), &self.proxied_by);
        let body = idle_bounded(upstream.bytes_stream(), timeout, target.service.clone());
        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(response)
    }

    fn unavailable(&self, service: &str, kind: &str, detail: String) -> GatewayError {
        metrics::record_backend_error(service, kind);
        GatewayError::BackendUnavailable {
            service: service.to_string(),
            detail,
            expose_detail: self.expose_errors,
        }
    }
}

/// End the stream with an error when no chunk arrives within `idle`.
///
/// A stalled or failed backend body aborts the client response instead of
/// holding the connection open.
fn idle_bounded<S, T, E>(
    stream: S,
    idle: Duration,
    service: String,
) -> impl Stream<Item = io::Result<T>> + Send + 'static
where
    S: Stream<Item = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
{
    stream::unfold(Some(Box::pin(stream)), move |state| {
        let service = service.clone();
        async move {
            let mut upstream = state?;
            match tokio::time::timeout(idle, upstream.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(upstream))),
                Ok(Some(Err(e))) => {
                    metrics::record_backend_error(&service, "body");
                    Some((Err(io::Error::other(e)), None))
                }
                Ok(None) => None,
                Err(_) => {
                    warn!(
                        service = %service,
                        idle_ms = idle.as_millis() as u64,
                        "Backend body stalled"
                    );
                    metrics::record_backend_error(&service, "body_timeout");
                    Some((
                        Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no body data from {service} within {}ms", idle.as_millis()),
                        )),
                        None,
                    ))
                }
            }
        }
    })
}

/// Whether the inbound request carries a body worth streaming.
fn has_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

/// Hop-by-hop headers (RFC 9110 section 7.6.1) plus those named in `Connection`.
fn is_hop_by_hop(name: &HeaderName, connection_tokens: &[String]) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    ) || connection_tokens.iter().any(|t| t == name.as_str())
}

fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Build the header set sent to the backend.
pub fn upstream_headers(
    inbound: &HeaderMap,
    principal: Option<&Principal>,
    client_ip: Option<&str>,
) -> HeaderMap {
    let tokens = connection_tokens(inbound);
    let mut headers = HeaderMap::with_capacity(inbound.len() + 4);

    for (name, value) in inbound {
        if *name == HOST
            || is_hop_by_hop(name, &tokens)
            || name.as_str().starts_with(X_USER_PREFIX)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(principal) = principal {
        if let Ok(value) = HeaderValue::from_str(&principal.subject_id) {
            headers.insert(X_USER_ID, value);
        }
        if !principal.email.is_empty()
            && let Ok(value) = HeaderValue::from_str(&principal.email)
        {
            headers.insert(X_USER_EMAIL, value);
        }
        if let Ok(value) = HeaderValue::from_str(&principal.roles_json()) {
            headers.insert(X_USER_ROLES, value);
        }
    }

    if !headers.contains_key(crate::middleware::ip::X_FORWARDED_FOR)
        && let Some(ip) = client_ip
        && let Ok(value) = HeaderValue::from_str(ip)
    {
        headers.insert(crate::middleware::ip::X_FORWARDED_FOR, value);
    }

    headers
}

/// Filter backend response headers and stamp `X-Proxied-By`.
pub fn response_headers(upstream: &HeaderMap, proxied_by: &HeaderValue) -> HeaderMap {
    let tokens = connection_tokens(upstream);
    let mut headers = HeaderMap::with_capacity(upstream.len() + 1);

    for (name, value) in upstream {
        if is_hop_by_hop(name, &tokens) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(X_PROXIED_BY, proxied_by.clone());

    headers
}

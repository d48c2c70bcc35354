//! Catch-all handler that forwards `/api/<service>/...` to the backend.

use axum::extract::{Request, State};
use axum::response::Response;
use tracing::instrument;

use crate::error::{AppResult, GatewayError};
use crate::middleware::RequestTimeoutExt;
use crate::middleware::ip::resolve_client_ip;
use crate::models::Principal;
use crate::state::AppState;

/// Forward the request. Auth and rate limiting have already run.
#[instrument(skip_all, fields(path = %req.uri().path()))]
pub async fn proxy(State(state): State<AppState>, req: Request) -> AppResult<Response> {
    let principal = req.extensions().get::<Principal>().cloned();
    let client_ip = resolve_client_ip(&req, &state.trusted_proxies);
    let timeout = req.effective_timeout(state.proxy.timeout());

    state
        .proxy
        .forward(req, principal.as_ref(), Some(client_ip.as_ref()), timeout)
        .await
}

/// JSON 404 for anything outside the known routes.
pub async fn not_found(req: Request) -> GatewayError {
    GatewayError::NotFound(format!("No route for {} {}", req.method(), req.uri().path()))
}

//! Health, liveness and readiness endpoints.
//!
//! # Endpoints
//!
//! - `ANY /api/health` - Gateway banner with the enabled backends
//! - `GET /health` - Full report (local resources + every backend)
//! - `GET /health/liveness` - Process is running
//! - `GET /health/readiness` - Primary datastore reachable
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Returns 200 even if degraded, includes details
//! - **Readiness** (`/health/readiness`): Returns 503 if not ready to serve traffic
//!
//! None of these endpoints require authentication or count against rate limits.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::{
    ApiHealthResponse, HealthReport, HealthStatus, LivenessResponse, ReadinessResponse,
};
use crate::services::health::readiness_status;
use crate::state::AppState;

/// Gateway banner.
///
/// ```json
/// { "status": "ok", "timestamp": "2024-01-15T10:30:00Z", "services": ["auth", "expense"] }
/// ```
pub async fn api_health(State(state): State<AppState>) -> Json<ApiHealthResponse> {
    Json(ApiHealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        services: state
            .registry
            .configured_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

/// Full health report. Always 200; the body carries the overall status.
#[instrument(skip(state))]
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health.check().await)
}

/// Liveness probe for Kubernetes.
pub async fn liveness(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
    })
}

/// Readiness probe for Kubernetes.
///
/// ```yaml
/// readinessProbe:
///   httpGet:
///     path: /health/readiness
///     port: 3000
///   periodSeconds: 10
/// ```
#[instrument(skip(state))]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let dependency = state.health.readiness().await;
    let status = readiness_status(&dependency);
    let code = if status == HealthStatus::Up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadinessResponse {
            status,
            timestamp: Utc::now(),
            dependency,
        }),
    )
}

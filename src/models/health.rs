use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a single health entry or of the aggregate report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    Down,
    Degraded,
}

impl HealthStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }
}

/// Whether an entry describes a local resource or a backend probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Local,
    Service,
}

/// One checked component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEntry {
    pub component: String,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthEntry {
    pub fn up(component: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            component: component.into(),
            kind,
            status: HealthStatus::Up,
            message: None,
        }
    }

    pub fn down(component: impl Into<String>, kind: ComponentKind, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            kind,
            status: HealthStatus::Down,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Aggregated health of the gateway and its backends.
///
/// Recomputed on every call. Entries are ordered: local checks first, then
/// backends in registry order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub entries: Vec<HealthEntry>,
}

impl HealthReport {
    /// Build a report, deriving the overall status from the entries.
    ///
    /// `up` when every entry is up, `down` when any local check is down,
    /// `degraded` otherwise.
    pub fn from_entries(entries: Vec<HealthEntry>) -> Self {
        let status = if entries.iter().all(|e| e.status.is_up()) {
            HealthStatus::Up
        } else if entries
            .iter()
            .any(|e| e.kind == ComponentKind::Local && e.status == HealthStatus::Down)
        {
            HealthStatus::Down
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            timestamp: Utc::now(),
            entries,
        }
    }

    pub fn entry(&self, component: &str) -> Option<&HealthEntry> {
        self.entries.iter().find(|e| e.component == component)
    }
}

/// Body of `/api/health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiHealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Enabled backend names
    pub services: Vec<String>,
}

/// Body of `/health/liveness`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
}

/// Body of `/health/readiness`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub dependency: HealthEntry,
}

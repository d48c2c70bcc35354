mod health;
mod principal;

pub use health::{
    ApiHealthResponse, ComponentKind, HealthEntry, HealthReport, HealthStatus, LivenessResponse,
    ReadinessResponse,
};
pub use principal::Principal;

//! Gateway services: token validation, admission control, forwarding and
//! health aggregation. Middleware and handlers hold these behind `Arc`.

pub mod auth;
pub mod health;
pub mod proxy;
pub mod rate_limiter;

pub use auth::{AuthValidator, Claims, bearer_token};
pub use health::{HealthAggregator, ResourceSnapshot, ResourceThresholds};
pub use proxy::{ForwardTarget, ProxyRouter};
pub use rate_limiter::{Admission, FixedWindowLimiter, RouteClass};

mod health;
mod proxy;

pub use health::{api_health, health, liveness, readiness};
pub use proxy::{not_found, proxy};

//! # Blade Gateway
//!
//! The single public entry point in front of the blade microservices:
//!
//! - **Authentication**: HS256 bearer tokens, identity forwarded as `X-User-*` headers
//! - **Admission**: fixed-window rate limits per route class and client
//! - **Forwarding**: `/api/<service>/...` streamed to the registered backend
//! - **Health**: local resources and backend probes aggregated on `/health`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Request ID → CORS → Headers → Auth → Limit)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, proxy)                                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Services (AuthValidator, FixedWindowLimiter,               │
//! │            ProxyRouter, HealthAggregator)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ServiceRegistry / RouteTable (built once at startup)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blade_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state)?;
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! JWT_SECRET=change-me EXPENSE_SERVICE_URL=http://expense:8080 cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod registry;
pub mod route_table;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppResult, GatewayError};
pub use registry::ServiceRegistry;
pub use routes::build_router;
pub use state::AppState;

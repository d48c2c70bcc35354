//! Shared application state for Axum handlers and middleware.
//!
//! Everything here is built once at startup from [`Config`] and is read-only
//! afterwards, except for the rate-limit buckets and auth-failure counters
//! which use sharded interior mutability.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::AppResult;
use crate::middleware::{AuthFailureGuard, TrustedProxyConfig};
use crate::registry::ServiceRegistry;
use crate::route_table::RouteTable;
use crate::services::{AuthValidator, FixedWindowLimiter, HealthAggregator, ProxyRouter};

/// Shared application state.
///
/// Cloned for each request; all fields are `Arc` or cheap handles.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ServiceRegistry>,
    pub routes: Arc<RouteTable>,
    pub validator: Arc<AuthValidator>,
    /// `None` when rate limiting is disabled
    pub limiter: Option<Arc<FixedWindowLimiter>>,
    pub auth_failures: Arc<AuthFailureGuard>,
    pub proxy: Arc<ProxyRouter>,
    pub health: Arc<HealthAggregator>,
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build all gateway components from configuration.
    ///
    /// Must be called inside a Tokio runtime: it spawns the bucket purge task.
    ///
    /// # Errors
    ///
    /// `ConfigError` for an invalid registry, rate-limit classes or HTTP
    /// client settings.
    pub fn new(config: Config) -> AppResult<Self> {
        config.validate()?;

        let registry = Arc::new(ServiceRegistry::from_entries(
            config.service_urls.iter().map(|(n, u)| (n.as_str(), u.as_str())),
        )?);
        let routes = Arc::new(RouteTable::new(&registry, &config.public_services));
        let validator = Arc::new(AuthValidator::new(&config.jwt_secret, config.jwt_expiration));
        let limiter = if config.rate_limiting_enabled {
            Some(Arc::new(FixedWindowLimiter::new(&config.rate_limit_classes)?))
        } else {
            None
        };
        let proxy = Arc::new(ProxyRouter::new(registry.clone(), &config)?);
        let health = Arc::new(HealthAggregator::new(registry.clone(), &config)?);
        let trusted_proxies = Arc::new(TrustedProxyConfig::new(&config.trusted_proxies));

        info!(
            services = ?registry.configured_names(),
            public = ?config.public_services,
            "Service registry loaded"
        );

        let state = Self {
            config: Arc::new(config),
            registry,
            routes,
            validator,
            limiter,
            auth_failures: Arc::new(AuthFailureGuard::default()),
            proxy,
            health,
            trusted_proxies,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_purge_task();

        Ok(state)
    }

    /// Periodically drop expired rate-limit buckets and stale auth-failure
    /// entries so memory stays bounded by active clients.
    fn spawn_purge_task(&self) {
        let limiter = self.limiter.clone();
        let auth_failures = self.auth_failures.clone();
        let period = self.config.rate_limit_purge_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Purge task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let purged = limiter.as_ref().map_or(0, |l| l.purge_expired());
                        auth_failures.purge();
                        trace!(purged, "Expired rate-limit buckets purged");
                    }
                }
            }

            debug!("Purge task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

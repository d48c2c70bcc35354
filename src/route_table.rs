//! Path-based routing table.
//!
//! Maps an inbound path to either the health surface or a logical backend
//! service, and records per service whether a bearer token is required.
//! Both the auth middleware and the proxy handler consult the same table, so
//! "public vs protected" is decided in one place.

use std::collections::{HashMap, HashSet};

use crate::registry::ServiceRegistry;

/// Fixed prefix for proxied API routes.
pub const API_PREFIX: &str = "/api";

/// Gateway-local service discovery endpoint.
pub const API_HEALTH_PATH: &str = "/api/health";

/// Root of the full health surface (`/health`, `/health/liveness`, ...).
pub const HEALTH_PATH: &str = "/health";

/// Routing decision for one logical service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub service: String,
    pub auth_required: bool,
}

/// Result of classifying a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch<'a> {
    /// Health and discovery endpoints; never authenticated or rate limited.
    Health,
    /// `/api/<service>[/rest]`. `rest` keeps its leading slash (or is empty).
    Service { entry: RouteEntry, rest: &'a str },
    /// Anything else.
    Unmatched,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: HashMap<String, RouteEntry>,
    public: HashSet<String>,
}

impl RouteTable {
    /// One entry per registered service. Services named in `public_services`
    /// skip authentication; every other service, including names that are not
    /// registered at all, is protected.
    pub fn new(registry: &ServiceRegistry, public_services: &[String]) -> Self {
        let public: HashSet<String> = public_services.iter().cloned().collect();
        let entries = registry
            .list_names()
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    RouteEntry {
                        service: name.to_string(),
                        auth_required: !public.contains(name),
                    },
                )
            })
            .collect();

        Self { entries, public }
    }

    /// Classify a request path.
    pub fn classify<'a>(&self, path: &'a str) -> RouteMatch<'a> {
        if is_health_path(path) {
            return RouteMatch::Health;
        }

        match split_service_path(path) {
            Some((service, rest)) => {
                let entry = self.entries.get(service).cloned().unwrap_or_else(|| RouteEntry {
                    service: service.to_string(),
                    auth_required: !self.public.contains(service),
                });
                RouteMatch::Service { entry, rest }
            }
            None => RouteMatch::Unmatched,
        }
    }

    /// Whether a request to `path` must carry a valid bearer token.
    pub fn auth_required(&self, path: &str) -> bool {
        matches!(
            self.classify(path),
            RouteMatch::Service { entry, .. } if entry.auth_required
        )
    }
}

/// Health paths bypass auth and rate limiting unconditionally.
pub fn is_health_path(path: &str) -> bool {
    path == API_HEALTH_PATH
        || path == HEALTH_PATH
        || path
            .strip_prefix(HEALTH_PATH)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Split `/api/<service>/<rest>` into the service name and the remainder.
///
/// Returns `None` for paths outside the API prefix or without a service segment.
pub fn split_service_path(path: &str) -> Option<(&str, &str)> {
    let after_prefix = path.strip_prefix(API_PREFIX)?.strip_prefix('/')?;
    let (service, rest) = match after_prefix.find('/') {
        Some(idx) => after_prefix.split_at(idx),
        None => (after_prefix, ""),
    };

    if service.is_empty() {
        None
    } else {
        Some((service, rest))
    }
}

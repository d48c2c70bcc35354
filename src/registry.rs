//! Static mapping from logical service names to backend base URLs.
//!
//! Built once at startup from [`Config::service_urls`](crate::config::Config)
//! and read-only afterwards, so it is shared behind an `Arc` without locking.
//! An entry with an empty URL stays registered but disabled: it shows up in
//! health fan-out ("not configured") but never resolves for forwarding.

use std::collections::HashSet;

use reqwest::Url;

use crate::error::{AppResult, GatewayError};

/// A registered backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub name: String,
    /// `None` marks the service disabled.
    pub base_url: Option<Url>,
}

impl ServiceEndpoint {
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }
}

/// Read-only service registry.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    endpoints: Vec<ServiceEndpoint>,
}

impl ServiceRegistry {
    /// Build the registry from `(name, url)` pairs, keeping their order.
    ///
    /// # Errors
    ///
    /// `ConfigError` for an invalid or duplicate name, or a non-empty URL that
    /// is not an absolute http(s) URL.
    pub fn from_entries<I, N, U>(entries: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (N, U)>,
        N: AsRef<str>,
        U: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut endpoints = Vec::new();

        for (name, url) in entries {
            let name = name.as_ref().trim();
            let url = url.as_ref().trim();

            if !is_valid_name(name) {
                return Err(GatewayError::ConfigError(format!(
                    "Invalid service name '{name}': use lowercase letters, digits, '-' or '_'"
                )));
            }
            if !seen.insert(name.to_string()) {
                return Err(GatewayError::ConfigError(format!(
                    "Service '{name}' is registered twice"
                )));
            }

            let base_url = if url.is_empty() {
                None
            } else {
                Some(parse_base_url(name, url)?)
            };

            endpoints.push(ServiceEndpoint {
                name: name.to_string(),
                base_url,
            });
        }

        Ok(Self { endpoints })
    }

    /// Look up an enabled service.
    ///
    /// Unknown and disabled names fail alike with `ServiceNotConfigured`.
    pub fn resolve(&self, name: &str) -> AppResult<&ServiceEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.name == name && e.is_enabled())
            .ok_or_else(|| GatewayError::ServiceNotConfigured(name.to_string()))
    }

    /// Whether `name` is registered at all, enabled or not.
    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.iter().any(|e| e.name == name)
    }

    /// Every registered name in registration order.
    pub fn list_names(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.name.as_str()).collect()
    }

    /// Enabled names only, in registration order.
    pub fn configured_names(&self) -> Vec<&str> {
        self.endpoints
            .iter()
            .filter(|e| e.is_enabled())
            .map(|e| e.name.as_str())
            .collect()
    }

    /// All endpoints in registration order.
    pub fn endpoints(&self) -> &[ServiceEndpoint] {
        &self.endpoints
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

fn parse_base_url(name: &str, raw: &str) -> AppResult<Url> {
    let url = Url::parse(raw).map_err(|e| {
        GatewayError::ConfigError(format!("Invalid URL for service '{name}' ({raw}): {e}"))
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(GatewayError::ConfigError(format!(
                "Service '{name}' URL must use http or https, got '{other}'"
            )));
        }
    }

    if url.host_str().is_none() {
        return Err(GatewayError::ConfigError(format!(
            "Service '{name}' URL has no host: {raw}"
        )));
    }

    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_enabled_service() {
        let registry = ServiceRegistry::from_entries([("expense", "http://svc-a")]).unwrap();

        let endpoint = registry.resolve("expense").unwrap();
        assert_eq!(endpoint.name, "expense");
        assert_eq!(endpoint.base_url.as_ref().unwrap().host_str(), Some("svc-a"));
    }

    #[test]
    fn test_resolve_unknown_service() {
        let registry = ServiceRegistry::from_entries([("expense", "http://svc-a")]).unwrap();

        let err = registry.resolve("unknown").unwrap_err();
        assert!(matches!(err, GatewayError::ServiceNotConfigured(name) if name == "unknown"));
    }

    #[test]
    fn test_disabled_service_is_listed_but_not_resolvable() {
        let registry =
            ServiceRegistry::from_entries([("expense", "http://svc-a"), ("chat", "")]).unwrap();

        assert!(registry.contains("chat"));
        assert!(registry.resolve("chat").is_err());
        assert_eq!(registry.list_names(), vec!["expense", "chat"]);
        assert_eq!(registry.configured_names(), vec!["expense"]);
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry =
            ServiceRegistry::from_entries([("zeta", ""), ("alpha", ""), ("mid", "")]).unwrap();
        assert_eq!(registry.list_names(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_malformed_url_fails_fast() {
        let result = ServiceRegistry::from_entries([("expense", "not a url")]);
        assert!(matches!(result, Err(GatewayError::ConfigError(_))));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let result = ServiceRegistry::from_entries([("expense", "ftp://svc-a")]);
        assert!(result.unwrap_err().to_string().contains("http"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = ServiceRegistry::from_entries([("expense", "http://a"), ("expense", "")]);
        assert!(result.unwrap_err().to_string().contains("twice"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        assert!(ServiceRegistry::from_entries([("Expense", "")]).is_err());
        assert!(ServiceRegistry::from_entries([("", "")]).is_err());
        assert!(ServiceRegistry::from_entries([("a/b", "")]).is_err());
    }

    #[test]
    fn test_empty_registry() {
        let registry = ServiceRegistry::from_entries(Vec::<(String, String)>::new()).unwrap();
        assert!(registry.list_names().is_empty());
        assert!(registry.resolve("anything").is_err());
    }
}

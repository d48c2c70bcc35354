//! Gateway configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//! The resulting [`Config`] is immutable and shared behind an `Arc`; changing it
//! requires a restart.
//!
//! # Backend Services
//!
//! One base URL per logical backend, e.g. `EXPENSE_SERVICE_URL=http://expense:3001`.
//! A missing or empty URL disables that backend without failing startup; a
//! malformed URL fails startup (see [`crate::registry::ServiceRegistry`]).
//!
//! # Security Configuration
//!
//! - `JWT_SECRET`: Required. Shared HS256 secret used to verify bearer tokens
//! - `JWT_EXPIRATION`: Lifetime of tokens issued by the gateway (default: `15m`)
//! - `PUBLIC_SERVICES`: Services whose routes skip authentication (default: `auth`)
//! - `CORS_ORIGINS`: Comma-separated list of allowed origins (default: `*` for dev)
//! - `APP_ENV` / `NODE_ENV`: `development`, `production` or `test`; production hides
//!   backend error details and enables strict security headers
//!
//! # Rate Limiting
//!
//! Three route classes with independent fixed windows:
//!
//! | Class     | Path prefix | Max (`*_MAX`) | Window (`*_WINDOW_SECS`) |
//! |-----------|-------------|---------------|--------------------------|
//! | `default` | (fallback)  | 100           | 900                      |
//! | `auth`    | `/api/auth` | 20            | 900                      |
//! | `ai`      | `/api/ai`   | 10            | 60                       |

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppResult, GatewayError};

/// Logical backend names and the environment variable carrying each base URL.
///
/// Registration order here is the order used by the health fan-out.
pub const KNOWN_SERVICES: [(&str, &str); 10] = [
    ("auth", "AUTH_SERVICE_URL"),
    ("expense", "EXPENSE_SERVICE_URL"),
    ("budget", "BUDGET_SERVICE_URL"),
    ("goals", "GOALS_SERVICE_URL"),
    ("insights", "INSIGHTS_SERVICE_URL"),
    ("chat", "CHAT_SERVICE_URL"),
    ("ai", "AI_INFERENCE_SERVICE_URL"),
    ("sync", "SYNC_SERVICE_URL"),
    ("notification", "NOTIFICATION_SERVICE_URL"),
    ("data", "DATA_SERVICE_URL"),
];

const MIB: u64 = 1024 * 1024;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(format!(
                "unknown environment '{other}' (expected development, production or test)"
            )),
        }
    }
}

/// Limit and window for one rate-limit route class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitClassConfig {
    /// Class name, e.g. "default", "auth", "ai"
    pub name: String,
    /// Path prefix mapping requests to this class (None = fallback class)
    pub path_prefix: Option<String>,
    /// Requests admitted per window per client
    pub max_requests: u32,
    /// Fixed window length
    pub window: Duration,
}

impl RateLimitClassConfig {
    pub fn new(name: &str, path_prefix: Option<&str>, max_requests: u32, window: Duration) -> Self {
        Self {
            name: name.to_string(),
            path_prefix: path_prefix.map(str::to_string),
            max_requests,
            window,
        }
    }
}

/// Gateway configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Gateway will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Deployment environment (default: development)
    pub environment: Environment,

    // =========================================================================
    // Backend Services
    // =========================================================================
    /// Logical service name to raw base URL, in registration order.
    /// An empty URL marks the service disabled.
    pub service_urls: Vec<(String, String)>,

    /// Services whose routes are reachable without a bearer token
    pub public_services: Vec<String>,

    /// Service probed by the readiness check (primary datastore dependency)
    pub readiness_service: String,

    // =========================================================================
    // Proxy Configuration
    // =========================================================================
    /// Maximum wait for a backend's response headers (default: 30s)
    pub proxy_timeout: Duration,

    /// Maximum wait for a backend TCP connection (default: 5s)
    pub proxy_connect_timeout: Duration,

    /// Value of the `X-Proxied-By` response header
    pub proxied_by: String,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Shared HS256 secret for bearer tokens
    pub jwt_secret: String,

    /// Lifetime of tokens issued by the gateway (default: 15 minutes)
    pub jwt_expiration: Duration,

    /// Allowed CORS origins, or `["*"]` for any origin
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges. When the socket peer falls inside one of
    /// these ranges, the forwarded client IP header is used as the client key.
    /// Default: Empty (peer address is always used)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Master switch for the per-class limiter (default: true)
    pub rate_limiting_enabled: bool,

    /// Route classes; the class without a prefix is the fallback
    pub rate_limit_classes: Vec<RateLimitClassConfig>,

    /// How often expired buckets are swept from memory (default: 60s)
    pub rate_limit_purge_interval: Duration,

    // =========================================================================
    // Health Check Configuration
    // =========================================================================
    /// Per-backend probe timeout (default: 3s)
    pub health_probe_timeout: Duration,

    /// Process virtual memory ceiling in bytes (default: 4 GiB)
    pub health_heap_threshold_bytes: u64,

    /// Process resident memory ceiling in bytes (default: 512 MiB)
    pub health_rss_threshold_bytes: u64,

    /// Mount point whose usage is checked (default: "/")
    pub health_disk_path: String,

    /// Maximum used fraction of the disk (default: 0.9)
    pub health_disk_threshold: f64,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output
    pub log_json: bool,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if any required configuration is
    /// missing or invalid (e.g., no `JWT_SECRET`, non-numeric `PORT`).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = match env::var("APP_ENV").or_else(|_| env::var("NODE_ENV")) {
            Ok(value) => value.parse().map_err(GatewayError::ConfigError)?,
            Err(_) => Environment::Development,
        };

        let jwt_expiration = match env::var("JWT_EXPIRATION") {
            Ok(value) => parse_duration_spec(&value)
                .map_err(|e| GatewayError::ConfigError(format!("Invalid JWT_EXPIRATION: {e}")))?,
            Err(_) => Duration::from_secs(15 * 60),
        };

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            environment,

            // Backends
            service_urls: Self::parse_service_urls(),
            public_services: Self::parse_list("PUBLIC_SERVICES", "auth"),
            readiness_service: env::var("READINESS_SERVICE")
                .unwrap_or_else(|_| "data".to_string()),

            // Proxy
            proxy_timeout: Duration::from_secs(Self::parse_env("PROXY_TIMEOUT_SECS", 30)?),
            proxy_connect_timeout: Duration::from_secs(Self::parse_env(
                "PROXY_CONNECT_TIMEOUT_SECS",
                5,
            )?),
            proxied_by: env::var("PROXIED_BY").unwrap_or_else(|_| "blade-gateway".to_string()),

            // Security
            jwt_secret: env::var("JWT_SECRET")
                .ok()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| GatewayError::ConfigError("JWT_SECRET is required".to_string()))?,
            jwt_expiration,
            cors_allowed_origins: Self::parse_list("CORS_ORIGINS", "*"),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            // Rate limiting
            rate_limiting_enabled: Self::parse_env("RATE_LIMIT_ENABLED", true)?,
            rate_limit_classes: vec![
                RateLimitClassConfig::new(
                    "default",
                    None,
                    Self::parse_env("RATE_LIMIT_DEFAULT_MAX", 100)?,
                    Duration::from_secs(Self::parse_env("RATE_LIMIT_DEFAULT_WINDOW_SECS", 900)?),
                ),
                RateLimitClassConfig::new(
                    "auth",
                    Some("/api/auth"),
                    Self::parse_env("RATE_LIMIT_AUTH_MAX", 20)?,
                    Duration::from_secs(Self::parse_env("RATE_LIMIT_AUTH_WINDOW_SECS", 900)?),
                ),
                RateLimitClassConfig::new(
                    "ai",
                    Some("/api/ai"),
                    Self::parse_env("RATE_LIMIT_AI_MAX", 10)?,
                    Duration::from_secs(Self::parse_env("RATE_LIMIT_AI_WINDOW_SECS", 60)?),
                ),
            ],
            rate_limit_purge_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_PURGE_INTERVAL_SECS",
                60,
            )?),

            // Health
            health_probe_timeout: Duration::from_millis(Self::parse_env(
                "HEALTH_PROBE_TIMEOUT_MS",
                3000,
            )?),
            health_heap_threshold_bytes: Self::parse_env::<u64>("HEALTH_HEAP_THRESHOLD_MB", 4096)?
                .saturating_mul(MIB),
            health_rss_threshold_bytes: Self::parse_env::<u64>("HEALTH_RSS_THRESHOLD_MB", 512)?
                .saturating_mul(MIB),
            health_disk_path: env::var("HEALTH_DISK_PATH").unwrap_or_else(|_| "/".to_string()),
            health_disk_threshold: Self::parse_env("HEALTH_DISK_THRESHOLD", 0.9)?,

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.jwt_secret.is_empty() {
            return Err(GatewayError::ConfigError(
                "JWT_SECRET must not be empty".to_string(),
            ));
        }

        if self.jwt_expiration.is_zero() {
            return Err(GatewayError::ConfigError(
                "JWT_EXPIRATION must be greater than 0".to_string(),
            ));
        }

        if self.proxy_timeout.is_zero() || self.proxy_connect_timeout.is_zero() {
            return Err(GatewayError::ConfigError(
                "PROXY_TIMEOUT_SECS and PROXY_CONNECT_TIMEOUT_SECS must be greater than 0"
                    .to_string(),
            ));
        }

        if self.health_probe_timeout.is_zero() {
            return Err(GatewayError::ConfigError(
                "HEALTH_PROBE_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if !(self.health_disk_threshold > 0.0 && self.health_disk_threshold <= 1.0) {
            return Err(GatewayError::ConfigError(format!(
                "HEALTH_DISK_THRESHOLD ({}) must be in (0, 1]",
                self.health_disk_threshold
            )));
        }

        if self.rate_limit_purge_interval.is_zero() {
            return Err(GatewayError::ConfigError(
                "RATE_LIMIT_PURGE_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        for class in &self.rate_limit_classes {
            if class.max_requests == 0 || class.window.is_zero() {
                return Err(GatewayError::ConfigError(format!(
                    "Rate limit class '{}' needs a positive max and window",
                    class.name
                )));
            }
        }

        if !self
            .rate_limit_classes
            .iter()
            .any(|c| c.path_prefix.is_none())
        {
            return Err(GatewayError::ConfigError(
                "A fallback rate limit class (no path prefix) is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the gateway runs in production mode.
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Set (or replace) the base URL for a logical service.
    ///
    /// Mostly useful for tests and embedding; `from_env` covers deployments.
    pub fn with_service(mut self, name: &str, url: &str) -> Self {
        match self.service_urls.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = url.to_string(),
            None => self.service_urls.push((name.to_string(), url.to_string())),
        }
        self
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| GatewayError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping blanks.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Read one base URL per known backend. Missing variables become empty
    /// strings, which the registry treats as disabled.
    fn parse_service_urls() -> Vec<(String, String)> {
        KNOWN_SERVICES
            .iter()
            .map(|(name, var)| {
                let url = env::var(var).unwrap_or_default().trim().to_string();
                ((*name).to_string(), url)
            })
            .collect()
    }
}

/// Parse a short duration spec such as `30s`, `15m`, `2h`, `1d` or bare seconds.
pub fn parse_duration_spec(spec: &str) -> Result<Duration, String> {
    let spec = spec.trim();
    let split = spec
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(spec.len());
    let (digits, unit) = spec.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("'{spec}' does not start with a number"))?;

    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => return Err(format!("unknown duration unit '{other}'")),
    };

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("'{spec}' overflows"))
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: Environment::Development,
            // Backends (all disabled)
            service_urls: KNOWN_SERVICES
                .iter()
                .map(|(name, _)| ((*name).to_string(), String::new()))
                .collect(),
            public_services: vec!["auth".to_string()],
            readiness_service: "data".to_string(),
            // Proxy
            proxy_timeout: Duration::from_secs(30),
            proxy_connect_timeout: Duration::from_secs(5),
            proxied_by: "blade-gateway".to_string(),
            // Security
            jwt_secret: "development-only-secret".to_string(),
            jwt_expiration: Duration::from_secs(15 * 60),
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![], // Empty = peer address is the client IP
            // Rate limiting
            rate_limiting_enabled: true,
            rate_limit_classes: vec![
                RateLimitClassConfig::new("default", None, 100, Duration::from_secs(900)),
                RateLimitClassConfig::new("auth", Some("/api/auth"), 20, Duration::from_secs(900)),
                RateLimitClassConfig::new("ai", Some("/api/ai"), 10, Duration::from_secs(60)),
            ],
            rate_limit_purge_interval: Duration::from_secs(60),
            // Health
            health_probe_timeout: Duration::from_secs(3),
            health_heap_threshold_bytes: 4096 * MIB,
            health_rss_threshold_bytes: 512 * MIB,
            health_disk_path: "/".to_string(),
            health_disk_threshold: 0.9,
            // Observability
            log_level: "info".to_string(),
            log_json: false,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.service_urls.len(), KNOWN_SERVICES.len());
        assert!(config.service_urls.iter().all(|(_, url)| url.is_empty()));
        assert_eq!(config.public_services, vec!["auth".to_string()]);
        assert_eq!(config.jwt_expiration, Duration::from_secs(900));
    }

    #[test]
    fn test_default_rate_limit_classes() {
        let config = Config::default();
        let by_name = |n: &str| {
            config
                .rate_limit_classes
                .iter()
                .find(|c| c.name == n)
                .unwrap()
                .clone()
        };

        assert_eq!(by_name("default").max_requests, 100);
        assert_eq!(by_name("default").window, Duration::from_secs(900));
        assert_eq!(by_name("auth").max_requests, 20);
        assert_eq!(by_name("auth").path_prefix.as_deref(), Some("/api/auth"));
        assert_eq!(by_name("ai").max_requests, 10);
        assert_eq!(by_name("ai").window, Duration::from_secs(60));
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_with_service_replaces_known_entry() {
        let config = Config::default().with_service("expense", "http://svc-a");

        let expense = config
            .service_urls
            .iter()
            .find(|(n, _)| n == "expense")
            .unwrap();
        assert_eq!(expense.1, "http://svc-a");
        assert_eq!(config.service_urls.len(), KNOWN_SERVICES.len());
    }

    #[test]
    fn test_with_service_appends_unknown_entry() {
        let config = Config::default().with_service("reports", "http://reports");
        assert_eq!(config.service_urls.len(), KNOWN_SERVICES.len() + 1);
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("production".parse(), Ok(Environment::Production));
        assert_eq!("Development".parse(), Ok(Environment::Development));
        assert_eq!("test".parse(), Ok(Environment::Test));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_is_production() {
        assert!(!Config::default().is_production());

        let config = Config {
            environment: Environment::Production,
            ..Config::default()
        };
        assert!(config.is_production());
    }

    #[test]
    fn test_parse_duration_spec() {
        assert_eq!(parse_duration_spec("15m"), Ok(Duration::from_secs(900)));
        assert_eq!(parse_duration_spec("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration_spec("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_duration_spec("1d"), Ok(Duration::from_secs(86400)));
        assert_eq!(parse_duration_spec("45"), Ok(Duration::from_secs(45)));
        assert!(parse_duration_spec("m").is_err());
        assert!(parse_duration_spec("10w").is_err());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_class_limit() {
        let mut config = Config::default();
        config.rate_limit_classes[1].max_requests = 0;

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("auth"));
    }

    #[test]
    fn test_validate_requires_fallback_class() {
        let mut config = Config::default();
        config.rate_limit_classes.retain(|c| c.path_prefix.is_some());

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_disk_threshold_range() {
        let config = Config {
            health_disk_threshold: 1.5,
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("HEALTH_DISK_THRESHOLD")
        );
    }

    #[test]
    fn test_validate_empty_secret() {
        let config = Config {
            jwt_secret: String::new(),
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }
}

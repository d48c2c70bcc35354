//! Fixed-window request counters per route class and client.
//!
//! # Algorithm
//!
//! Each `(class, client_key)` pair owns a bucket `{window_start, count}`
//! created on the first hit. Window boundaries are evaluated on every
//! admission: once `window` has elapsed since `window_start`, the bucket
//! restarts at the current instant with a zero count. A request is admitted
//! while the count stays within the class limit; the count stops growing at
//! `limit + 1`, so a flood of rejected requests cannot overflow it.
//!
//! # Concurrency
//!
//! Buckets live in a [`DashMap`]. The read-increment-compare step runs while
//! holding the entry's shard lock, so concurrent admissions for one key are
//! serialized and never over-admit, while unrelated keys on other shards
//! proceed in parallel.
//!
//! # Scope
//!
//! Counters are process-local. Several gateway instances each enforce the
//! limit independently; a shared limit needs an external counter store.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitClassConfig;
use crate::error::{AppResult, GatewayError};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { limit: u32, remaining: u32 },
    Rejected { limit: u32, retry_after_secs: u64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// A group of paths sharing one limit and window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteClass {
    pub name: String,
    pub path_prefix: Option<String>,
    pub max_requests: u32,
    pub window: Duration,
}

impl RouteClass {
    fn matches(&self, path: &str) -> bool {
        match &self.path_prefix {
            Some(prefix) => path
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
            None => false,
        }
    }
}

impl From<&RateLimitClassConfig> for RouteClass {
    fn from(config: &RateLimitClassConfig) -> Self {
        Self {
            name: config.name.clone(),
            path_prefix: config.path_prefix.clone(),
            max_requests: config.max_requests,
            window: config.window,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    window: Duration,
    count: u32,
}

#[derive(Debug)]
pub struct FixedWindowLimiter {
    /// Prefixed classes ordered longest prefix first.
    prefixed: Vec<RouteClass>,
    fallback: RouteClass,
    buckets: DashMap<(String, String), Bucket>,
}

impl FixedWindowLimiter {
    /// Build a limiter from class definitions.
    ///
    /// # Errors
    ///
    /// `ConfigError` when a class has a zero limit or window, when class names
    /// repeat, or when there is not exactly one fallback class (without prefix).
    pub fn new(classes: &[RateLimitClassConfig]) -> AppResult<Self> {
        for class in classes {
            if class.max_requests == 0 || class.window.is_zero() {
                return Err(GatewayError::ConfigError(format!(
                    "Rate limit class '{}' needs a positive max and window",
                    class.name
                )));
            }
            if classes.iter().filter(|c| c.name == class.name).count() > 1 {
                return Err(GatewayError::ConfigError(format!(
                    "Rate limit class '{}' is defined twice",
                    class.name
                )));
            }
        }

        let (mut prefixed, mut fallbacks): (Vec<RouteClass>, Vec<RouteClass>) = classes
            .iter()
            .map(RouteClass::from)
            .partition(|c| c.path_prefix.is_some());

        let fallback = match (fallbacks.pop(), fallbacks.is_empty()) {
            (Some(fallback), true) => fallback,
            _ => {
                return Err(GatewayError::ConfigError(
                    "Exactly one fallback rate limit class (no path prefix) is required"
                        .to_string(),
                ));
            }
        };

        prefixed.sort_by_key(|c| std::cmp::Reverse(c.path_prefix.as_ref().map_or(0, String::len)));

        Ok(Self {
            prefixed,
            fallback,
            buckets: DashMap::new(),
        })
    }

    /// Route class for a request path. Longest matching prefix wins.
    pub fn class_for_path(&self, path: &str) -> &RouteClass {
        self.prefixed
            .iter()
            .find(|c| c.matches(path))
            .unwrap_or(&self.fallback)
    }

    /// Look up a class by name.
    pub fn class(&self, name: &str) -> Option<&RouteClass> {
        self.prefixed
            .iter()
            .chain(std::iter::once(&self.fallback))
            .find(|c| c.name == name)
    }

    /// Admit or reject one request for `client_key` in class `class_name`.
    ///
    /// Unknown class names fall back to the default class.
    pub fn admit(&self, class_name: &str, client_key: &str) -> Admission {
        self.admit_at(class_name, client_key, Instant::now())
    }

    /// [`admit`](Self::admit) evaluated at an explicit instant.
    pub fn admit_at(&self, class_name: &str, client_key: &str, now: Instant) -> Admission {
        let class = self.class(class_name).unwrap_or(&self.fallback);
        self.admit_class(class, client_key, now)
    }

    /// Classify `path` and admit in one step. Returns the class name too.
    pub fn admit_path(&self, path: &str, client_key: &str) -> (&str, Admission) {
        let class = self.class_for_path(path);
        (
            class.name.as_str(),
            self.admit_class(class, client_key, Instant::now()),
        )
    }

    /// Drop buckets whose window has elapsed. Returns how many were removed.
    ///
    /// Purely a memory bound: an expired bucket left in place is reset on its
    /// next hit anyway.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < bucket.window);
        before.saturating_sub(self.buckets.len())
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn admit_class(&self, class: &RouteClass, client_key: &str, now: Instant) -> Admission {
        let limit = class.max_requests;

        // Shard lock held until `bucket` drops.
        let mut bucket = self
            .buckets
            .entry((class.name.clone(), client_key.to_string()))
            .or_insert_with(|| Bucket {
                window_start: now,
                window: class.window,
                count: 0,
            });

        let mut elapsed = now.saturating_duration_since(bucket.window_start);
        if elapsed >= class.window {
            bucket.window_start = now;
            bucket.count = 0;
            elapsed = Duration::ZERO;
        }

        if bucket.count <= limit {
            bucket.count += 1;
        }

        if bucket.count > limit {
            Admission::Rejected {
                limit,
                retry_after_secs: retry_after_secs(class.window, elapsed),
            }
        } else {
            Admission::Admitted {
                limit,
                remaining: limit - bucket.count,
            }
        }
    }
}

/// Remaining window time rounded up to whole seconds, within `[1, window]`.
fn retry_after_secs(window: Duration, elapsed: Duration) -> u64 {
    let remaining = window.saturating_sub(elapsed);
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    let window_secs = (window.as_secs() + u64::from(window.subsec_nanos() > 0)).max(1);
    secs.clamp(1, window_secs)
}

//! Health aggregation across local resources and backend services.
//!
//! # Checks
//!
//! | Component     | Kind    | Down when                                  |
//! |---------------|---------|--------------------------------------------|
//! | `memory_heap` | local   | process virtual memory > heap threshold    |
//! | `memory_rss`  | local   | process resident memory > RSS threshold    |
//! | `disk`        | local   | used fraction of the disk > disk threshold |
//! | `<service>`   | service | `GET <base>/health` fails, times out or is non-2xx |
//!
//! Backend probes run concurrently, each under its own timeout, and are
//! reported in registry order. A failing probe only marks its own entry down.
//! Disabled services report `up` with a "not configured" message.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use reqwest::Url;
use sysinfo::{Disks, Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{AppResult, GatewayError};
use crate::metrics;
use crate::models::{ComponentKind, HealthEntry, HealthReport, HealthStatus};
use crate::registry::{ServiceEndpoint, ServiceRegistry};

pub const MEMORY_HEAP: &str = "memory_heap";
pub const MEMORY_RSS: &str = "memory_rss";
pub const DISK: &str = "disk";

const NOT_CONFIGURED: &str = "not configured - skipping check";

/// Limits for the local resource checks.
#[derive(Debug, Clone)]
pub struct ResourceThresholds {
    pub heap_bytes: u64,
    pub rss_bytes: u64,
    pub disk_path: PathBuf,
    /// Maximum used fraction, in (0, 1]
    pub disk_used_fraction: f64,
}

impl From<&Config> for ResourceThresholds {
    fn from(config: &Config) -> Self {
        Self {
            heap_bytes: config.health_heap_threshold_bytes,
            rss_bytes: config.health_rss_threshold_bytes,
            disk_path: PathBuf::from(&config.health_disk_path),
            disk_used_fraction: config.health_disk_threshold,
        }
    }
}

/// Point-in-time resource readings. `None` means the value could not be read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSnapshot {
    pub heap_bytes: Option<u64>,
    pub rss_bytes: Option<u64>,
    pub disk_used_fraction: Option<f64>,
}

pub struct HealthAggregator {
    registry: Arc<ServiceRegistry>,
    client: reqwest::Client,
    probe_timeout: Duration,
    thresholds: ResourceThresholds,
    readiness_service: String,
    system: Arc<Mutex<System>>,
}

impl std::fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthAggregator")
            .field("probe_timeout", &self.probe_timeout)
            .field("thresholds", &self.thresholds)
            .field("readiness_service", &self.readiness_service)
            .finish_non_exhaustive()
    }
}

impl HealthAggregator {
    /// # Errors
    ///
    /// `ConfigError` if the probe HTTP client cannot be built.
    pub fn new(registry: Arc<ServiceRegistry>, config: &Config) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.health_probe_timeout)
            .connect_timeout(config.health_probe_timeout)
            .build()
            .map_err(|e| {
                GatewayError::ConfigError(format!("Failed to build health probe client: {e}"))
            })?;

        Ok(Self {
            registry,
            client,
            probe_timeout: config.health_probe_timeout,
            thresholds: ResourceThresholds::from(config),
            readiness_service: config.readiness_service.clone(),
            system: Arc::new(Mutex::new(System::new())),
        })
    }

    /// Full report: local checks first, then one entry per registered service.
    #[instrument(skip(self))]
    pub async fn check(&self) -> HealthReport {
        let probes = join_all(
            self.registry
                .endpoints()
                .iter()
                .map(|endpoint| self.probe(endpoint)),
        );
        let (mut entries, services) = tokio::join!(self.local_checks(), probes);

        for entry in &services {
            metrics::record_backend_health(&entry.component, entry.status.is_up());
        }
        entries.extend(services);

        let report = HealthReport::from_entries(entries);
        debug!(status = ?report.status, entries = report.entries.len(), "Health check complete");
        report
    }

    /// Readiness: only the primary datastore dependency counts.
    ///
    /// A missing or disabled readiness service reports `up` ("not configured").
    #[instrument(skip(self))]
    pub async fn readiness(&self) -> HealthEntry {
        match self
            .registry
            .endpoints()
            .iter()
            .find(|e| e.name == self.readiness_service)
        {
            Some(endpoint) => self.probe(endpoint).await,
            None => HealthEntry::up(self.readiness_service.clone(), ComponentKind::Service)
                .with_message(NOT_CONFIGURED),
        }
    }

    /// Probe one backend's `GET /health`.
    async fn probe(&self, endpoint: &ServiceEndpoint) -> HealthEntry {
        let Some(base_url) = &endpoint.base_url else {
            return HealthEntry::up(endpoint.name.clone(), ComponentKind::Service)
                .with_message(NOT_CONFIGURED);
        };

        let url = health_url(base_url);
        let result = tokio::time::timeout(self.probe_timeout, self.client.get(url).send()).await;

        match result {
            Ok(Ok(response)) if response.status().is_success() => {
                HealthEntry::up(endpoint.name.clone(), ComponentKind::Service)
            }
            Ok(Ok(response)) => {
                warn!(service = %endpoint.name, status = response.status().as_u16(), "Health probe failed");
                HealthEntry::down(
                    endpoint.name.clone(),
                    ComponentKind::Service,
                    format!("health endpoint returned HTTP {}", response.status().as_u16()),
                )
            }
            Ok(Err(e)) => {
                warn!(service = %endpoint.name, error = %e, "Health probe failed");
                let message = if e.is_timeout() {
                    format!("timed out after {}ms", self.probe_timeout.as_millis())
                } else {
                    format!("unreachable: {e}")
                };
                HealthEntry::down(endpoint.name.clone(), ComponentKind::Service, message)
            }
            Err(_) => {
                warn!(service = %endpoint.name, "Health probe timed out");
                HealthEntry::down(
                    endpoint.name.clone(),
                    ComponentKind::Service,
                    format!("timed out after {}ms", self.probe_timeout.as_millis()),
                )
            }
        }
    }

    /// Read process memory and disk usage off the async workers.
    async fn local_checks(&self) -> Vec<HealthEntry> {
        let system = self.system.clone();
        let disk_path = self.thresholds.disk_path.clone();

        let snapshot = tokio::task::spawn_blocking(move || read_resources(&system, &disk_path))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Resource sampling task failed");
                ResourceSnapshot::default()
            });

        evaluate_resources(&snapshot, &self.thresholds)
    }
}

/// `<base>/health`, keeping any base path.
fn health_url(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!("{}/health", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url
}

fn read_resources(system: &Mutex<System>, disk_path: &Path) -> ResourceSnapshot {
    let mut sys = system.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let pid = Pid::from_u32(std::process::id());
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new().with_memory(),
    );

    let (heap_bytes, rss_bytes) = sys
        .process(pid)
        .map(|p| (Some(p.virtual_memory()), Some(p.memory())))
        .unwrap_or((None, None));

    let disks = Disks::new_with_refreshed_list();
    let disk_used_fraction = disks
        .list()
        .iter()
        .filter(|d| disk_path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .and_then(|d| {
            let total = d.total_space();
            (total > 0).then(|| 1.0 - d.available_space() as f64 / total as f64)
        });

    ResourceSnapshot {
        heap_bytes,
        rss_bytes,
        disk_used_fraction,
    }
}

/// Compare a snapshot against thresholds. Unreadable values are reported down.
pub fn evaluate_resources(
    snapshot: &ResourceSnapshot,
    thresholds: &ResourceThresholds,
) -> Vec<HealthEntry> {
    vec![
        memory_entry(MEMORY_HEAP, snapshot.heap_bytes, thresholds.heap_bytes),
        memory_entry(MEMORY_RSS, snapshot.rss_bytes, thresholds.rss_bytes),
        disk_entry(
            snapshot.disk_used_fraction,
            thresholds.disk_used_fraction,
            &thresholds.disk_path,
        ),
    ]
}

fn memory_entry(component: &str, used: Option<u64>, limit: u64) -> HealthEntry {
    const MIB: u64 = 1024 * 1024;
    match used {
        Some(used) if used <= limit => HealthEntry::up(component, ComponentKind::Local)
            .with_message(format!("{} MiB used of {} MiB", used / MIB, limit / MIB)),
        Some(used) => HealthEntry::down(
            component,
            ComponentKind::Local,
            format!("{} MiB used exceeds {} MiB", used / MIB, limit / MIB),
        ),
        None => HealthEntry::down(component, ComponentKind::Local, "unable to read process memory"),
    }
}

fn disk_entry(used: Option<f64>, limit: f64, path: &Path) -> HealthEntry {
    match used {
        Some(used) if used <= limit => HealthEntry::up(DISK, ComponentKind::Local)
            .with_message(format!("{:.1}% used on {}", used * 100.0, path.display())),
        Some(used) => HealthEntry::down(
            DISK,
            ComponentKind::Local,
            format!(
                "{:.1}% used on {} exceeds {:.1}%",
                used * 100.0,
                path.display(),
                limit * 100.0
            ),
        ),
        None => HealthEntry::down(
            DISK,
            ComponentKind::Local,
            format!("no disk found for {}", path.display()),
        ),
    }
}

/// Overall status for a readiness entry.
pub fn readiness_status(entry: &HealthEntry) -> HealthStatus {
    if entry.status.is_up() {
        HealthStatus::Up
    } else {
        HealthStatus::Down
    }
}

//! `HealthMonitor` — a registry of named checks, each with its own type,
//! timeout, and enabled flag, invoked on demand or on an interval.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::model::{HealthCheckType, HealthStatus};

/// The result of invoking a single registered check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// The function signature a registered check must implement.
pub type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, (HealthStatus, Option<serde_json::Value>)> + Send + Sync>;

/// A single registered health check.
#[derive(Clone)]
pub struct HealthCheckConfig {
    pub name: String,
    pub kind: HealthCheckType,
    pub enabled: bool,
    pub timeout_ms: u64,
    pub check_fn: CheckFn,
}

impl HealthCheckConfig {
    pub fn new(
        name: impl Into<String>,
        kind: HealthCheckType,
        timeout_ms: u64,
        check_fn: CheckFn,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: true,
            timeout_ms,
            check_fn,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Aggregate health across every enabled check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
}

/// Registry of named checks. Read-mostly after startup: checks are
/// registered once, then `execute_all`/`execute_one` are called repeatedly
/// without further mutation.
pub struct HealthMonitor {
    checks: RwLock<HashMap<String, HealthCheckConfig>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            checks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, config: HealthCheckConfig) {
        self.checks.write().await.insert(config.name.clone(), config);
    }

    pub async fn check_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.checks.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn run_one(config: &HealthCheckConfig) -> HealthCheckResult {
        let fut = (config.check_fn)();
        let outcome = tokio::time::timeout(Duration::from_millis(config.timeout_ms), fut).await;
        let (status, metadata) = match outcome {
            Ok((status, metadata)) => (status, metadata),
            Err(_) => (
                HealthStatus::Unhealthy,
                Some(serde_json::json!({"reason": "check timed out"})),
            ),
        };
        HealthCheckResult {
            name: config.name.clone(),
            status,
            metadata,
        }
    }

    /// Runs a single named check. Returns `None` if no check with that name
    /// is registered.
    pub async fn execute_one(&self, name: &str) -> Option<HealthCheckResult> {
        let config = self.checks.read().await.get(name).cloned()?;
        Some(Self::run_one(&config).await)
    }

    /// Spawns a background task that calls [`HealthMonitor::execute_all`] on
    /// `interval_sec`, logging the aggregate status each tick.
    pub fn spawn_background_interval_checks(self: &Arc<Self>, interval_sec: u64) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        let interval = Duration::from_secs(interval_sec.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let summary = monitor.execute_all().await;
                match summary.status {
                    HealthStatus::Healthy => tracing::debug!(status = ?summary.status, "interval health check"),
                    _ => tracing::warn!(status = ?summary.status, "interval health check"),
                }
            }
        })
    }

    /// Runs every enabled check in parallel, each bounded by its own
    /// timeout, and aggregates the results.
    pub async fn execute_all(&self) -> HealthSummary {
        let configs: Vec<HealthCheckConfig> = self
            .checks
            .read()
            .await
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect();

        let results: Vec<HealthCheckResult> =
            futures::future::join_all(configs.iter().map(Self::run_one)).await;

        let status = results
            .iter()
            .fold(HealthStatus::Healthy, |acc, r| acc.worse_of(r.status));

        HealthSummary {
            status,
            checks: results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always(status: HealthStatus) -> CheckFn {
        Arc::new(move || Box::pin(async move { (status, None) }))
    }

    #[tokio::test]
    async fn execute_all_aggregates_worst_status() {
        let monitor = HealthMonitor::new();
        monitor
            .register(HealthCheckConfig::new(
                "ok",
                HealthCheckType::Functional,
                1000,
                always(HealthStatus::Healthy),
            ))
            .await;
        monitor
            .register(HealthCheckConfig::new(
                "degraded",
                HealthCheckType::Resource,
                1000,
                always(HealthStatus::Degraded),
            ))
            .await;
        let summary = monitor.execute_all().await;
        assert_eq!(summary.status, HealthStatus::Degraded);
        assert_eq!(summary.checks.len(), 2);
    }

    #[tokio::test]
    async fn disabled_checks_are_skipped() {
        let monitor = HealthMonitor::new();
        monitor
            .register(
                HealthCheckConfig::new(
                    "off",
                    HealthCheckType::Functional,
                    1000,
                    always(HealthStatus::Unhealthy),
                )
                .disabled(),
            )
            .await;
        let summary = monitor.execute_all().await;
        assert_eq!(summary.status, HealthStatus::Healthy);
        assert!(summary.checks.is_empty());
    }

    #[tokio::test]
    async fn slow_check_times_out_as_unhealthy() {
        let monitor = HealthMonitor::new();
        monitor
            .register(HealthCheckConfig::new(
                "slow",
                HealthCheckType::Dependency,
                10,
                Arc::new(|| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        (HealthStatus::Healthy, None)
                    })
                }),
            ))
            .await;
        let summary = monitor.execute_all().await;
        assert_eq!(summary.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn repeated_execute_all_yields_same_check_names() {
        let monitor = HealthMonitor::new();
        monitor
            .register(HealthCheckConfig::new(
                "ok",
                HealthCheckType::Functional,
                1000,
                always(HealthStatus::Healthy),
            ))
            .await;
        let first: Vec<String> = monitor
            .execute_all()
            .await
            .checks
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let second: Vec<String> = monitor
            .execute_all()
            .await
            .checks
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn execute_one_returns_none_for_unregistered_name() {
        let monitor = HealthMonitor::new();
        assert!(monitor.execute_one("nope").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn background_interval_checks_runs_execute_all_periodically() {
        let monitor = Arc::new(HealthMonitor::new());
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_for_check = Arc::clone(&calls);
        monitor
            .register(HealthCheckConfig::new(
                "counted",
                HealthCheckType::Functional,
                1000,
                Arc::new(move || {
                    let calls = Arc::clone(&calls_for_check);
                    Box::pin(async move {
                        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        (HealthStatus::Healthy, None)
                    })
                }),
            ))
            .await;

        let handle = monitor.spawn_background_interval_checks(1);
        tokio::time::advance(Duration::from_millis(1100)).await;
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1000)).await;
        tokio::task::yield_now().await;

        assert!(calls.load(std::sync::atomic::Ordering::SeqCst) >= 2);
        handle.abort();
    }
}

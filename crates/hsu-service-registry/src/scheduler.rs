//! Background health-check and staleness loop.
//!
//! One tick probes every endpoint that opted into health checking, writes
//! the results through the registry, then evicts endpoints whose heartbeats
//! stopped. A failing tick is logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::health_checker::HealthChecker;
use crate::registry::ServiceRegistry;

/// Scheduler timing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Endpoints without a heartbeat for longer than this are removed.
    pub stale_threshold: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(5 * 60),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Endpoints probed.
    pub checked: usize,
    /// Health results written back.
    pub updated: usize,
    /// Results forced to `Unhealthy` by the failure threshold.
    pub escalated: usize,
    /// Endpoints evicted as stale.
    pub removed: usize,
    /// Steps that failed during the tick.
    pub errors: usize,
}

/// Periodic health checking on behalf of a [`ServiceRegistry`].
pub struct HealthCheckScheduler {
    registry: Arc<ServiceRegistry>,
    checker: HealthChecker,
    config: SchedulerConfig,
}

impl HealthCheckScheduler {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        checker: HealthChecker,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            checker,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs a single tick.
    pub async fn run_once(&self) -> TickReport {
        let mut report = TickReport::default();

        match self.registry.get_all().await {
            Ok(endpoints) => {
                let targets: Vec<_> = endpoints
                    .into_iter()
                    .filter(|endpoint| endpoint.health_check_enabled)
                    .collect();
                report.checked = targets.len();

                if !targets.is_empty() {
                    debug!("Probing {} endpoints", targets.len());
                }

                let results = self.checker.check_multiple(targets).await;
                for (id, mut health) in results {
                    if health.escalate() {
                        report.escalated += 1;
                        warn!(
                            "Endpoint {} marked unhealthy after {} consecutive failures",
                            id, health.consecutive_failures
                        );
                    }

                    match self.registry.update_health(&id, health).await {
                        Ok(true) => report.updated += 1,
                        // Deregistered while the probe was in flight.
                        Ok(false) => {
                            debug!("Endpoint {} disappeared before its health was saved", id)
                        }
                        Err(e) => {
                            report.errors += 1;
                            error!("Failed to save health for {}: {}", id, e);
                        }
                    }
                }
            }
            Err(e) => {
                report.errors += 1;
                error!("Health check tick could not load endpoints: {}", e);
            }
        }

        match self.registry.store().cleanup_stale(self.config.stale_threshold).await {
            Ok(removed) => {
                report.removed = removed;
                if removed > 0 {
                    info!("Removed {} stale endpoints", removed);
                }
            }
            Err(e) => {
                report.errors += 1;
                error!("Stale endpoint cleanup failed: {}", e);
            }
        }

        report
    }

    /// Ticks until `shutdown` is cancelled.
    ///
    /// The first tick runs immediately.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Health check scheduler started (interval: {:?}, stale threshold: {:?})",
            self.config.interval, self.config.stale_threshold
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        report = self.run_once() => {
                            if report.errors > 0 {
                                warn!("Health check tick finished with {} errors", report.errors);
                            }
                        }
                    }
                }
            }
        }

        info!("Health check scheduler stopped");
    }

    /// Runs the loop on its own task.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

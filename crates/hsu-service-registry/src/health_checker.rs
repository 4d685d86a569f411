//! Active probing of registered endpoints.
//!
//! # Rust Learning Note
//!
//! [`HealthChecker::check_multiple`] fans probes out with the same building
//! blocks the process manager uses for its operation runner:
//!
//! - a `Semaphore` bounds how many probes are in flight,
//! - a `JoinSet` owns the spawned tasks and hands back their results,
//! - `AssertUnwindSafe(..).catch_unwind()` turns a panicking probe into an
//!   ordinary failure for that one endpoint.
//!
//! Each task returns `(EndpointId, Health)`, so results are keyed by identity
//! rather than by completion order.

use futures::FutureExt;
use hsu_common::{Endpoint, EndpointId, Health};
use hsu_monitoring::{HealthCheckData, HealthProbe, HttpProbe};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::clock::{self, Clock};

/// Health checker tuning.
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// Upper bound on a single probe, including connect time.
    pub timeout: Duration,
    /// Maximum number of probes in flight during `check_multiple`.
    pub max_concurrency: usize,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_concurrency: 16,
        }
    }
}

/// Turns probe outcomes into endpoint [`Health`] values.
#[derive(Clone)]
pub struct HealthChecker {
    probe: Arc<dyn HealthProbe>,
    config: HealthCheckerConfig,
    clock: Arc<dyn Clock>,
}

impl HealthChecker {
    /// Checker backed by a pooled HTTP client.
    pub fn new(config: HealthCheckerConfig) -> Self {
        Self::with_probe(Arc::new(HttpProbe::new()), config)
    }

    pub fn with_probe(probe: Arc<dyn HealthProbe>, config: HealthCheckerConfig) -> Self {
        Self {
            probe,
            config,
            clock: clock::system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &HealthCheckerConfig {
        &self.config
    }

    /// Probes one endpoint and returns its next health.
    ///
    /// Never fails: timeouts and transport errors become a failed check that
    /// continues the endpoint's current failure streak.
    pub async fn check_health(&self, endpoint: &Endpoint) -> Health {
        let url = endpoint.health_check_url();
        let data = self.probe_with_deadline(&url).await;
        self.to_health(endpoint, data)
    }

    /// Probes several endpoints concurrently.
    ///
    /// Every input endpoint has exactly one entry in the result, even when
    /// its probe panicked.
    pub async fn check_multiple(&self, endpoints: Vec<Endpoint>) -> HashMap<EndpointId, Health> {
        let mut results = HashMap::with_capacity(endpoints.len());
        if endpoints.is_empty() {
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut join_set: JoinSet<(EndpointId, Health)> = JoinSet::new();
        let mut pending: HashMap<EndpointId, Endpoint> = HashMap::with_capacity(endpoints.len());

        for endpoint in endpoints {
            pending.insert(endpoint.id.clone(), endpoint.clone());

            let checker = self.clone();
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                // Closed only if dropped, which cannot happen while we hold it.
                let _permit = semaphore.acquire_owned().await.ok();
                let id = endpoint.id.clone();

                let outcome = AssertUnwindSafe(checker.check_health(&endpoint))
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(health) => (id, health),
                    Err(panic_info) => {
                        let panic_msg = panic_message(panic_info.as_ref());
                        error!(
                            "Health probe panicked for {} ({}): {}",
                            endpoint.service_name, id, panic_msg
                        );
                        let health = Health::failure(
                            &endpoint.health,
                            checker.clock.now(),
                            0,
                            format!("Health check panicked: {}", panic_msg),
                        );
                        (id, health)
                    }
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, health)) => {
                    pending.remove(&id);
                    results.insert(id, health);
                }
                Err(e) => warn!("Health check task failed to complete: {}", e),
            }
        }

        // Tasks that were cancelled still get a failed check.
        for (id, endpoint) in pending {
            let health = Health::failure(
                &endpoint.health,
                self.clock.now(),
                0,
                "Health check task did not complete",
            );
            results.insert(id, health);
        }

        results
    }

    async fn probe_with_deadline(&self, url: &str) -> HealthCheckData {
        let limit = self.config.timeout;
        match timeout(limit, self.probe.probe(url, limit)).await {
            Ok(data) => data,
            Err(_) => {
                warn!("Health check timed out after {:?}: {}", limit, url);
                HealthCheckData::unhealthy(limit.as_millis() as u64, "Timeout")
            }
        }
    }

    fn to_health(&self, endpoint: &Endpoint, data: HealthCheckData) -> Health {
        let checked_at = self.clock.now();

        let health = if data.is_healthy {
            Health::success(checked_at, data.response_time_ms)
        } else {
            let message = data
                .error_message
                .unwrap_or_else(|| "Health check failed".to_string());
            debug!(
                "Health check failed for {} ({}): {}",
                endpoint.service_name, endpoint.id, message
            );
            Health::failure(&endpoint.health, checked_at, data.response_time_ms, message)
        };

        match data.status_code {
            Some(code) => health.with_detail("statusCode", code.to_string()),
            None => health,
        }
    }
}

fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Read side of the registry: query filtering and weighted selection.

use hsu_common::{Endpoint, HealthStatus, Result, ServiceQuery};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::debug;

use crate::storage::EndpointStore;

/// Answers discovery queries against an [`EndpointStore`].
pub struct ServiceDiscovery {
    store: Arc<dyn EndpointStore>,
    rng: Mutex<SmallRng>,
}

impl ServiceDiscovery {
    pub fn new(store: Arc<dyn EndpointStore>) -> Self {
        Self {
            store,
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }

    /// Deterministic selection for tests and reproducible runs.
    pub fn with_seed(store: Arc<dyn EndpointStore>, seed: u64) -> Self {
        Self {
            store,
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }

    /// Picks one endpoint matching `query`, weighted by endpoint weight.
    ///
    /// Returns `None` when nothing matches.
    pub async fn discover(&self, query: &ServiceQuery) -> Result<Option<Endpoint>> {
        let candidates = self.discover_all(query).await?;
        if candidates.is_empty() {
            debug!("No endpoints matched discovery for {}", query.service_name);
            return Ok(None);
        }
        Ok(self.select_weighted(candidates))
    }

    /// Every endpoint matching `query`, in no particular order.
    pub async fn discover_all(&self, query: &ServiceQuery) -> Result<Vec<Endpoint>> {
        let endpoints = self.store.find_by_name(&query.service_name).await?;
        Ok(endpoints
            .into_iter()
            .filter(|endpoint| matches_query(endpoint, query))
            .collect())
    }

    /// One healthy instance of `service_name`, any version or environment.
    pub async fn get_service(&self, service_name: &str) -> Result<Option<Endpoint>> {
        self.discover(&ServiceQuery::new(service_name)).await
    }

    /// All healthy instances of `service_name`.
    pub async fn get_all_instances(&self, service_name: &str) -> Result<Vec<Endpoint>> {
        self.discover_all(&ServiceQuery::new(service_name)).await
    }

    /// Weighted random choice: P(e) = weight(e) / sum(weights).
    ///
    /// Candidates are put in a stable order first so a seeded generator
    /// picks the same endpoints regardless of map iteration order.
    fn select_weighted(&self, mut candidates: Vec<Endpoint>) -> Option<Endpoint> {
        if candidates.len() <= 1 {
            return candidates.pop();
        }
        candidates.sort_by(|a, b| {
            (a.registered_at, &a.base_url, &a.id).cmp(&(b.registered_at, &b.base_url, &b.id))
        });

        let total: u64 = candidates.iter().map(|e| u64::from(e.weight)).sum();
        let mut rng = self.rng.lock();

        if total == 0 {
            let index = rng.gen_range(0..candidates.len());
            return Some(candidates.swap_remove(index));
        }

        let mut remaining = rng.gen_range(0..total);
        let index = candidates
            .iter()
            .position(|e| {
                let weight = u64::from(e.weight);
                if remaining < weight {
                    true
                } else {
                    remaining -= weight;
                    false
                }
            })
            .unwrap_or(candidates.len() - 1);

        Some(candidates.swap_remove(index))
    }
}

fn matches_query(endpoint: &Endpoint, query: &ServiceQuery) -> bool {
    if let Some(version) = non_blank(&query.version) {
        if !endpoint.version.eq_ignore_ascii_case(version) {
            return false;
        }
    }
    if let Some(environment) = non_blank(&query.environment) {
        if !endpoint.environment.eq_ignore_ascii_case(environment) {
            return false;
        }
    }
    if query.only_healthy && endpoint.health.status != HealthStatus::Healthy {
        return false;
    }
    endpoint.matches_tags(&query.tags)
}

/// Blank filter values mean "no filter".
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

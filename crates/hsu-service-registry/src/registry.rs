//! Registration, heartbeat and health bookkeeping over an [`EndpointStore`].

use hsu_common::{Endpoint, EndpointId, Error, Health, Result, ServiceRegistration};
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::clock::{self, Clock};
use crate::storage::{EndpointMutation, EndpointStore};

/// Tag keys mirroring an endpoint's health-check settings, so tag queries
/// can select on them.
pub const TAG_HEALTH_CHECK_ENABLED: &str = "HealthCheckEnabled";
pub const TAG_HEALTH_CHECK_PATH: &str = "HealthCheckPath";
pub const TAG_HEALTH_CHECK_INTERVAL: &str = "HealthCheckInterval";

/// The write side of the registry.
///
/// Owns validation and identity generation; persistence is delegated to the
/// injected store. Several registries over different stores can live in the
/// same process.
pub struct ServiceRegistry {
    store: Arc<dyn EndpointStore>,
    clock: Arc<dyn Clock>,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn EndpointStore>) -> Self {
        Self::with_clock(store, clock::system_clock())
    }

    pub fn with_clock(store: Arc<dyn EndpointStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The store this registry writes to.
    pub fn store(&self) -> &Arc<dyn EndpointStore> {
        &self.store
    }

    /// Registers a new service instance and returns the stored endpoint.
    ///
    /// Every call yields a fresh identity, even for a name and address that
    /// are already registered.
    pub async fn register(&self, registration: ServiceRegistration) -> Result<Endpoint> {
        validate(&registration)?;

        let now = self.clock.now();
        let mut tags = registration.tags;
        if registration.enable_health_check {
            tags.insert(TAG_HEALTH_CHECK_ENABLED.to_string(), "true".to_string());
            tags.insert(
                TAG_HEALTH_CHECK_PATH.to_string(),
                registration.health_check_path.clone(),
            );
            tags.insert(
                TAG_HEALTH_CHECK_INTERVAL.to_string(),
                registration.health_check_interval_seconds.to_string(),
            );
        }

        let endpoint = Endpoint {
            id: EndpointId::generate(),
            service_name: registration.service_name.trim().to_string(),
            version: registration.version,
            base_url: registration.base_url.trim().trim_end_matches('/').to_string(),
            environment: registration.environment,
            weight: registration.weight,
            tags,
            health: Health::unknown(now),
            health_check_enabled: registration.enable_health_check,
            health_check_path: registration.health_check_path,
            health_check_interval_seconds: registration.health_check_interval_seconds,
            registered_at: now,
            last_updated: now,
        };

        let endpoint = self.store.save(endpoint).await?;

        info!(
            "Service registered: {} {} at {} (ID: {})",
            endpoint.service_name, endpoint.version, endpoint.base_url, endpoint.id
        );

        Ok(endpoint)
    }

    /// Removes an endpoint. Returns false if the identity was unknown.
    pub async fn deregister(&self, id: &EndpointId) -> Result<bool> {
        let Some(endpoint) = self.store.get_by_id(id).await? else {
            debug!("Deregister for unknown endpoint {}", id);
            return Ok(false);
        };

        let removed = self.store.delete(id).await?;
        if removed {
            info!(
                "Service deregistered: {} {} (ID: {})",
                endpoint.service_name, endpoint.version, id
            );
        }
        Ok(removed)
    }

    /// Liveness signal. Moves `last_updated` only; health is untouched.
    ///
    /// Returns false for an unknown identity so an evicted client can
    /// notice and register again.
    pub async fn heartbeat(&self, id: &EndpointId) -> Result<bool> {
        match self.store.modify(id, EndpointMutation::Touch).await? {
            Some(endpoint) => {
                trace!("Heartbeat received from {} (ID: {})", endpoint.service_name, id);
                Ok(true)
            }
            None => {
                debug!("Heartbeat for unknown endpoint {}", id);
                Ok(false)
            }
        }
    }

    /// Replaces the health of an endpoint. Returns false for an unknown identity.
    pub async fn update_health(&self, id: &EndpointId, health: Health) -> Result<bool> {
        let status = health.status;
        let response_time_ms = health.response_time_ms;

        match self.store.modify(id, EndpointMutation::SetHealth(health)).await? {
            Some(endpoint) => {
                debug!(
                    "Health updated for {}: {} ({}ms)",
                    endpoint.service_name, status, response_time_ms
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_by_id(&self, id: &EndpointId) -> Result<Option<Endpoint>> {
        self.store.get_by_id(id).await
    }

    pub async fn get_all(&self) -> Result<Vec<Endpoint>> {
        self.store.get_all().await
    }
}

fn validate(registration: &ServiceRegistration) -> Result<()> {
    if registration.service_name.trim().is_empty() {
        return Err(Error::validation("Service name is required"));
    }
    if registration.base_url.trim().is_empty() {
        return Err(Error::validation("Base URL is required"));
    }
    if registration.weight == 0 {
        return Err(Error::validation("Weight must be a positive integer"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::InMemoryEndpointStore;
    use hsu_common::HealthStatus;
    use std::time::Duration;

    fn registry() -> (ServiceRegistry, ManualClock) {
        let clock = ManualClock::new();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(InMemoryEndpointStore::with_clock(Arc::clone(&shared)));
        (ServiceRegistry::with_clock(store, shared), clock)
    }

    #[tokio::test]
    async fn test_register_assigns_identity_and_unknown_health() {
        let (registry, clock) = registry();

        let endpoint = registry
            .register(ServiceRegistration::new("orders", "http://localhost:5001/"))
            .await
            .unwrap();

        assert!(!endpoint.id.as_str().is_empty());
        assert_eq!(endpoint.registered_at, clock.now());
        assert_eq!(endpoint.health.status, HealthStatus::Unknown);
        assert_eq!(endpoint.base_url, "http://localhost:5001");
        assert!(!endpoint.is_active());
    }

    #[tokio::test]
    async fn test_register_mirrors_health_check_tags() {
        let (registry, _) = registry();

        let endpoint = registry
            .register(
                ServiceRegistration::new("orders", "http://localhost:5001")
                    .with_health_check(true, "/status"),
            )
            .await
            .unwrap();

        assert_eq!(endpoint.tags.get(TAG_HEALTH_CHECK_ENABLED).unwrap(), "true");
        assert_eq!(endpoint.tags.get(TAG_HEALTH_CHECK_PATH).unwrap(), "/status");
        assert_eq!(endpoint.tags.get(TAG_HEALTH_CHECK_INTERVAL).unwrap(), "30");

        let quiet = registry
            .register(
                ServiceRegistration::new("orders", "http://localhost:5002")
                    .with_health_check(false, "/health"),
            )
            .await
            .unwrap();
        assert!(!quiet.tags.contains_key(TAG_HEALTH_CHECK_ENABLED));
        assert!(!quiet.health_check_enabled);
    }

    #[tokio::test]
    async fn test_register_identical_registrations_get_distinct_ids() {
        let (registry, _) = registry();
        let registration = ServiceRegistration::new("orders", "http://localhost:5001");

        let a = registry.register(registration.clone()).await.unwrap();
        let b = registry.register(registration).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(registry.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (registry, _) = registry();

        let missing_name = registry
            .register(ServiceRegistration::new("  ", "http://localhost:5001"))
            .await;
        assert!(matches!(missing_name, Err(Error::Validation { .. })));

        let missing_url = registry.register(ServiceRegistration::new("orders", "")).await;
        assert!(matches!(missing_url, Err(Error::Validation { .. })));

        let zero_weight = registry
            .register(ServiceRegistration::new("orders", "http://localhost:5001").with_weight(0))
            .await;
        assert!(matches!(zero_weight, Err(Error::Validation { .. })));

        assert!(registry.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deregister() {
        let (registry, _) = registry();
        let endpoint = registry
            .register(ServiceRegistration::new("orders", "http://localhost:5001"))
            .await
            .unwrap();

        assert!(registry.deregister(&endpoint.id).await.unwrap());
        assert!(!registry.deregister(&endpoint.id).await.unwrap());
        assert!(registry.get_by_id(&endpoint.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_advances_last_updated_only() {
        let (registry, clock) = registry();
        let endpoint = registry
            .register(ServiceRegistration::new("orders", "http://localhost:5001"))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(30));
        assert!(registry.heartbeat(&endpoint.id).await.unwrap());

        let after = registry.get_by_id(&endpoint.id).await.unwrap().unwrap();
        assert!(after.last_updated > endpoint.last_updated);
        assert_eq!(after.health, endpoint.health);
        assert_eq!(after.registered_at, endpoint.registered_at);
    }

    #[tokio::test]
    async fn test_heartbeat_strictly_advances_without_clock_movement() {
        let (registry, _) = registry();
        let endpoint = registry
            .register(ServiceRegistration::new("orders", "http://localhost:5001"))
            .await
            .unwrap();

        registry.heartbeat(&endpoint.id).await.unwrap();
        let after = registry.get_by_id(&endpoint.id).await.unwrap().unwrap();
        assert!(after.last_updated > endpoint.last_updated);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_id_is_not_found() {
        let (registry, _) = registry();
        assert!(!registry.heartbeat(&EndpointId::from("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_health() {
        let (registry, clock) = registry();
        let endpoint = registry
            .register(ServiceRegistration::new("orders", "http://localhost:5001"))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(1));
        let health = Health::success(clock.now(), 8);
        assert!(registry.update_health(&endpoint.id, health).await.unwrap());

        let after = registry.get_by_id(&endpoint.id).await.unwrap().unwrap();
        assert!(after.is_active());
        assert_eq!(after.health.response_time_ms, 8);
        assert!(after.last_updated > endpoint.last_updated);

        assert!(!registry
            .update_health(&EndpointId::from("nope"), Health::success(clock.now(), 1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_registries_are_isolated() {
        let (first, _) = registry();
        let (second, _) = registry();

        first
            .register(ServiceRegistration::new("orders", "http://localhost:5001"))
            .await
            .unwrap();

        assert_eq!(first.get_all().await.unwrap().len(), 1);
        assert!(second.get_all().await.unwrap().is_empty());
    }
}

//! End-to-end registry scenarios: store, registry, discovery and the
//! scheduler wired together the way the server wires them.

use async_trait::async_trait;
use hsu_common::{Health, HealthStatus, ServiceQuery, ServiceRegistration};
use hsu_monitoring::{HealthCheckData, HealthProbe};
use hsu_service_registry::{
    Clock, EndpointStore, HealthCheckScheduler, HealthChecker, HealthCheckerConfig,
    InMemoryEndpointStore, ManualClock, SchedulerConfig, ServiceDiscovery, ServiceRegistry,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ToggleProbe {
    healthy: AtomicBool,
}

#[async_trait]
impl HealthProbe for ToggleProbe {
    async fn probe(&self, _url: &str, _timeout: Duration) -> HealthCheckData {
        if self.healthy.load(Ordering::SeqCst) {
            HealthCheckData::healthy(5, Some(200))
        } else {
            HealthCheckData::unhealthy(5, "Connection failed: refused")
        }
    }
}

struct Harness {
    clock: ManualClock,
    store: Arc<dyn EndpointStore>,
    registry: Arc<ServiceRegistry>,
    discovery: ServiceDiscovery,
    scheduler: HealthCheckScheduler,
    probe: Arc<ToggleProbe>,
}

fn harness() -> Harness {
    let clock = ManualClock::new();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let store: Arc<dyn EndpointStore> =
        Arc::new(InMemoryEndpointStore::with_clock(Arc::clone(&shared)));
    let registry = Arc::new(ServiceRegistry::with_clock(Arc::clone(&store), Arc::clone(&shared)));
    let discovery = ServiceDiscovery::with_seed(Arc::clone(&store), 2024);
    let probe = Arc::new(ToggleProbe {
        healthy: AtomicBool::new(true),
    });
    let checker = HealthChecker::with_probe(
        Arc::clone(&probe) as Arc<dyn HealthProbe>,
        HealthCheckerConfig::default(),
    )
    .with_clock(shared);
    let scheduler = HealthCheckScheduler::new(
        Arc::clone(&registry),
        checker,
        SchedulerConfig::default(),
    );

    Harness {
        clock,
        store,
        registry,
        discovery,
        scheduler,
        probe,
    }
}

#[tokio::test]
async fn weighted_orders_split_roughly_one_to_three() {
    let h = harness();
    let light = h
        .registry
        .register(
            ServiceRegistration::new("Orders", "http://orders-a:8080")
                .with_version("v1")
                .with_weight(100),
        )
        .await
        .unwrap();
    let heavy = h
        .registry
        .register(
            ServiceRegistration::new("Orders", "http://orders-b:8080")
                .with_version("v1")
                .with_weight(300),
        )
        .await
        .unwrap();

    // First tick marks both healthy.
    let report = h.scheduler.run_once().await;
    assert_eq!(report.updated, 2);

    let query = ServiceQuery::new("Orders").with_version("v1");
    let (mut light_hits, mut heavy_hits) = (0u32, 0u32);
    for _ in 0..4000 {
        let picked = h.discovery.discover(&query).await.unwrap().unwrap();
        if picked.id == light.id {
            light_hits += 1;
        } else if picked.id == heavy.id {
            heavy_hits += 1;
        }
    }

    assert_eq!(light_hits + heavy_hits, 4000);
    assert!((850..=1150).contains(&light_hits), "light: {}", light_hits);
    assert!((2850..=3150).contains(&heavy_hits), "heavy: {}", heavy_hits);
}

#[tokio::test]
async fn silent_endpoint_is_evicted_after_threshold() {
    let h = harness();
    let endpoint = h
        .registry
        .register(
            ServiceRegistration::new("billing", "http://billing:8080")
                .with_health_check(false, "/health"),
        )
        .await
        .unwrap();

    h.clock.advance(Duration::from_secs(299));
    assert_eq!(h.store.cleanup_stale(Duration::from_secs(300)).await.unwrap(), 0);

    h.clock.advance(Duration::from_secs(2));
    assert_eq!(h.store.cleanup_stale(Duration::from_secs(300)).await.unwrap(), 1);
    assert!(h.registry.get_by_id(&endpoint.id).await.unwrap().is_none());
}

#[tokio::test]
async fn heartbeats_keep_an_endpoint_alive() {
    let h = harness();
    let endpoint = h
        .registry
        .register(
            ServiceRegistration::new("billing", "http://billing:8080")
                .with_health_check(false, "/health"),
        )
        .await
        .unwrap();

    for _ in 0..20 {
        h.clock.advance(Duration::from_secs(30));
        assert!(h.registry.heartbeat(&endpoint.id).await.unwrap());
        let report = h.scheduler.run_once().await;
        assert_eq!(report.removed, 0);
    }

    let alive = h.registry.get_by_id(&endpoint.id).await.unwrap().unwrap();
    assert_eq!(alive.health.status, HealthStatus::Unknown);
}

#[tokio::test]
async fn three_failed_probes_then_recovery() {
    let h = harness();
    let endpoint = h
        .registry
        .register(ServiceRegistration::new("payments", "http://payments:8080"))
        .await
        .unwrap();

    h.probe.healthy.store(false, Ordering::SeqCst);
    let mut escalated = 0;
    for _ in 0..3 {
        escalated += h.scheduler.run_once().await.escalated;
    }
    // The checker already reports Unhealthy at the threshold.
    assert_eq!(escalated, 0);

    let failed = h.registry.get_by_id(&endpoint.id).await.unwrap().unwrap();
    assert_eq!(failed.health.status, HealthStatus::Unhealthy);
    assert_eq!(failed.health.consecutive_failures, 3);
    assert!(h.discovery.get_service("payments").await.unwrap().is_none());

    h.probe.healthy.store(true, Ordering::SeqCst);
    h.scheduler.run_once().await;

    let recovered = h.registry.get_by_id(&endpoint.id).await.unwrap().unwrap();
    assert_eq!(recovered.health.status, HealthStatus::Healthy);
    assert_eq!(recovered.health.consecutive_failures, 0);
    assert_eq!(
        h.discovery.get_service("payments").await.unwrap().unwrap().id,
        endpoint.id
    );
}

#[tokio::test]
async fn long_failure_streak_stays_unhealthy() {
    let h = harness();
    let endpoint = h
        .registry
        .register(ServiceRegistration::new("payments", "http://payments:8080"))
        .await
        .unwrap();

    // Pushed health with an inconsistent status for its failure streak.
    let mut pushed = Health::unknown(h.clock.now());
    pushed.status = HealthStatus::Degraded;
    pushed.consecutive_failures = 4;
    h.registry.update_health(&endpoint.id, pushed).await.unwrap();

    h.probe.healthy.store(false, Ordering::SeqCst);
    h.scheduler.run_once().await;

    let after = h.registry.get_by_id(&endpoint.id).await.unwrap().unwrap();
    assert_eq!(after.health.status, HealthStatus::Unhealthy);
    assert_eq!(after.health.consecutive_failures, 5);
}

#[tokio::test]
async fn concurrent_registrations_get_distinct_ids() {
    let h = harness();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let registry = Arc::clone(&h.registry);
        handles.push(tokio::spawn(async move {
            registry
                .register(ServiceRegistration::new("search", "http://search:8080"))
                .await
                .unwrap()
                .id
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        assert!(ids.insert(handle.await.unwrap()));
    }
    assert_eq!(ids.len(), 50);
    assert_eq!(
        h.discovery
            .discover_all(&ServiceQuery::new("search").include_unhealthy())
            .await
            .unwrap()
            .len(),
        50
    );
}

#[tokio::test]
async fn heartbeat_strictly_advances_and_keeps_health() {
    let h = harness();
    let endpoint = h
        .registry
        .register(ServiceRegistration::new("search", "http://search:8080"))
        .await
        .unwrap();
    h.scheduler.run_once().await;
    let before = h.registry.get_by_id(&endpoint.id).await.unwrap().unwrap();

    for _ in 0..5 {
        let previous = h.registry.get_by_id(&endpoint.id).await.unwrap().unwrap();
        assert!(h.registry.heartbeat(&endpoint.id).await.unwrap());
        let current = h.registry.get_by_id(&endpoint.id).await.unwrap().unwrap();
        assert!(current.last_updated > previous.last_updated);
        assert_eq!(current.health, before.health);
    }
}

//! Client-side discovery cache.
//!
//! Each entry has two horizons. Within the fresh TTL it answers lookups
//! without touching the registry. Past that, but within the stale TTL, it is
//! only used when the registry cannot be reached.

use async_trait::async_trait;
use dashmap::DashMap;
use hsu_common::{Endpoint, EndpointId, Error, Result, ServiceQuery, ServiceRegistration};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::RegistryApi;

pub const DEFAULT_FRESH_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_STALE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    stored_at: Instant,
}

/// TTL cache keyed by string.
///
/// Uses tokio's clock, so paused-time tests can step through expiry.
#[derive(Debug)]
pub struct ServiceCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    fresh_ttl: Duration,
    stale_ttl: Duration,
}

impl<T: Clone> ServiceCache<T> {
    pub fn new(fresh_ttl: Duration, stale_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            fresh_ttl,
            stale_ttl: stale_ttl.max(fresh_ttl),
        }
    }

    /// Value stored less than the fresh TTL ago.
    pub fn get(&self, key: &str) -> Option<T> {
        self.lookup(key, self.fresh_ttl)
    }

    /// Value stored less than the stale TTL ago.
    pub fn get_stale(&self, key: &str) -> Option<T> {
        self.lookup(key, self.stale_ttl)
    }

    pub fn set(&self, key: impl Into<String>, value: T) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str, ttl: Duration) -> Option<T> {
        {
            let entry = self.entries.get(key)?;
            if entry.stored_at.elapsed() < ttl {
                return Some(entry.value.clone());
            }
        }

        // Re-checked under the shard lock so a concurrent `set` survives.
        self.entries
            .remove_if(key, |_, entry| entry.stored_at.elapsed() >= self.stale_ttl);
        None
    }
}

impl<T: Clone> Default for ServiceCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_FRESH_TTL, DEFAULT_STALE_TTL)
    }
}

/// Cache key for a query: the lowercased name plus every filter in a fixed
/// order, so equivalent queries share an entry.
pub fn query_key(query: &ServiceQuery) -> String {
    let mut key = query.service_name.to_lowercase();

    if let Some(version) = &query.version {
        key.push_str("|v=");
        key.push_str(&version.to_lowercase());
    }
    if let Some(environment) = &query.environment {
        key.push_str("|env=");
        key.push_str(&environment.to_lowercase());
    }
    if !query.only_healthy {
        key.push_str("|all");
    }

    let mut tags: Vec<_> = query.tags.iter().collect();
    tags.sort();
    for (name, value) in tags {
        key.push_str("|t:");
        key.push_str(name);
        key.push('=');
        key.push_str(&value.to_lowercase());
    }

    key
}

/// [`RegistryApi`] wrapper that caches discovery answers.
///
/// Registration calls pass straight through.
pub struct CachedDiscovery<A> {
    inner: Arc<A>,
    endpoints: ServiceCache<Endpoint>,
    instances: ServiceCache<Vec<Endpoint>>,
}

impl<A: RegistryApi> CachedDiscovery<A> {
    pub fn new(inner: Arc<A>) -> Self {
        Self::with_ttls(inner, DEFAULT_FRESH_TTL, DEFAULT_STALE_TTL)
    }

    pub fn with_ttls(inner: Arc<A>, fresh_ttl: Duration, stale_ttl: Duration) -> Self {
        Self {
            inner,
            endpoints: ServiceCache::new(fresh_ttl, stale_ttl),
            instances: ServiceCache::new(fresh_ttl, stale_ttl),
        }
    }

    pub fn inner(&self) -> &Arc<A> {
        &self.inner
    }

    /// Drops every cached answer.
    pub fn clear(&self) {
        self.endpoints.clear();
        self.instances.clear();
        debug!("Discovery cache cleared");
    }

    async fn cached_endpoint<F>(&self, key: String, fetch: F) -> Result<Option<Endpoint>>
    where
        F: std::future::Future<Output = Result<Option<Endpoint>>> + Send,
    {
        if let Some(hit) = self.endpoints.get(&key) {
            debug!("Cache hit for service: {}", key);
            return Ok(Some(hit));
        }

        match fetch.await {
            Ok(Some(endpoint)) => {
                self.endpoints.set(key, endpoint.clone());
                Ok(Some(endpoint))
            }
            Ok(None) => Ok(None),
            Err(e) => match fallback(&self.endpoints, &key, &e) {
                Some(stale) => Ok(Some(stale)),
                None => Err(e),
            },
        }
    }
}

fn fallback<T: Clone>(cache: &ServiceCache<T>, key: &str, error: &Error) -> Option<T> {
    if error.is_not_found() {
        return None;
    }
    let stale = cache.get_stale(key)?;
    warn!("Using stale cache for service {} after error: {}", key, error);
    Some(stale)
}

#[async_trait]
impl<A: RegistryApi> RegistryApi for CachedDiscovery<A> {
    async fn register(&self, registration: &ServiceRegistration) -> Result<Endpoint> {
        self.inner.register(registration).await
    }

    async fn deregister(&self, id: &EndpointId) -> Result<bool> {
        self.inner.deregister(id).await
    }

    async fn heartbeat(&self, id: &EndpointId) -> Result<bool> {
        self.inner.heartbeat(id).await
    }

    async fn discover(&self, service_name: &str) -> Result<Option<Endpoint>> {
        let key = service_name.to_lowercase();
        self.cached_endpoint(key, self.inner.discover(service_name)).await
    }

    async fn discover_query(&self, query: &ServiceQuery) -> Result<Option<Endpoint>> {
        self.cached_endpoint(query_key(query), self.inner.discover_query(query))
            .await
    }

    async fn get_all_instances(&self, service_name: &str) -> Result<Vec<Endpoint>> {
        let key = service_name.to_lowercase();
        if let Some(hit) = self.instances.get(&key) {
            debug!("Cache hit for instances of: {}", key);
            return Ok(hit);
        }

        match self.inner.get_all_instances(service_name).await {
            Ok(endpoints) => {
                self.instances.set(key, endpoints.clone());
                Ok(endpoints)
            }
            Err(e) => fallback(&self.instances, &key, &e).ok_or(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hsu_common::Health;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Remote that counts calls and can be switched off.
    struct FakeRemote {
        calls: AtomicUsize,
        down: AtomicBool,
        known: bool,
    }

    impl FakeRemote {
        fn new(known: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                down: AtomicBool::new(false),
                known,
            })
        }

        fn check(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(Error::Protocol("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn endpoint(name: &str) -> Endpoint {
        let now = Utc::now();
        Endpoint {
            id: EndpointId::generate(),
            service_name: name.to_string(),
            version: "v1".to_string(),
            base_url: "http://orders:8080".to_string(),
            environment: "Development".to_string(),
            weight: 100,
            tags: HashMap::new(),
            health: Health::success(now, 1),
            health_check_enabled: true,
            health_check_path: "/health".to_string(),
            health_check_interval_seconds: 30,
            registered_at: now,
            last_updated: now,
        }
    }

    #[async_trait]
    impl RegistryApi for FakeRemote {
        async fn register(&self, _registration: &ServiceRegistration) -> Result<Endpoint> {
            self.check()?;
            Ok(endpoint("orders"))
        }
        async fn deregister(&self, _id: &EndpointId) -> Result<bool> {
            self.check().map(|_| true)
        }
        async fn heartbeat(&self, _id: &EndpointId) -> Result<bool> {
            self.check().map(|_| true)
        }
        async fn discover(&self, service_name: &str) -> Result<Option<Endpoint>> {
            self.check()?;
            Ok(self.known.then(|| endpoint(service_name)))
        }
        async fn discover_query(&self, query: &ServiceQuery) -> Result<Option<Endpoint>> {
            self.discover(&query.service_name).await
        }
        async fn get_all_instances(&self, service_name: &str) -> Result<Vec<Endpoint>> {
            self.check()?;
            Ok(if self.known { vec![endpoint(service_name)] } else { Vec::new() })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_hit_skips_remote() {
        let remote = FakeRemote::new(true);
        let cached = CachedDiscovery::new(Arc::clone(&remote));

        let first = cached.discover("orders").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        let second = cached.discover("Orders").await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_refetches() {
        let remote = FakeRemote::new(true);
        let cached = CachedDiscovery::new(Arc::clone(&remote));

        cached.discover("orders").await.unwrap();
        tokio::time::advance(DEFAULT_FRESH_TTL + Duration::from_secs(1)).await;
        cached.discover("orders").await.unwrap();

        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fallback_on_remote_failure() {
        let remote = FakeRemote::new(true);
        let cached = CachedDiscovery::new(Arc::clone(&remote));

        let original = cached.discover("orders").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        remote.down.store(true, Ordering::SeqCst);

        let fallback = cached.discover("orders").await.unwrap().unwrap();
        assert_eq!(fallback.id, original.id);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_past_stale_ttl_propagates() {
        let remote = FakeRemote::new(true);
        let cached = CachedDiscovery::new(Arc::clone(&remote));

        cached.discover("orders").await.unwrap();
        tokio::time::advance(DEFAULT_STALE_TTL + Duration::from_secs(1)).await;
        remote.down.store(true, Ordering::SeqCst);

        assert!(matches!(cached.discover("orders").await, Err(Error::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_cache_propagates() {
        let remote = FakeRemote::new(true);
        remote.down.store(true, Ordering::SeqCst);
        let cached = CachedDiscovery::new(Arc::clone(&remote));

        assert!(cached.discover("orders").await.is_err());
        assert!(cached.get_all_instances("orders").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_cached() {
        let remote = FakeRemote::new(false);
        let cached = CachedDiscovery::new(Arc::clone(&remote));

        assert!(cached.discover("orders").await.unwrap().is_none());
        assert!(cached.discover("orders").await.unwrap().is_none());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_forces_refetch() {
        let remote = FakeRemote::new(true);
        let cached = CachedDiscovery::new(Arc::clone(&remote));

        cached.discover("orders").await.unwrap();
        cached.get_all_instances("orders").await.unwrap();
        cached.clear();
        cached.discover("orders").await.unwrap();
        cached.get_all_instances("orders").await.unwrap();

        assert_eq!(remote.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instances_stale_fallback() {
        let remote = FakeRemote::new(true);
        let cached = CachedDiscovery::new(Arc::clone(&remote));

        cached.get_all_instances("orders").await.unwrap();
        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        remote.down.store(true, Ordering::SeqCst);

        assert_eq!(cached.get_all_instances("orders").await.unwrap().len(), 1);
    }

    #[test]
    fn test_query_key_is_canonical() {
        let a = ServiceQuery::new("Orders")
            .with_version("V1")
            .with_tag("region", "eu")
            .with_tag("tier", "gold");
        let b = ServiceQuery::new("orders")
            .with_tag("tier", "GOLD")
            .with_tag("region", "EU")
            .with_version("v1");
        let c = ServiceQuery::new("orders").with_version("v2");

        assert_eq!(query_key(&a), query_key(&b));
        assert_ne!(query_key(&a), query_key(&c));
        assert_ne!(query_key(&c), query_key(&c.clone().include_unhealthy()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_cache_horizons() {
        let cache: ServiceCache<u32> =
            ServiceCache::new(Duration::from_secs(10), Duration::from_secs(100));
        cache.set("a", 1);

        assert_eq!(cache.get("a"), Some(1));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get_stale("a"), Some(1));
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(cache.get_stale("a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_keeps_a_fresh_replacement() {
        let cache: ServiceCache<u32> =
            ServiceCache::new(Duration::from_secs(10), Duration::from_secs(100));
        cache.set("a", 1);
        tokio::time::advance(Duration::from_secs(101)).await;

        // Fresh value lands before the expired one is purged.
        cache.set("a", 2);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.get_stale("a"), Some(2));

        cache.set("b", 3);
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.len(), 2);
    }
}

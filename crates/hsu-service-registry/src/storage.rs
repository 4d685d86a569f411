//! Endpoint storage for the service registry.
//!
//! # Rust Learning Note
//!
//! This module demonstrates **concurrent data structures** in Rust.
//!
//! ## DashMap vs RwLock<HashMap>
//!
//! ```rust,ignore
//! struct InMemoryEndpointStore {
//!     endpoints: DashMap<EndpointId, Endpoint>,
//! }
//!
//! fn get(&self, id: &EndpointId) -> Option<Endpoint> {
//!     self.endpoints.get(id).map(|entry| entry.clone())
//! }
//! // No manual locking needed!
//! ```
//!
//! DashMap shards the map and locks one shard at a time:
//! - Writes to the same identity are serialized by that shard's lock
//! - Reads of other identities proceed concurrently
//! - Every read hands back a clone, so callers never observe a record
//!   half-way through a mutation
//!
//! ## Trait at the seam
//!
//! The registry talks to [`EndpointStore`], not to DashMap, so another
//! backend (a database, a cache server) can be plugged in. Such backends
//! report outages as [`Error::StoreUnavailable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hsu_common::{Endpoint, EndpointId, Error, Health, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::{self, Clock};

/// An atomic, per-identity change to a stored endpoint.
///
/// Mutations are applied under the record's lock, so a heartbeat and a
/// health update landing at the same moment never overwrite each other.
#[derive(Debug, Clone)]
pub enum EndpointMutation {
    /// Liveness signal: only `last_updated` moves.
    Touch,
    /// Replace the health value (and move `last_updated`).
    SetHealth(Health),
}

/// Storage contract for registered endpoints.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    /// Idempotent upsert keyed by identity. Always stamps `last_updated`.
    async fn save(&self, endpoint: Endpoint) -> Result<Endpoint>;

    /// Removes an endpoint. Returns whether it existed.
    async fn delete(&self, id: &EndpointId) -> Result<bool>;

    async fn get_by_id(&self, id: &EndpointId) -> Result<Option<Endpoint>>;

    /// Snapshot of every endpoint.
    async fn get_all(&self) -> Result<Vec<Endpoint>>;

    /// Endpoints whose service name matches `name`, ignoring case.
    async fn find_by_name(&self, name: &str) -> Result<Vec<Endpoint>>;

    /// Applies `mutation` atomically. `Ok(None)` if the identity is unknown.
    async fn modify(&self, id: &EndpointId, mutation: EndpointMutation) -> Result<Option<Endpoint>>;

    /// Removes every endpoint whose `last_updated` is older than
    /// `now - threshold`, returning how many were removed.
    async fn cleanup_stale(&self, threshold: Duration) -> Result<usize>;
}

/// Thread-safe in-memory endpoint storage.
///
/// Cloning is cheap and clones share the same map, which makes it easy to
/// hand the same store to the registry, discovery and scheduler.
#[derive(Clone)]
pub struct InMemoryEndpointStore {
    endpoints: Arc<DashMap<EndpointId, Endpoint>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEndpointStore {
    /// Creates a new empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(clock::system_clock())
    }

    /// Creates a new empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            endpoints: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Returns the number of stored endpoints.
    pub fn count(&self) -> usize {
        self.endpoints.len()
    }

    /// Clears all entries from the store.
    pub fn clear(&self) {
        self.endpoints.clear();
        info!("Cleared all registry entries");
    }

    /// Current time, strictly after `previous` even if the clock stalled.
    fn stamp(&self, previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let now = self.clock.now();
        match previous {
            Some(previous) if previous >= now => previous + chrono::Duration::nanoseconds(1),
            _ => now,
        }
    }
}

impl Default for InMemoryEndpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointStore for InMemoryEndpointStore {
    async fn save(&self, mut endpoint: Endpoint) -> Result<Endpoint> {
        let id = endpoint.id.clone();
        match self.endpoints.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                endpoint.last_updated = self.stamp(Some(occupied.get().last_updated));
                occupied.insert(endpoint.clone());
            }
            Entry::Vacant(vacant) => {
                endpoint.last_updated = self.stamp(None);
                vacant.insert(endpoint.clone());
            }
        }

        debug!("Saved endpoint {} ({})", id, endpoint.service_name);
        Ok(endpoint)
    }

    async fn delete(&self, id: &EndpointId) -> Result<bool> {
        let removed = self.endpoints.remove(id).is_some();
        if removed {
            debug!("Deleted endpoint {}", id);
        }
        Ok(removed)
    }

    async fn get_by_id(&self, id: &EndpointId) -> Result<Option<Endpoint>> {
        Ok(self.endpoints.get(id).map(|entry| entry.clone()))
    }

    async fn get_all(&self) -> Result<Vec<Endpoint>> {
        Ok(self
            .endpoints
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find_by_name(&self, name: &str) -> Result<Vec<Endpoint>> {
        let wanted = name.to_lowercase();
        Ok(self
            .endpoints
            .iter()
            .filter(|entry| entry.service_name.to_lowercase() == wanted)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn modify(
        &self,
        id: &EndpointId,
        mutation: EndpointMutation,
    ) -> Result<Option<Endpoint>> {
        let Some(mut entry) = self.endpoints.get_mut(id) else {
            return Ok(None);
        };

        if let EndpointMutation::SetHealth(health) = mutation {
            entry.health = health;
        }
        entry.last_updated = self.stamp(Some(entry.last_updated));

        Ok(Some(entry.clone()))
    }

    async fn cleanup_stale(&self, threshold: Duration) -> Result<usize> {
        let cutoff = self.clock.now() - clock::to_chrono(threshold);
        let mut removed = Vec::new();

        self.endpoints.retain(|id, endpoint| {
            let keep = endpoint.last_updated >= cutoff;
            if !keep {
                removed.push((id.clone(), endpoint.service_name.clone()));
            }
            keep
        });

        for (id, service_name) in &removed {
            info!("Removed stale endpoint: {} ({})", service_name, id);
        }

        Ok(removed.len())
    }
}

/// Maps a failed lookup to the error used at API boundaries.
pub fn require(endpoint: Option<Endpoint>, id: &EndpointId) -> Result<Endpoint> {
    endpoint.ok_or_else(|| Error::endpoint_not_found(id.clone()))
}

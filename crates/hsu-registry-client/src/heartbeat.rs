//! Registration lifecycle for a running service.
//!
//! # Rust Learning Note
//!
//! The sender is one async loop driven by `tokio::select!`:
//!
//! ```rust,ignore
//! loop {
//!     tokio::select! {
//!         _ = shutdown.cancelled() => break,
//!         _ = ticker.tick() => self.beat().await,
//!     }
//! }
//! ```
//!
//! Cancellation is cooperative: the token is checked between heartbeats,
//! and the final deregistration runs under its own timeout so a dead
//! registry cannot hold up process exit.

use hsu_common::{Endpoint, EndpointId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::client::RegistryApi;
use crate::options::ServiceRegistrationOptions;

/// Registers on start, heartbeats periodically, deregisters on shutdown.
pub struct HeartbeatSender {
    api: Arc<dyn RegistryApi>,
    options: ServiceRegistrationOptions,
    endpoint_id: Mutex<Option<EndpointId>>,
}

impl HeartbeatSender {
    pub fn new(api: Arc<dyn RegistryApi>, options: ServiceRegistrationOptions) -> Self {
        Self {
            api,
            options,
            endpoint_id: Mutex::new(None),
        }
    }

    /// Identity assigned by the registry, once registered.
    pub fn endpoint_id(&self) -> Option<EndpointId> {
        self.endpoint_id.lock().clone()
    }

    /// Registers this service. Failures are logged; the loop retries.
    pub async fn register(&self) -> Option<Endpoint> {
        let registration = self.options.to_registration();
        match self.api.register(&registration).await {
            Ok(endpoint) => {
                info!(
                    "Service auto-registered: {} (ID: {})",
                    endpoint.service_name, endpoint.id
                );
                *self.endpoint_id.lock() = Some(endpoint.id.clone());
                Some(endpoint)
            }
            Err(e) => {
                error!(
                    "Failed to auto-register service {}: {}",
                    registration.service_name, e
                );
                None
            }
        }
    }

    /// Sends one heartbeat, or registers if there is no identity yet.
    pub async fn beat(&self) {
        let Some(id) = self.endpoint_id() else {
            self.register().await;
            return;
        };

        match self.api.heartbeat(&id).await {
            Ok(true) => trace!("Heartbeat sent for {}", id),
            Ok(false) => {
                warn!("Registry no longer knows {}; registering again", id);
                *self.endpoint_id.lock() = None;
                self.register().await;
            }
            Err(e) => warn!("Failed to send heartbeat for {}: {}", id, e),
        }
    }

    /// Best-effort removal from the registry, bounded by the configured
    /// deregistration timeout.
    pub async fn deregister(&self) {
        let Some(id) = self.endpoint_id.lock().take() else {
            return;
        };

        match timeout(self.options.deregister_timeout, self.api.deregister(&id)).await {
            Ok(Ok(true)) => info!("Service deregistered (ID: {})", id),
            Ok(Ok(false)) => debug!("Registry had already dropped {}", id),
            Ok(Err(e)) => warn!("Failed to deregister {}: {}", id, e),
            Err(_) => warn!(
                "Deregistration of {} timed out after {:?}",
                id, self.options.deregister_timeout
            ),
        }
    }

    /// Full lifecycle until `shutdown` is cancelled.
    ///
    /// Does nothing when auto registration is disabled.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.options.auto_register {
            info!("Auto-registration disabled");
            return;
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = self.register() => {}
        }

        let period = self.options.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.beat() => {}
                    }
                }
            }
        }

        self.deregister().await;
    }

    /// Runs the lifecycle on its own task.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

//! Service registry server implementation.
//!
//! # Rust Learning Note
//!
//! ## Key Concepts
//!
//! 1. **Tokio Runtime**: The async executor that drives the listener and the
//!    scheduler task
//! 2. **Graceful Shutdown**: One `CancellationToken` stops both the HTTP
//!    server and the background health checks
//! 3. **Explicit wiring**: the store is created once and handed to every
//!    component by `Arc`, so tests can build several servers side by side

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{create_router, AppState};
use crate::clock::{self, Clock};
use crate::config::RegistryConfig;
use crate::discovery::ServiceDiscovery;
use crate::health_checker::HealthChecker;
use crate::registry::ServiceRegistry;
use crate::scheduler::HealthCheckScheduler;
use crate::storage::{EndpointStore, InMemoryEndpointStore};

/// Service registry server.
///
/// Owns one store and every component built on top of it.
pub struct RegistryServer {
    config: RegistryConfig,
    registry: Arc<ServiceRegistry>,
    discovery: Arc<ServiceDiscovery>,
    scheduler: Arc<HealthCheckScheduler>,
    router: Router,
}

impl RegistryServer {
    /// Creates a server backed by a fresh in-memory store.
    pub fn new(config: RegistryConfig) -> Self {
        let clock = clock::system_clock();
        let store: Arc<dyn EndpointStore> =
            Arc::new(InMemoryEndpointStore::with_clock(Arc::clone(&clock)));
        let checker = HealthChecker::new(config.health_check.checker_config())
            .with_clock(Arc::clone(&clock));
        Self::with_components(config, store, checker, clock)
    }

    /// Creates a server over caller-supplied parts.
    pub fn with_components(
        config: RegistryConfig,
        store: Arc<dyn EndpointStore>,
        checker: HealthChecker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::with_clock(Arc::clone(&store), clock));
        let discovery = Arc::new(match config.discovery.seed {
            Some(seed) => ServiceDiscovery::with_seed(store, seed),
            None => ServiceDiscovery::new(store),
        });
        let scheduler = Arc::new(HealthCheckScheduler::new(
            Arc::clone(&registry),
            checker,
            config.health_check.scheduler_config(),
        ));
        let router = create_router(AppState {
            registry: Arc::clone(&registry),
            discovery: Arc::clone(&discovery),
        });

        Self {
            config,
            registry,
            discovery,
            scheduler,
            router,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn discovery(&self) -> &Arc<ServiceDiscovery> {
        &self.discovery
    }

    pub fn scheduler(&self) -> &Arc<HealthCheckScheduler> {
        &self.scheduler
    }

    /// The HTTP router, for embedding or testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Binds the configured address and serves until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.config.bind_address();
        info!("Binding to TCP: {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` fires.
    ///
    /// The health-check scheduler runs for exactly as long as the listener.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local_addr: SocketAddr =
            listener.local_addr().context("Listener has no local address")?;
        info!("Service registry listening on {}", local_addr);

        let scheduler_token = shutdown.child_token();
        let scheduler_handle = Arc::clone(&self.scheduler).spawn(scheduler_token.clone());

        let server_token = shutdown.clone();
        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { server_token.cancelled().await })
            .await
            .context("HTTP server failed");

        // The server can also stop on its own error; the scheduler follows it.
        scheduler_token.cancel();
        if let Err(e) = scheduler_handle.await {
            error!("Health check scheduler task failed: {}", e);
        }

        info!("Service registry stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_server_creation() {
        let server = RegistryServer::new(RegistryConfig::default());
        assert!(server.registry().get_all().await.unwrap().is_empty());
        assert_eq!(server.config().server.port, 5100);
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let server = RegistryServer::new(RegistryConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_reports_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut config = RegistryConfig::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = port;

        let err = RegistryServer::new(config)
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to bind"));
    }
}

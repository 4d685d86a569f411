//! # HSU Service Registry
//!
//! Service registration and discovery for HSU services.
//!
//! This crate provides:
//! - A pluggable endpoint store (thread-safe in-memory default on DashMap)
//! - The registry (register, deregister, heartbeat, health updates)
//! - Discovery with query filters and weighted random selection
//! - Active HTTP health checking on a background schedule with staleness eviction
//! - An HTTP API and a standalone server executable

pub mod api;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod health_checker;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod types;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RegistryConfig;
pub use discovery::ServiceDiscovery;
pub use health_checker::{HealthChecker, HealthCheckerConfig};
pub use registry::ServiceRegistry;
pub use scheduler::{HealthCheckScheduler, SchedulerConfig, TickReport};
pub use server::RegistryServer;
pub use storage::{EndpointMutation, EndpointStore, InMemoryEndpointStore};

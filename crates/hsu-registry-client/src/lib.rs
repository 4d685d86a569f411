//! # HSU Registry Client
//!
//! What a service links in to take part in registration and discovery:
//!
//! - [`ServiceRegistryClient`]: HTTP client for the registry API
//! - [`CachedDiscovery`]: discovery cache with stale fallback
//! - [`HeartbeatSender`]: register on start, heartbeat, deregister on shutdown
//! - [`ServiceRegistrationOptions`]: YAML-loadable settings for the above

pub mod cache;
pub mod client;
pub mod heartbeat;
pub mod options;

pub use cache::{query_key, CachedDiscovery, ServiceCache};
pub use client::{RegistryApi, ServiceRegistryClient};
pub use heartbeat::HeartbeatSender;
pub use options::ServiceRegistrationOptions;

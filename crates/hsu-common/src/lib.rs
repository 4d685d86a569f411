//! # HSU Common
//! 
//! Common types, traits, and utilities shared across the HSU service registry
//! crates.
//! 
//! This crate provides the foundational abstractions that the registry server,
//! the health monitoring layer and the registry client build upon: the error
//! type and the endpoint domain model that travels over the wire.

pub mod duration_serde;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use errors::{Error, Result};
pub use types::{
    Endpoint, EndpointId, Health, HealthStatus, ServiceQuery, ServiceRegistration,
    UNHEALTHY_THRESHOLD,
};

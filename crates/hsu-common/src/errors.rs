//! Error types for the HSU service registry.
//!
//! # Rust Learning Note
//!
//! Rust doesn't have exceptions - it uses `Result<T, E>` for error handling.
//! This module defines the error type shared by the registry server, the
//! store implementations and the registry client.
//!
//! ```rust
//! use hsu_common::{Error, Result};
//!
//! fn do_something() -> Result<()> {
//!     Err(Error::validation("service name is required"))
//! }
//!
//! fn caller() -> Result<()> {
//!     // Caller uses ? operator (automatic propagation)
//!     do_something()?;
//!     Ok(())
//! }
//! ```

use crate::types::EndpointId;
use thiserror::Error;

/// Result type alias for HSU operations.
///
/// This is a convenience alias so we can write `Result<T>` instead of
/// `Result<T, Error>` throughout the codebase.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for HSU registry operations.
///
/// # Rust Learning Note
///
/// We use the `thiserror` crate to automatically derive error traits.
/// Each variant can carry additional context data, and callers can
/// pattern match on the variant to decide how to react (a missing endpoint
/// is answered with a 404, an unreachable store is retried on the next tick).
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input (e.g. a registration without a service name).
    #[error("Validation error: {message}")]
    Validation {
        message: String,
    },

    /// An endpoint identity is not known to the registry.
    #[error("Endpoint not found: {id}")]
    EndpointNotFound {
        id: EndpointId,
    },

    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Transport error talking to a remote registry.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Creates a Validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an endpoint not found error.
    pub fn endpoint_not_found(id: EndpointId) -> Self {
        Self::EndpointNotFound { id }
    }

    /// Creates a store unavailable error.
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable(reason.into())
    }

    /// Returns true for errors that describe a missing resource rather than
    /// a failure to talk to something.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::EndpointNotFound { .. })
    }
}

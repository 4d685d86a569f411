//! Wire types specific to the registry's HTTP API.
//!
//! Domain types ([`Endpoint`](hsu_common::Endpoint),
//! [`ServiceRegistration`](hsu_common::ServiceRegistration),
//! [`ServiceQuery`](hsu_common::ServiceQuery), ...) live in `hsu-common` so the
//! client crate can share them without pulling in axum.
//!
//! # Rust Learning Note
//!
//! ## derive Macros
//!
//! ```rust,ignore
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! ```
//!
//! `Serialize` and `Deserialize` are generated at compile time, so a typo in
//! a field name is a build error rather than a silently missing JSON key.

use serde::{Deserialize, Serialize};

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of operations that succeed without returning a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

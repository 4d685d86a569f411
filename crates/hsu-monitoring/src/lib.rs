//! # HSU Monitoring
//!
//! Active health probing for the HSU service registry.
//!
//! This crate provides:
//! - The [`HealthProbe`] trait: "is the thing behind this URL healthy?"
//! - An HTTP implementation ([`HttpProbe`]) built on hyper
//! - [`HealthCheckData`], the raw outcome of a single probe
//!
//! Mapping a probe outcome onto an endpoint's health (failure streaks,
//! degraded/unhealthy thresholds) is the registry's job, not this crate's.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Health check error types.
#[derive(Error, Debug)]
pub enum HealthCheckError {
    #[error("Health check timeout: {id}")]
    Timeout { id: String },

    #[error("Health check connection failed: {id} - {reason}")]
    ConnectionFailed { id: String, reason: String },

    #[error("Health check invalid response: {id} - HTTP {status}")]
    InvalidResponse { id: String, status: u16 },

    #[error("Health check invalid target: {id} - {reason}")]
    InvalidTarget { id: String, reason: String },
}

/// Result type for health check operations.
pub type HealthCheckResult<T> = Result<T, HealthCheckError>;

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckData {
    pub is_healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub response_time_ms: u64,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

impl HealthCheckData {
    /// A passing probe.
    pub fn healthy(response_time_ms: u64, status_code: Option<u16>) -> Self {
        Self {
            is_healthy: true,
            checked_at: Utc::now(),
            response_time_ms,
            status_code,
            error_message: None,
        }
    }

    /// A failing probe with a human readable reason.
    pub fn unhealthy(response_time_ms: u64, reason: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            checked_at: Utc::now(),
            response_time_ms,
            status_code: None,
            error_message: Some(reason.into()),
        }
    }

    /// Converts a probe error into a failing outcome.
    pub fn from_error(error: &HealthCheckError, response_time_ms: u64) -> Self {
        match error {
            HealthCheckError::Timeout { .. } => Self::unhealthy(response_time_ms, "Timeout"),
            HealthCheckError::ConnectionFailed { reason, .. } => {
                Self::unhealthy(response_time_ms, format!("Connection failed: {}", reason))
            }
            HealthCheckError::InvalidResponse { status, .. } => {
                let mut data = Self::unhealthy(response_time_ms, format!("HTTP {}", status));
                data.status_code = Some(*status);
                data
            }
            HealthCheckError::InvalidTarget { .. } => {
                Self::unhealthy(response_time_ms, error.to_string())
            }
        }
    }
}

/// Something that can actively check a health URL.
///
/// Implementations must enforce `timeout` themselves and never panic on
/// network errors: every failure mode is reported as an unhealthy
/// [`HealthCheckData`].
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> HealthCheckData;
}

pub use http::*;

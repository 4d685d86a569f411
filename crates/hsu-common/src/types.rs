//! Core domain types used throughout the HSU service registry.
//!
//! These types travel over the wire between the registry server and its
//! clients, so all of them derive `Serialize`/`Deserialize` with camelCase
//! field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Number of consecutive failed probes after which an endpoint is
/// considered `Unhealthy`. Fewer failures only mark it `Degraded`.
pub const UNHEALTHY_THRESHOLD: u32 = 3;

/// Endpoint identifier - uniquely identifies a registered service instance.
///
/// Identities are generated by the registry at registration time and are
/// never reused.
///
/// # Example
/// ```
/// use hsu_common::EndpointId;
///
/// let id = EndpointId::from("3f2c");
/// assert_eq!(id.as_str(), "3f2c");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Creates a new EndpointId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identity (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the endpoint ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EndpointId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Health status of an endpoint.
///
/// # Rust Learning Note
///
/// An enum instead of string constants: the compiler makes sure every
/// `match` handles all four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HealthStatus {
    /// Not probed yet.
    #[default]
    Unknown,
    Healthy,
    /// Failing, but below the unhealthy threshold.
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "Unknown",
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Unhealthy => "Unhealthy",
        }
    }

    /// Status implied by a number of consecutive failures.
    pub fn for_failures(consecutive_failures: u32) -> Self {
        match consecutive_failures {
            0 => HealthStatus::Healthy,
            n if n >= UNHEALTHY_THRESHOLD => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health of an endpoint as last observed by a probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: HealthStatus,

    pub last_checked: DateTime<Utc>,

    pub response_time_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub consecutive_failures: u32,

    /// Free-form probe details (status code, error kind, ...).
    #[serde(default)]
    pub details: HashMap<String, String>,
}

impl Health {
    /// Health of an endpoint that has never been probed.
    pub fn unknown(now: DateTime<Utc>) -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_checked: now,
            response_time_ms: 0,
            message: None,
            consecutive_failures: 0,
            details: HashMap::new(),
        }
    }

    /// Result of a successful probe: healthy, failure streak reset.
    pub fn success(checked_at: DateTime<Utc>, response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_checked: checked_at,
            response_time_ms,
            message: Some("OK".to_string()),
            consecutive_failures: 0,
            details: HashMap::new(),
        }
    }

    /// Result of a failed probe, continuing the failure streak of `previous`.
    ///
    /// The status is `Degraded` until the streak reaches
    /// [`UNHEALTHY_THRESHOLD`], then `Unhealthy`.
    pub fn failure(
        previous: &Health,
        checked_at: DateTime<Utc>,
        response_time_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        let consecutive_failures = previous.consecutive_failures.saturating_add(1);
        Self {
            status: HealthStatus::for_failures(consecutive_failures),
            last_checked: checked_at,
            response_time_ms,
            message: Some(message.into()),
            consecutive_failures,
            details: HashMap::new(),
        }
    }

    /// Adds a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Forces `Unhealthy` once the failure streak reached the threshold.
    ///
    /// Returns true if the status was changed.
    pub fn escalate(&mut self) -> bool {
        if self.consecutive_failures >= UNHEALTHY_THRESHOLD
            && self.status != HealthStatus::Unhealthy
        {
            self.status = HealthStatus::Unhealthy;
            return true;
        }
        false
    }
}

/// A registered service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: EndpointId,
    pub service_name: String,
    pub version: String,
    /// Base address without a trailing slash (e.g. `http://10.0.0.5:8080`).
    pub base_url: String,
    pub environment: String,
    pub weight: u32,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub health: Health,

    #[serde(default)]
    pub health_check_enabled: bool,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,

    pub registered_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Endpoint {
    /// An endpoint is active exactly when its last known health is `Healthy`.
    ///
    /// Derived on every call so it can never drift from `health.status`.
    pub fn is_active(&self) -> bool {
        self.health.status == HealthStatus::Healthy
    }

    /// Full URL probed by the health checker.
    pub fn health_check_url(&self) -> String {
        let path = &self.health_check_path;
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// True if every requested tag is present with an equal value
    /// (values compared case-insensitively).
    pub fn matches_tags(&self, required: &HashMap<String, String>) -> bool {
        required.iter().all(|(key, value)| {
            self.tags
                .get(key)
                .map(|actual| actual.eq_ignore_ascii_case(value))
                .unwrap_or(false)
        })
    }
}

/// Input to create an [`Endpoint`].
///
/// Every field except the service name and base address has a default, so
/// a JSON body of `{"serviceName": "orders", "baseUrl": "http://..."}` is a
/// complete registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    #[serde(default)]
    pub service_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enable_health_check: bool,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,
}

impl ServiceRegistration {
    /// Creates a registration with default version, environment and weight.
    pub fn new(service_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_health_check(mut self, enabled: bool, path: impl Into<String>) -> Self {
        self.enable_health_check = enabled;
        self.health_check_path = path.into();
        self
    }
}

impl Default for ServiceRegistration {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            version: default_version(),
            base_url: String::new(),
            environment: default_environment(),
            weight: default_weight(),
            tags: HashMap::new(),
            enable_health_check: true,
            health_check_path: default_health_check_path(),
            health_check_interval_seconds: default_health_check_interval_seconds(),
        }
    }
}

/// Discovery query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceQuery {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default = "default_true")]
    pub only_healthy: bool,
    /// All of these tags must match. Empty means no tag filter.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl ServiceQuery {
    /// Query by name only, healthy instances only.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            version: None,
            environment: None,
            only_healthy: true,
            tags: HashMap::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn include_unhealthy(mut self) -> Self {
        self.only_healthy = false;
        self
    }
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_environment() -> String {
    "Development".to_string()
}

fn default_weight() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_health_check_interval_seconds() -> u64 {
    30
}

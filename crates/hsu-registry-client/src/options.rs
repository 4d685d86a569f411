//! Self-registration options for a service that uses the registry.
//!
//! ```yaml
//! auto_register: true
//! registry_url: http://registry:5100
//! service_name: orders
//! base_url: http://10.0.0.5:8080
//! weight: 200
//! tags:
//!   region: eu
//! heartbeat_interval: 30s
//! ```

use anyhow::{anyhow, Context};
use hsu_common::duration_serde;
use hsu_common::ServiceRegistration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::cache::{DEFAULT_FRESH_TTL, DEFAULT_STALE_TTL};

/// How a service registers itself and talks to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistrationOptions {
    #[serde(default)]
    pub auto_register: bool,

    #[serde(default = "default_registry_url")]
    pub registry_url: String,

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

    #[serde(default = "default_health_check_interval", with = "duration_serde")]
    pub health_check_interval: Duration,

    #[serde(default = "default_heartbeat_interval", with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// Upper bound on the deregistration attempt during shutdown.
    #[serde(default = "default_deregister_timeout", with = "duration_serde")]
    pub deregister_timeout: Duration,

    #[serde(default = "default_cache_ttl", with = "duration_serde")]
    pub cache_ttl: Duration,

    #[serde(default = "default_stale_cache_ttl", with = "duration_serde")]
    pub stale_cache_ttl: Duration,
}

impl Default for ServiceRegistrationOptions {
    fn default() -> Self {
        Self {
            auto_register: false,
            registry_url: default_registry_url(),
            service_name: String::new(),
            version: default_version(),
            base_url: String::new(),
            environment: default_environment(),
            weight: default_weight(),
            tags: HashMap::new(),
            enable_health_check: true,
            health_check_path: default_health_check_path(),
            health_check_interval: default_health_check_interval(),
            heartbeat_interval: default_heartbeat_interval(),
            deregister_timeout: default_deregister_timeout(),
            cache_ttl: default_cache_ttl(),
            stale_cache_ttl: default_stale_cache_ttl(),
        }
    }
}

impl ServiceRegistrationOptions {
    pub fn new(service_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            auto_register: true,
            service_name: service_name.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read options file: {}", path.as_ref().display()))?;
        Self::load_from_string(&content)
    }

    pub fn load_from_string(content: &str) -> anyhow::Result<Self> {
        let options: Self =
            serde_yaml::from_str(content).context("Failed to parse registration options")?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.registry_url.trim().is_empty() {
            return Err(anyhow!("Registry URL cannot be empty"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(anyhow!("Heartbeat interval must be greater than 0"));
        }
        if self.stale_cache_ttl < self.cache_ttl {
            return Err(anyhow!("Stale cache TTL must not be shorter than the cache TTL"));
        }
        if self.auto_register {
            if self.service_name.trim().is_empty() {
                return Err(anyhow!("Service name is required for auto registration"));
            }
            if self.base_url.trim().is_empty() {
                return Err(anyhow!("Base URL is required for auto registration"));
            }
            if self.weight == 0 {
                return Err(anyhow!("Weight must be a positive integer"));
            }
        }
        Ok(())
    }

    /// The registration sent to the registry.
    pub fn to_registration(&self) -> ServiceRegistration {
        ServiceRegistration {
            service_name: self.service_name.clone(),
            version: self.version.clone(),
            base_url: self.base_url.clone(),
            environment: self.environment.clone(),
            weight: self.weight,
            tags: self.tags.clone(),
            enable_health_check: self.enable_health_check,
            health_check_path: self.health_check_path.clone(),
            health_check_interval_seconds: self.health_check_interval.as_secs(),
        }
    }
}

fn default_registry_url() -> String {
    "http://localhost:5100".to_string()
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

fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_deregister_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_cache_ttl() -> Duration {
    DEFAULT_FRESH_TTL
}

fn default_stale_cache_ttl() -> Duration {
    DEFAULT_STALE_TTL
}

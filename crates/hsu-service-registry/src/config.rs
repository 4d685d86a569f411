//! Registry server configuration.
//!
//! Loaded from YAML. Every section and field has a default, so an empty file
//! is a valid configuration:
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 5100
//!   log_level: info
//! health_check:
//!   interval: 30s
//!   probe_timeout: 5s
//!   max_concurrency: 16
//!   stale_threshold: 5m
//! discovery:
//!   seed: 42
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::health_checker::HealthCheckerConfig;
use crate::scheduler::SchedulerConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub server: ServerOptions,

    #[serde(default)]
    pub health_check: HealthCheckOptions,

    #[serde(default)]
    pub discovery: DiscoveryOptions,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerOptions {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

/// Background health checking and staleness eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckOptions {
    #[serde(default = "default_interval", with = "hsu_common::duration_serde")]
    pub interval: Duration,

    #[serde(default = "default_probe_timeout", with = "hsu_common::duration_serde")]
    pub probe_timeout: Duration,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_stale_threshold", with = "hsu_common::duration_serde")]
    pub stale_threshold: Duration,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            probe_timeout: default_probe_timeout(),
            max_concurrency: default_max_concurrency(),
            stale_threshold: default_stale_threshold(),
        }
    }
}

impl HealthCheckOptions {
    pub fn checker_config(&self) -> HealthCheckerConfig {
        HealthCheckerConfig {
            timeout: self.probe_timeout,
            max_concurrency: self.max_concurrency,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.interval,
            stale_threshold: self.stale_threshold,
        }
    }
}

/// Discovery settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Fixed seed for weighted selection. Unset means seeded from entropy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl RegistryConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string.
    pub fn load_from_string(content: &str) -> Result<Self> {
        // serde_yaml rejects an empty document, which we treat as all defaults.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: RegistryConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can actually run.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Port must be between 1 and 65535, got: {}", self.server.port));
        }

        if self.server.host.trim().is_empty() {
            return Err(anyhow!("Server host cannot be empty"));
        }

        match self.server.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(anyhow!(
                    "Invalid log level: {}, must be one of: trace, debug, info, warn, error",
                    self.server.log_level
                ))
            }
        }

        let health = &self.health_check;
        if health.interval.is_zero() {
            return Err(anyhow!("Health check interval must be greater than 0"));
        }
        if health.probe_timeout.is_zero() {
            return Err(anyhow!("Probe timeout must be greater than 0"));
        }
        if health.max_concurrency == 0 {
            return Err(anyhow!("Probe concurrency must be at least 1"));
        }
        if health.stale_threshold <= health.interval {
            return Err(anyhow!(
                "Stale threshold ({:?}) must be longer than the health check interval ({:?})",
                health.stale_threshold,
                health.interval
            ));
        }

        Ok(())
    }

    /// `host:port` for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_concurrency() -> usize {
    16
}

fn default_stale_threshold() -> Duration {
    Duration::from_secs(5 * 60)
}

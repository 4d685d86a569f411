// HTTP health check implementation

use crate::{HealthCheckData, HealthCheckError, HealthCheckResult, HealthProbe};
use async_trait::async_trait;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

const USER_AGENT: &str = "HSU-ServiceRegistry/1.0";

/// HTTP health check configuration
#[derive(Debug, Clone)]
pub struct HttpHealthCheckConfig {
    pub endpoint: String,
    pub timeout: Duration,
    /// Status codes counted as healthy. Empty means any 2xx.
    pub expected_status: Vec<u16>,
}

impl Default for HttpHealthCheckConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: Duration::from_secs(5),
            expected_status: Vec::new(),
        }
    }
}

impl HttpHealthCheckConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_expected_status(mut self, status_codes: Vec<u16>) -> Self {
        self.expected_status = status_codes;
        self
    }

    fn accepts(&self, status: u16) -> bool {
        if self.expected_status.is_empty() {
            (200..300).contains(&status)
        } else {
            self.expected_status.contains(&status)
        }
    }
}

/// HTTP prober holding a pooled hyper client.
///
/// One `HttpProbe` is shared by all concurrent probes; the client is
/// internally synchronised and each request carries its own timeout.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, Empty<Bytes>>,
    expected_status: Vec<u16>,
}

impl HttpProbe {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            expected_status: Vec::new(),
        }
    }

    pub fn with_expected_status(mut self, status_codes: Vec<u16>) -> Self {
        self.expected_status = status_codes;
        self
    }

    /// Perform HTTP health check with custom configuration.
    ///
    /// `Ok` means the endpoint answered with an accepted status; every other
    /// outcome is a [`HealthCheckError`].
    pub async fn check(
        &self,
        config: &HttpHealthCheckConfig,
    ) -> HealthCheckResult<HealthCheckData> {
        let start_time = Instant::now();

        debug!("Starting HTTP health check: {}", config.endpoint);

        let uri: Uri = config.endpoint.parse().map_err(|e| HealthCheckError::InvalidTarget {
            id: config.endpoint.clone(),
            reason: format!("Invalid URI: {}", e),
        })?;

        if uri.scheme().is_none() || uri.host().is_none() {
            return Err(HealthCheckError::InvalidTarget {
                id: config.endpoint.clone(),
                reason: "URI must be absolute".to_string(),
            });
        }

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("User-Agent", USER_AGENT)
            .body(Empty::<Bytes>::new())
            .map_err(|e| HealthCheckError::InvalidTarget {
                id: config.endpoint.clone(),
                reason: format!("Failed to build request: {}", e),
            })?;

        let response = match timeout(config.timeout, self.client.request(request)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                return Err(HealthCheckError::ConnectionFailed {
                    id: config.endpoint.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(HealthCheckError::Timeout {
                    id: config.endpoint.clone(),
                });
            }
        };

        let status = response.status().as_u16();
        let elapsed = elapsed_ms(start_time);

        debug!(
            "HTTP health check complete: {} - status={} time={}ms",
            config.endpoint, status, elapsed
        );

        if !config.accepts(status) {
            return Err(HealthCheckError::InvalidResponse {
                id: config.endpoint.clone(),
                status,
            });
        }
        Ok(HealthCheckData::healthy(elapsed, Some(status)))
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str, probe_timeout: Duration) -> HealthCheckData {
        let start_time = Instant::now();
        let config = HttpHealthCheckConfig::new(url)
            .with_timeout(probe_timeout)
            .with_expected_status(self.expected_status.clone());

        match self.check(&config).await {
            Ok(data) => data,
            Err(e) => {
                warn!("{}", e);
                HealthCheckData::from_error(&e, elapsed_ms(start_time))
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

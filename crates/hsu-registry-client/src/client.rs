//! Service registry client implementation.
//!
//! # Rust Learning Note
//!
//! This module is an **HTTP client in Rust** built on hyper.
//!
//! ```rust,ignore
//! let resp = client.request(req).await?;
//! let bytes = resp.into_body().collect().await?.to_bytes();
//! let endpoint: Endpoint = serde_json::from_slice(&bytes)?;
//! ```
//!
//! 1. **Type Safety**: JSON is decoded straight into the shared
//!    `hsu_common` types
//! 2. **Async**: Built on tokio
//! 3. **Error Handling**: `Result<T>` with `?`; a 404 is an answer
//!    (`None`/`false`), anything else unexpected is `Error::Protocol`

use async_trait::async_trait;
use hsu_common::{Endpoint, EndpointId, Error, Result, ServiceQuery, ServiceRegistration};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Operations a service needs from the registry.
///
/// [`ServiceRegistryClient`] talks HTTP; tests and the caching layer work
/// against this trait.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Registers an instance and returns the stored endpoint.
    async fn register(&self, registration: &ServiceRegistration) -> Result<Endpoint>;

    /// Returns false if the registry did not know the identity.
    async fn deregister(&self, id: &EndpointId) -> Result<bool>;

    /// Returns false if the registry did not know the identity.
    async fn heartbeat(&self, id: &EndpointId) -> Result<bool>;

    /// One healthy instance of `service_name`, or `None`.
    async fn discover(&self, service_name: &str) -> Result<Option<Endpoint>>;

    async fn discover_query(&self, query: &ServiceQuery) -> Result<Option<Endpoint>>;

    async fn get_all_instances(&self, service_name: &str) -> Result<Vec<Endpoint>>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Service registry client.
///
/// # Rust Learning Note
///
/// ## Connection Pooling
///
/// The hyper client is created once and reused; it keeps connections alive
/// and is safe to share between tasks, so one `ServiceRegistryClient` can
/// serve the heartbeat sender and every discovery call.
pub struct ServiceRegistryClient {
    /// Base URL of the service registry (e.g., "http://localhost:5100").
    base_url: String,

    /// Upper bound on a single request.
    request_timeout: Duration,

    /// Hyper HTTP client (reusable, pooled connections).
    client: Client<HttpConnector, Full<Bytes>>,
}

impl ServiceRegistryClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new service registry client.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Self {
            base_url,
            request_timeout: Self::DEFAULT_TIMEOUT,
            client,
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes)> {
        let url = format!("{}{}", self.base_url, path);
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::Protocol(format!("Invalid URI {}: {}", url, e)))?;

        let mut builder = Request::builder().method(method.clone()).uri(uri);
        let body = match body {
            Some(bytes) => {
                builder = builder.header("content-type", "application/json");
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let req = builder
            .body(body)
            .map_err(|e| Error::Protocol(format!("Failed to build request: {}", e)))?;

        let resp = match timeout(self.request_timeout, self.client.request(req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Err(Error::Protocol(format!("HTTP request failed: {}", e))),
            Err(_) => {
                return Err(Error::Protocol(format!(
                    "{} {} timed out after {:?}",
                    method, url, self.request_timeout
                )))
            }
        };

        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Protocol(format!("Failed to read response: {}", e)))?
            .to_bytes();

        Ok((status, bytes))
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(StatusCode, Bytes)> {
        let body = serde_json::to_vec(body)
            .map_err(|e| Error::Protocol(format!("Failed to serialize request: {}", e)))?;
        self.send(method, path, Some(body)).await
    }
}

#[async_trait]
impl RegistryApi for ServiceRegistryClient {
    async fn register(&self, registration: &ServiceRegistration) -> Result<Endpoint> {
        let (status, bytes) = self
            .send_json(Method::POST, "/api/registry/register", registration)
            .await?;

        match status {
            s if s.is_success() => {
                let endpoint: Endpoint = parse(&bytes)?;
                info!(
                    "Service registered: {} (ID: {})",
                    endpoint.service_name, endpoint.id
                );
                Ok(endpoint)
            }
            StatusCode::BAD_REQUEST => Err(Error::validation(error_message(&bytes))),
            other => Err(unexpected(other, &bytes)),
        }
    }

    async fn deregister(&self, id: &EndpointId) -> Result<bool> {
        let path = format!("/api/registry/{}", encode_segment(id.as_str()));
        let (status, bytes) = self.send(Method::DELETE, &path, None).await?;
        found_or_missing(status, &bytes)
    }

    async fn heartbeat(&self, id: &EndpointId) -> Result<bool> {
        let path = format!("/api/registry/{}/heartbeat", encode_segment(id.as_str()));
        let (status, bytes) = self.send(Method::POST, &path, None).await?;
        found_or_missing(status, &bytes)
    }

    async fn discover(&self, service_name: &str) -> Result<Option<Endpoint>> {
        let path = format!("/api/discovery/{}", encode_segment(service_name));
        let (status, bytes) = self.send(Method::GET, &path, None).await?;
        optional(status, &bytes, service_name)
    }

    async fn discover_query(&self, query: &ServiceQuery) -> Result<Option<Endpoint>> {
        let (status, bytes) = self
            .send_json(Method::POST, "/api/discovery/discover", query)
            .await?;
        optional(status, &bytes, &query.service_name)
    }

    async fn get_all_instances(&self, service_name: &str) -> Result<Vec<Endpoint>> {
        let path = format!("/api/discovery/{}/instances", encode_segment(service_name));
        let (status, bytes) = self.send(Method::GET, &path, None).await?;
        if status.is_success() {
            parse(&bytes)
        } else {
            Err(unexpected(status, &bytes))
        }
    }
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Protocol(format!("Failed to parse JSON: {}", e)))
}

fn optional(status: StatusCode, bytes: &[u8], service_name: &str) -> Result<Option<Endpoint>> {
    match status {
        s if s.is_success() => parse(bytes).map(Some),
        StatusCode::NOT_FOUND => {
            debug!("No instance of {} available", service_name);
            Ok(None)
        }
        other => Err(unexpected(other, bytes)),
    }
}

fn found_or_missing(status: StatusCode, bytes: &[u8]) -> Result<bool> {
    match status {
        s if s.is_success() => Ok(true),
        StatusCode::NOT_FOUND => Ok(false),
        other => Err(unexpected(other, bytes)),
    }
}

fn unexpected(status: StatusCode, bytes: &[u8]) -> Error {
    Error::Protocol(format!(
        "Registry returned status {}: {}",
        status,
        error_message(bytes)
    ))
}

fn error_message(bytes: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(bytes)
        .map(|body| body.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
}

/// Percent-encodes everything outside the URI "unreserved" set.
fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    encoded
}

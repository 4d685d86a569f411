//! HTTP API handlers using axum.
//!
//! # Rust Learning Note
//!
//! ## Key axum Features
//!
//! 1. **Extractors**: Automatic parsing (Json, Path, State)
//! 2. **Type-safe**: Wrong types = compile error
//! 3. **Async**: Built on tokio
//! 4. **Composable**: Easy to add middleware
//!
//! Handlers return `Result<Json<T>, ApiError>`, so the `?` operator turns any
//! `hsu_common::Error` into the right status code through `From`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use hsu_common::{Endpoint, EndpointId, Error, Health, ServiceQuery, ServiceRegistration};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::discovery::ServiceDiscovery;
use crate::registry::ServiceRegistry;
use crate::types::{ErrorResponse, MessageResponse};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub discovery: Arc<ServiceDiscovery>,
}

/// Creates the API router.
///
/// # Rust Learning Note
///
/// ## Router Builder Pattern
///
/// Each `.route` call adds one path; methods on the same path are chained
/// (`get(a).delete(b)`). `.with_state` fixes the state type for every
/// handler at compile time.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/registry/register", post(register_handler))
        .route("/api/registry", get(list_handler))
        .route(
            "/api/registry/:id",
            get(get_endpoint_handler).delete(deregister_handler),
        )
        .route("/api/registry/:id/heartbeat", post(heartbeat_handler))
        .route("/api/registry/:id/health", put(update_health_handler))
        .route("/api/discovery/discover", post(discover_handler))
        .route("/api/discovery/discover-all", post(discover_all_handler))
        .route("/api/discovery/:name", get(get_service_handler))
        .route("/api/discovery/:name/instances", get(get_all_instances_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn register_handler(
    State(state): State<AppState>,
    Json(registration): Json<ServiceRegistration>,
) -> Result<Json<Endpoint>, ApiError> {
    let endpoint = state.registry.register(registration).await?;
    Ok(Json(endpoint))
}

async fn deregister_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = EndpointId::from(id);
    if state.registry.deregister(&id).await? {
        Ok(Json(MessageResponse::new(format!("Endpoint {} deregistered", id))))
    } else {
        Err(Error::endpoint_not_found(id).into())
    }
}

async fn heartbeat_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = EndpointId::from(id);
    if state.registry.heartbeat(&id).await? {
        Ok(Json(MessageResponse::new("Heartbeat received")))
    } else {
        Err(Error::endpoint_not_found(id).into())
    }
}

async fn update_health_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(health): Json<Health>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = EndpointId::from(id);
    if state.registry.update_health(&id, health).await? {
        Ok(Json(MessageResponse::new("Health updated")))
    } else {
        Err(Error::endpoint_not_found(id).into())
    }
}

async fn get_endpoint_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Endpoint>, ApiError> {
    let id = EndpointId::from(id);
    let endpoint = state.registry.get_by_id(&id).await?;
    Ok(Json(crate::storage::require(endpoint, &id)?))
}

async fn list_handler(State(state): State<AppState>) -> Result<Json<Vec<Endpoint>>, ApiError> {
    Ok(Json(state.registry.get_all().await?))
}

async fn get_service_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Endpoint>, ApiError> {
    match state.discovery.get_service(&name).await? {
        Some(endpoint) => Ok(Json(endpoint)),
        None => Err(no_instance(&name)),
    }
}

async fn get_all_instances_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Endpoint>>, ApiError> {
    Ok(Json(state.discovery.get_all_instances(&name).await?))
}

async fn discover_handler(
    State(state): State<AppState>,
    Json(query): Json<ServiceQuery>,
) -> Result<Json<Endpoint>, ApiError> {
    match state.discovery.discover(&query).await? {
        Some(endpoint) => Ok(Json(endpoint)),
        None => Err(no_instance(&query.service_name)),
    }
}

async fn discover_all_handler(
    State(state): State<AppState>,
    Json(query): Json<ServiceQuery>,
) -> Result<Json<Vec<Endpoint>>, ApiError> {
    Ok(Json(state.discovery.discover_all(&query).await?))
}

/// The registry's own liveness.
async fn health_handler() -> &'static str {
    "OK"
}

fn no_instance(service_name: &str) -> ApiError {
    debug!("No instance available for {}", service_name);
    ApiError::NotFound(format!("No available instance of service '{}'", service_name))
}

/// API error type.
///
/// # Rust Learning Note
///
/// ## Custom Error Responses
///
/// Implementing `IntoResponse` lets handlers return `Err(ApiError)` and have
/// axum render it. The `From<Error>` impl below is what makes `?` work on
/// registry calls inside handlers.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_not_found() {
            return ApiError::NotFound(err.to_string());
        }
        match err {
            Error::Validation { message } => ApiError::BadRequest(message),
            Error::StoreUnavailable(reason) => {
                ApiError::Unavailable(format!("Store unavailable: {}", reason))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            error!("API error: {} - {}", status, message);
        } else if status == StatusCode::BAD_REQUEST {
            warn!("API error: {} - {}", status, message);
        } else {
            info!("API error: {} - {}", status, message);
        }

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

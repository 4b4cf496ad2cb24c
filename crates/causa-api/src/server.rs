//! API server implementation.
//!
//! Serves health, readiness, metrics, the `OpenAPI` document, and the
//! authenticated `/api/v1` ledger routes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use causa_core::{Error, MemoryBackend, Result, StorageBackend};
use causa_ledger::SubscriptionLedger;

use crate::config::{Config, CorsConfig};
use crate::context::{REQUEST_ID_HEADER, bearer_token, header_string};
use crate::error::ApiError;

const READY_CHECK_KEY: &str = "__causa/ready-check";

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared application state for all request handlers.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    storage: Arc<dyn StorageBackend>,
    ledger: SubscriptionLedger,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("storage", &"<StorageBackend>")
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates application state over the given storage backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot bind its partitions.
    pub fn new(config: Config, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        let ledger =
            SubscriptionLedger::new(Arc::clone(&storage), &config.ledger.to_ledger_config())
                .map_err(|e| Error::Internal {
                    message: format!("failed to bind ledger: {e}"),
                })?;
        Ok(Self {
            config,
            storage,
            ledger,
        })
    }

    /// Returns the subscription ledger.
    #[must_use]
    pub fn ledger(&self) -> &SubscriptionLedger {
        &self.ledger
    }

    /// Returns the storage backend.
    #[must_use]
    pub fn storage_backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.storage)
    }
}

/// Health check endpoint handler.
///
/// Shallow liveness check; does not touch storage.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// A `HEAD` on a missing key validates credentials and the network path
/// without listing the bucket.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.storage.head(READY_CHECK_KEY).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("storage check failed: {e}")),
            }),
        ),
    }
}

async fn metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(secret) = state.config.metrics_secret.as_deref() {
        let provided =
            header_string(&headers, "X-Metrics-Secret").or_else(|| bearer_token(&headers));
        if provided.as_deref() != Some(secret) {
            return ApiError::unauthorized("metrics secret required").into_response();
        }
    }
    crate::metrics::serve_metrics()
}

async fn openapi_json() -> impl IntoResponse {
    Json(crate::openapi::openapi())
}

/// Maps configured origins to a CORS policy. `None` leaves CORS disabled.
fn allowed_origins(origins: &[String]) -> Option<AllowOrigin> {
    match origins {
        [] => None,
        [only] if only == "*" => Some(AllowOrigin::from(Any)),
        _ if origins.iter().any(|o| o == "*") => {
            tracing::error!(?origins, "'*' must be the only CORS origin; CORS disabled");
            None
        }
        _ => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| {
                    HeaderValue::from_str(origin)
                        .inspect_err(|_| tracing::error!(%origin, "skipping invalid CORS origin"))
                        .ok()
                })
                .collect();
            if parsed.is_empty() {
                tracing::warn!("no valid CORS origins configured; CORS disabled");
                return None;
            }
            tracing::info!(?origins, "CORS configured");
            Some(AllowOrigin::list(parsed))
        }
    }
}

/// The causa API server.
pub struct Server {
    state: Arc<AppState>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("state", &self.state).finish()
    }
}

impl Server {
    /// Creates a server over in-memory storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot bind its partitions.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_storage_backend(config, Arc::new(MemoryBackend::new()))
    }

    /// Creates a server over an explicit storage backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot bind its partitions.
    pub fn with_storage_backend(config: Config, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        Ok(Self {
            state: Arc::new(AppState::new(config, storage)?),
        })
    }

    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.state.config
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let state = Arc::clone(&self.state);
        let cors = Self::build_cors_layer(&state.config.cors);
        let auth_layer =
            middleware::from_fn_with_state(Arc::clone(&state), crate::context::auth_middleware);

        Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(metrics))
            .route("/openapi.json", get(openapi_json))
            .nest("/api/v1", crate::routes::api_v1_routes().layer(auth_layer))
            // Metrics outermost for timing, then trace, then CORS.
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(crate::metrics::metrics_middleware))
            .with_state(state)
    }

    fn build_cors_layer(cors_config: &CorsConfig) -> CorsLayer {
        let cors = CorsLayer::new()
            .allow_methods([
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::HeaderName::from_static("x-user-id"),
                header::HeaderName::from_static("x-user-role"),
                header::HeaderName::from_static(REQUEST_ID_HEADER),
            ])
            .expose_headers([
                header::CONTENT_TYPE,
                header::CONTENT_LENGTH,
                header::HeaderName::from_static(REQUEST_ID_HEADER),
            ])
            .max_age(Duration::from_secs(cors_config.max_age_seconds));

        match allowed_origins(&cors_config.allowed_origins) {
            Some(origin) => cors.allow_origin(origin),
            None => cors,
        }
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the server cannot
    /// bind to its port.
    pub async fn serve(&self) -> Result<()> {
        self.validate_config()?;
        crate::metrics::init_metrics();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config().http_port));
        let router = self.create_router();

        tracing::info!(http_port = self.config().http_port, "Starting causa API server");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal {
                message: format!("failed to bind to {addr}: {e}"),
            })?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::Internal {
                message: format!("server error: {e}"),
            })?;

        Ok(())
    }

    /// Creates the router without binding a port.
    #[doc(hidden)]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }

    /// Checks the production guardrails.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a non-debug server has a wildcard CORS
    /// origin, no bucket, or not exactly one JWT key.
    pub fn validate_config(&self) -> Result<()> {
        let config = self.config();
        if config.debug {
            return Ok(());
        }

        if config.cors.allowed_origins.iter().any(|origin| origin == "*") {
            return Err(Error::InvalidInput(
                "cors.allowed_origins cannot include '*' when debug=false".to_string(),
            ));
        }

        if config.storage.bucket.is_none() {
            return Err(Error::InvalidInput(
                "storage.bucket is required when debug=false".to_string(),
            ));
        }

        match (
            config.jwt.hs256_secret.is_some(),
            config.jwt.rs256_public_key_pem.is_some(),
        ) {
            (false, false) => Err(Error::InvalidInput(
                "jwt.hs256_secret or jwt.rs256_public_key_pem is required when debug=false"
                    .to_string(),
            )),
            (true, true) => Err(Error::InvalidInput(
                "jwt.hs256_secret and jwt.rs256_public_key_pem are mutually exclusive".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Builder for constructing a server.
pub struct ServerBuilder {
    config: Config,
    storage: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("storage", &"<StorageBackend>")
            .finish()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            storage: Arc::new(MemoryBackend::new()),
        }
    }
}

impl ServerBuilder {
    /// Creates a new server builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HTTP port.
    #[must_use]
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.http_port = port;
        self
    }

    /// Enables debug mode (header-based identity instead of JWT).
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Sets the JWT HS256 secret used for bearer token verification.
    #[must_use]
    pub fn jwt_hs256_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.jwt.hs256_secret = Some(secret.into());
        self
    }

    /// Sets the shared secret guarding `/metrics`.
    #[must_use]
    pub fn metrics_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.metrics_secret = Some(secret.into());
        self
    }

    /// Sets the number of CAS attempts per record write.
    #[must_use]
    pub fn cas_max_retries(mut self, retries: u32) -> Self {
        self.config.ledger.cas_max_retries = retries;
        self
    }

    /// Sets the storage backend used by request handlers.
    ///
    /// Defaults to an in-memory backend intended only for tests and local runs.
    #[must_use]
    pub fn storage_backend(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = storage;
        self
    }

    /// Builds the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot bind its partitions.
    pub fn build(self) -> Result<Server> {
        Server::with_storage_backend(self.config, self.storage)
    }
}

//! HTTP front end for the sandbox.
//!
//! Accepts code submissions over JSON, validates them at the boundary and
//! hands them to a [`CodeExecutor`]. Submitted code that fails or times out
//! is reported as a normal result; only sandbox infrastructure failures map
//! to an error status.

pub mod error;

pub use error::{Result, ServerError};

use axum::extract::{DefaultBodyLimit, Json as AxumJson, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::{middleware, Router};
use coderun_core::{CodeExecutor, ExecutionResult, ResourceOverrides};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Enable request logging
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            enable_cors: true,
            max_body_size: 256 * 1024,
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address: {}", e)))?;
        Ok(self)
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Body of `POST /submit-code`. Both fields are optional at the type level
/// so a missing field gets our own 400 instead of a deserializer rejection.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub challenge_id: Option<String>,
    #[serde(default)]
    pub limits: Option<ResourceOverrides>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: String,
    pub challenge_id: String,
    pub result: ExecutionResult,
}

/// Body of `POST /execute`. Empty code is accepted here.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub limits: Option<ResourceOverrides>,
}

impl SubmitRequest {
    /// Returns `(code, challenge_id)` when both are present and non-empty.
    pub fn validate(self) -> Result<(String, String, ResourceOverrides)> {
        match (self.code, self.challenge_id) {
            (Some(code), Some(challenge_id))
                if !code.is_empty() && !challenge_id.trim().is_empty() =>
            {
                Ok((code, challenge_id, self.limits.unwrap_or_default()))
            }
            _ => Err(ServerError::missing_field("code and challenge_id required")),
        }
    }
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<dyn CodeExecutor>,
}

/// Run the submission on its own task so a dropped client connection cannot
/// cancel it halfway and skip instance teardown.
async fn run_detached(
    executor: Arc<dyn CodeExecutor>,
    code: String,
    overrides: ResourceOverrides,
) -> Result<ExecutionResult> {
    let handle = tokio::spawn(async move { executor.execute_code(&code, &overrides).await });
    let result = handle
        .await
        .map_err(|e| ServerError::internal(format!("Execution task failed: {}", e)))??;
    Ok(result)
}

/// Handler for the /submit-code POST endpoint.
async fn submit_code_handler(
    State(app_state): State<AppState>,
    AxumJson(request): AxumJson<SubmitRequest>,
) -> Result<Json<SubmitResponse>> {
    let (code, challenge_id, overrides) = request.validate()?;
    let submission_id = uuid::Uuid::new_v4().to_string();
    log::info!(
        "Received submission {} for challenge {} ({} bytes)",
        submission_id,
        challenge_id,
        code.len()
    );

    let result = run_detached(app_state.executor.clone(), code, overrides).await?;
    log::info!(
        "Submission {} finished with status {:?}",
        submission_id,
        result.status
    );

    Ok(Json(SubmitResponse {
        submission_id,
        challenge_id,
        result,
    }))
}

/// Handler for the /execute POST endpoint.
async fn execute_handler(
    State(app_state): State<AppState>,
    AxumJson(request): AxumJson<ExecuteRequest>,
) -> Result<Json<ExecutionResult>> {
    log::debug!("Received execute request ({} bytes)", request.code.len());
    let overrides = request.limits.unwrap_or_default();
    let result = run_detached(app_state.executor.clone(), request.code, overrides).await?;
    Ok(Json(result))
}

/// The HTTP server.
pub struct SandboxServer {
    executor: Arc<dyn CodeExecutor>,
    config: ServerConfig,
}

impl SandboxServer {
    pub fn new(executor: Arc<dyn CodeExecutor>) -> Self {
        Self {
            executor,
            config: ServerConfig::default(),
        }
    }

    pub fn with_config(executor: Arc<dyn CodeExecutor>, config: ServerConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the axum router with all endpoints.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            executor: self.executor.clone(),
        };

        let mut router = Router::new()
            .route(
                "/health",
                get(|| async {
                    Json(HealthResponse {
                        status: "healthy".to_string(),
                        timestamp: chrono::Utc::now(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    })
                }),
            )
            .route("/submit-code", post(submit_code_handler))
            .route("/execute", post(execute_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(state);

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();

                    if uri.path() == "/health" {
                        log::debug!("Request {} {} {}", request_id, method, uri);
                    } else {
                        log::info!("Request {} {} {}", request_id, method, uri);
                    }

                    let start = std::time::Instant::now();
                    let response = next.run(request).await;
                    log::info!(
                        "Response {} {} in {:?}",
                        request_id,
                        response.status(),
                        start.elapsed()
                    );

                    response
                },
            ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Start the server with graceful shutdown support.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::config_error(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        log::info!("coderun server listening on {}", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        log::info!("coderun server shut down gracefully");
        Ok(())
    }
}

/// Utility function to create a shutdown signal from Ctrl+C.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

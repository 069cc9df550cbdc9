//! HTTP boundary for browsing compartments and policies
//!
//! This crate resolves a caller-named profile into upstream credentials, using
//! either the stored credentials file or the instance's own identity, and proxies
//! compartment and policy listings from the identity service. The authentication
//! mode is fixed when the server starts; the only state shared between requests
//! is the memoized root compartment of instance principal mode.

pub mod auth;
pub mod config_store;
pub mod error;
pub mod identity;
pub mod root_resolver;
pub mod signer;

pub use auth::{AuthMode, Credentials};
pub use config_store::ConfigStore;
pub use error::{Result, ServerError};
pub use identity::{IdentityProxy, IdentityService, OciIdentityClient};
pub use root_resolver::{InstanceIdentity, MetadataClient, MetadataSource, RootResolver};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::{middleware, Router};
use canopy_types::{Policy, ProfilesResponse, ROOT_ID_HEADER};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub mode: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Configuration for the explorer server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// Enable request logging
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            enable_cors: true,
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
            .map_err(|e| ServerError::config_error(format!("Invalid bind address '{}': {}", addr, e)))?;
        Ok(self)
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthMode,
    pub proxy: IdentityProxy,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompartmentsQuery {
    pub profile: Option<String>,
    pub parent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoliciesQuery {
    pub profile: Option<String>,
    pub compartment_id: Option<String>,
}

fn required_profile(profile: Option<&str>) -> Result<&str> {
    profile
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ServerError::missing_parameter("profile"))
}

/// Handler for the /api/profiles GET endpoint.
async fn profiles_handler(State(state): State<AppState>) -> Json<ProfilesResponse> {
    let profiles = state.auth.list_profiles().await;
    log::debug!("Listing {} profiles ({} mode)", profiles.len(), state.auth.name());
    Json(ProfilesResponse { profiles })
}

/// Handler for the /api/compartments GET endpoint.
///
/// The body is the array of children; the profile's root id travels in the
/// [`ROOT_ID_HEADER`] response header.
async fn compartments_handler(
    State(state): State<AppState>,
    Query(query): Query<CompartmentsQuery>,
) -> Result<impl IntoResponse> {
    let profile = required_profile(query.profile.as_deref())?;
    let credentials = state.auth.resolve_credentials(profile).await?;
    let compartments = state
        .proxy
        .list_child_groupings(&credentials, query.parent.as_deref())
        .await?;

    log::info!(
        "Profile {} listed {} compartments under {}",
        profile,
        compartments.len(),
        query.parent.as_deref().unwrap_or("root")
    );
    Ok((
        [(ROOT_ID_HEADER, credentials.root_id().to_string())],
        Json(compartments),
    ))
}

/// Handler for the /api/policies GET endpoint.
async fn policies_handler(
    State(state): State<AppState>,
    Query(query): Query<PoliciesQuery>,
) -> Result<Json<Vec<Policy>>> {
    let profile = required_profile(query.profile.as_deref())?;
    if query
        .compartment_id
        .as_deref()
        .map_or(true, |id| id.trim().is_empty())
    {
        return Err(ServerError::missing_parameter("compartmentId"));
    }

    let credentials = state.auth.resolve_credentials(profile).await?;
    let policies = state
        .proxy
        .list_policies(&credentials, query.compartment_id.as_deref())
        .await?;

    log::info!("Profile {} listed {} policies", profile, policies.len());
    Ok(Json(policies))
}

fn handle_panic(_: Box<dyn Any + Send + 'static>) -> Response {
    ServerError::internal("request handler panicked").into_response()
}

/// The compartment explorer HTTP server.
pub struct ExplorerServer {
    state: AppState,
    config: ServerConfig,
}

impl ExplorerServer {
    pub fn new(auth: AuthMode, service: Arc<dyn IdentityService>) -> Self {
        Self::with_config(auth, service, ServerConfig::default())
    }

    pub fn with_config(auth: AuthMode, service: Arc<dyn IdentityService>, config: ServerConfig) -> Self {
        Self {
            state: AppState {
                auth,
                proxy: IdentityProxy::new(service),
            },
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let mode = self.state.auth.name();
        let mut router = Router::new()
            .route(
                "/health",
                get(move || async move {
                    Json(HealthResponse {
                        status: "healthy".to_string(),
                        mode: mode.to_string(),
                        timestamp: chrono::Utc::now(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    })
                }),
            )
            .route("/api/profiles", get(profiles_handler))
            .route("/api/compartments", get(compartments_handler))
            .route("/api/policies", get(policies_handler))
            .fallback(|| async {
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({ "error": "not_found", "message": "No such route" })),
                )
            })
            .with_state(self.state.clone());

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();
                    log::info!("Request {} {} {}", request_id, method, uri);

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

        router = router
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Start the server; returns once `shutdown_signal` resolves.
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

        log::info!(
            "canopy server starting on {} ({} mode)",
            self.config.bind_addr,
            self.state.auth.name()
        );
        log::info!("Profiles: http://{}/api/profiles", self.config.bind_addr);
        log::info!("Compartments: http://{}/api/compartments", self.config.bind_addr);
        log::info!("Policies: http://{}/api/policies", self.config.bind_addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("canopy server shut down gracefully");
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

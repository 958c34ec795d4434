//! HTTP front-end: binds the service surface over the registry and
//! orchestrator, with CORS and graceful shutdown.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use utoipa::ToSchema;

use crate::bus::Bus;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::orchestrator::Orchestrator;
use crate::registry::ToolRegistry;

pub mod error;
pub mod events;
pub mod openapi;
pub mod tools;
pub mod workflows;

pub(crate) struct ServerState {
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) bus: Bus,
}

pub struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    registry: Arc<ToolRegistry>,
}

impl Server {
    /// Initialize the registry (snapshot + first discovery), start the
    /// periodic discovery loop, and serve the API.
    pub async fn start(config: Config) -> CoreResult<Self> {
        let config = Arc::new(config);
        let bus = Bus::default();
        let registry = Arc::new(ToolRegistry::new(Arc::clone(&config), bus.clone())?);
        registry.initialize().await;
        registry.start_discovery();

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&config),
            bus.clone(),
        ));

        let state = Arc::new(ServerState {
            registry: Arc::clone(&registry),
            orchestrator,
            bus,
        });
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        let app = Router::new()
            .route("/health", get(health))
            .route("/tools", get(tools::list_tools))
            .route("/tools/:id", get(tools::get_tool))
            .route("/tools/:id/execute", post(tools::execute_tool))
            .route("/workflows/execute", post(workflows::execute_workflow))
            .route("/executions/:id", get(workflows::get_execution))
            .route("/executions/:id/cancel", post(workflows::cancel_execution))
            .route("/events", get(events::stream_events))
            .route("/openapi.json", get(openapi_spec))
            .with_state(state)
            .layer(cors);

        let listener = TcpListener::bind(&config.server.listen_addr)
            .await
            .map_err(|error| {
                CoreError::Internal(format!(
                    "failed to bind {}: {error}",
                    config.server.listen_addr
                ))
            })?;
        let addr = listener
            .local_addr()
            .map_err(|error| CoreError::Internal(error.to_string()))?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });
        tracing::info!("toolbridge listening on {addr}");

        Ok(Server {
            addr,
            shutdown: Some(shutdown_tx),
            registry,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop serving, halt discovery, and flush any pending snapshot write.
    pub async fn shutdown(&mut self) {
        if let Some(sender) = self.shutdown.take() {
            let _ = sender.send(());
        }
        self.registry.shutdown().await;
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(sender) = self.shutdown.take() {
            let _ = sender.send(());
        }
        self.registry.stop_discovery();
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub tools: usize,
    pub servers: usize,
    pub active_executions: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Liveness and catalog counts", body = HealthResponse)),
)]
pub(crate) async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        tools: state.registry.tool_count().await,
        servers: state.registry.server_count().await,
        active_executions: state.orchestrator.active_count(),
    })
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    use utoipa::OpenApi;
    Json(openapi::ApiDoc::openapi())
}

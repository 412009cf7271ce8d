//! Viewer-facing HTTP/websocket server
//!
//! Routes:
//! - `GET /screen/:serial` upgrades to a viewer session on that device
//! - `GET /stats` returns per-device relay statistics as JSON

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use super::config::ServerConfig;
use super::ws::run_viewer;
use crate::error::Result;
use crate::relay::RelayRegistry;

struct ServerState {
    config: Arc<ServerConfig>,
    registry: Arc<RelayRegistry>,
    connections: Arc<Semaphore>,
}

/// Screen relay server
pub struct ScreenServer {
    state: Arc<ServerState>,
}

impl ScreenServer {
    pub fn new(config: ServerConfig, registry: Arc<RelayRegistry>) -> Self {
        let permits = match config.max_connections {
            0 => Semaphore::MAX_PERMITS,
            max => max,
        };
        Self {
            state: Arc::new(ServerState {
                config: Arc::new(config),
                registry,
                connections: Arc::new(Semaphore::new(permits)),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<RelayRegistry> {
        &self.state.registry
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.state.config.bind_addr
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/screen/:serial", get(screen_ws))
            .route("/stats", get(stats))
            .with_state(self.state.clone())
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_addr()).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener, then shut every relay down
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::info!(addr = %listener.local_addr()?, "Screen server listening");

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        self.state.registry.shutdown().await;
        result.map_err(Into::into)
    }
}

async fn screen_ws(
    ws: WebSocketUpgrade,
    Path(serial): Path<String>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let permit = match state.connections.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(device = %serial, "Viewer rejected: limit reached");
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many viewers").into_response();
        }
    };

    let relay = state.registry.get_or_spawn(&serial).await;
    let config = state.config.clone();
    ws.on_upgrade(move |socket| async move {
        let _permit = permit;
        run_viewer(socket, relay, config).await;
    })
}

async fn stats(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.registry.stats().await)
}

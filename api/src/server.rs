//! HTTP server.
//!
//! Wires the upgrade endpoints and management routes into one router and
//! ties the hub's lifetime to the listener's.

use std::future::Future;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::assistant::Assistant;
use crate::broker::Broker;
use crate::config::ServerConfig;
use crate::routes::management_routes;
use crate::state::AppState;
use crate::ws::{ws_chat, ws_generic, ws_presence, Hub, HubRunner};

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/", get(ws_generic))
        .route("/ws/chat", get(ws_chat))
        .route("/ws/presence", get(ws_presence))
        .merge(management_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// The API server: router plus the hub run loop.
pub struct Server {
    state: AppState,
    runner: HubRunner,
}

impl Server {
    /// Creates a server with its own hub.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        broker: Option<Arc<dyn Broker>>,
        assistant: Arc<dyn Assistant>,
    ) -> Self {
        let (hub, runner) = Hub::new(config.hub.clone(), broker);
        let state = AppState::new(config, hub, assistant);
        Self { state, runner }
    }

    /// Returns the shared state.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Returns the hub.
    #[must_use]
    pub fn hub(&self) -> Hub {
        self.state.hub.clone()
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await?;
        Ok(())
    }

    /// Serves on `listener` until `shutdown` resolves, then stops the hub
    /// and waits for it to drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        let (stop_hub, hub_stopped) = oneshot::channel::<()>();
        let hub_task = tokio::spawn(self.runner.run(async move {
            let _ = hub_stopped.await;
        }));

        info!("Airlink API listening on {}", local);
        let router = build_router(self.state);
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutdown signal received");
                let _ = stop_hub.send(());
            })
            .await;

        if let Err(e) = hub_task.await {
            warn!("Hub task ended abnormally: {}", e);
        }
        served
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("state", &self.state).finish()
    }
}

//! Web server module.

mod handlers;

use crate::db::Store;
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::snapshot::SnapshotStore;

use axum::{
    http::{header, HeaderValue},
    routing::get,
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub snapshots: Arc<SnapshotStore>,
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
}

/// Web server for statusboard.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/healthz", get(handlers::handle_healthz))
            .route("/api/collections", get(handlers::handle_collections))
            // Website aliases
            .route("/api/status", get(handlers::handle_website_status))
            .route("/api/status/{name}", get(handlers::handle_website_target_status))
            .route("/api/{collection}/status", get(handlers::handle_collection_status))
            .route("/api/{collection}/status/{name}", get(handlers::handle_target_status))
            // History
            .route("/api/history", get(handlers::handle_recent_history))
            .route("/api/history/{name}", get(handlers::handle_history))
            .route("/api/uptime/{name}", get(handlers::handle_uptime))
            .layer(SetResponseHeaderLayer::overriding(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            ))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

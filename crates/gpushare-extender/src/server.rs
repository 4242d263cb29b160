use crate::handlers::*;
use crate::AppState;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Route prefix kube-scheduler is configured with (`urlPrefix`)
pub const API_PREFIX: &str = "/gpushare-scheduler";

/// Extender server configuration
#[derive(Clone)]
pub struct Config {
    /// Address to listen on
    pub listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 39999)),
        }
    }
}

/// Extender HTTP server
pub struct ExtenderServer {
    config: Config,
    state: Arc<AppState>,
}

impl ExtenderServer {
    /// Create a new extender server
    pub fn new(config: Config, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        let extender = Router::new()
            .route("/filter", post(filter))
            .route("/priorities", post(prioritize))
            .route("/bind", post(bind))
            .route("/status", get(status))
            // Cluster-state feed
            .route("/nodes/{name}", put(put_node).delete(delete_node))
            .route("/pods/{namespace}/{name}", delete(delete_pod));

        Router::new()
            .nest(API_PREFIX, extender)
            .route("/version", get(version))
            .route("/healthz", get(healthz))
            // Add tracing and state
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), std::io::Error> {
        let app = self.build_router();

        info!(
            "Starting gpushare extender on {} (binder: {})",
            self.config.listen_addr,
            self.state.binder.name()
        );

        let listener = TcpListener::bind(self.config.listen_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

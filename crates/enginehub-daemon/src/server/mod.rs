//! HTTP/WebSocket server for the enginehub daemon.
//!
//! Routes:
//! - `GET /{family}-{variant}`: WebSocket session bound to a fresh engine
//! - `GET /`: HTML status page
//! - `GET /status`: session counts as JSON
//! - `GET /health`: liveness probe

mod config;
mod socket;
mod status;

pub use config::ServerConfig;
pub use status::render_status_page;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use enginehub_core::RouteTable;

use crate::session::{SessionRegistry, SessionSettings};

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub registry: Arc<SessionRegistry>,
    pub settings: Arc<SessionSettings>,
    pub shutdown: watch::Receiver<bool>,
}

/// Engine gateway server handle.
pub struct EngineServer {
    state: AppState,
}

impl EngineServer {
    /// Wire up the registry and handler state.
    ///
    /// Sessions watch `shutdown` and close their engines once it turns
    /// `true`.
    pub fn new(config: ServerConfig, routes: RouteTable, shutdown: watch::Receiver<bool>) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            routes
                .families()
                .iter()
                .map(|f| (f.name.clone(), f.label().to_string())),
            config.max_sessions,
        ));
        let state = AppState {
            routes: Arc::new(routes),
            registry,
            settings: Arc::new(config.session.clone()),
            shutdown,
        };
        Self { state }
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(status::status_page))
            .route("/status", get(status::status_json))
            .route("/health", get(status::health))
            .route("/{route}", get(socket::engine_socket))
            .with_state(self.state.clone())
    }

    /// Get a reference to the session registry.
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = listener.local_addr()?;
        info!(%addr, "Serving engine gateway");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await?;
        Ok(())
    }
}

//! HTTP adapter receiving build webhooks from the code review system.
//!
//! | Route                    | Effect                                         |
//! |--------------------------|------------------------------------------------|
//! | `GET /ping`              | Liveness check, answers `pong`                 |
//! | `POST /codereview/new`   | Parse a build from the query and queue it on `in` |
//!
//! The build request carries its identifiers as query parameters:
//! `/codereview/new?diff=1234&repo=PHID-REPO-xxx&revision=56&target=PHID-HMBT-xxx`.

use crate::bus::{MessageBus, QUEUE_IN};
use crate::review::Build;
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Build the axum router with all endpoints.
pub fn build_router(bus: Arc<MessageBus>) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/codereview/new", post(new_build_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(bus)
}

async fn ping_handler() -> &'static str {
    "pong"
}

/// Queue a new build for visibility checks.
async fn new_build_handler(
    State(bus): State<Arc<MessageBus>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let build = match Build::from_query(&params) {
        Ok(build) => build,
        Err(e) => {
            warn!(error = %e, "Rejected build webhook");
            return (StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    info!(build = %build, "Received new build");
    match bus.send(QUEUE_IN, build).await {
        Ok(()) => (StatusCode::OK, "Build queued".to_string()),
        Err(e) => {
            error!(error = %e, "Failed to queue build");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

/// Webhook server bound to a TCP address.
pub struct WebServer {
    listener: TcpListener,
}

impl WebServer {
    /// Bind the listening socket. Port 0 picks a free port.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind web server on {}:{}", host, port))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to get server address")
    }

    /// Serve requests until shutdown is signalled.
    pub async fn serve(self, bus: Arc<MessageBus>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "Web server listening");

        axum::serve(self.listener, build_router(bus))
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .context("Web server failed")?;

        info!("Web server stopped");
        Ok(())
    }
}

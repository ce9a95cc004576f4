//! Server module
//!
//! HTTP server bootstrap and graceful shutdown.

pub mod error;
pub mod http;

use std::net::SocketAddr;

use tracing::info;

use crate::config::ServerConfig;

pub use error::ApiError;
pub use http::{build_router, AppState};

/// Server startup and runtime errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Serve the API until Ctrl-C.
pub async fn run_server(config: &ServerConfig, state: AppState) -> Result<(), ServerError> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|source| ServerError::Bind {
            addr: format!("{}:{}", config.host, config.port),
            source,
        })?;
    let local_addr: SocketAddr = listener.local_addr()?;
    info!(address = %local_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

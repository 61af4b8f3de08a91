//! Server setup and lifecycle management

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::router::build_router;
use crate::state::AppState;
use tokio::net::TcpListener;

/// Governance ledger HTTP server
pub struct Server {
    config: ServiceConfig,
    state: AppState,
}

impl Server {
    /// Open the ledger (hydrating persisted events) and prepare the router state.
    pub async fn new(config: ServiceConfig) -> ServiceResult<Self> {
        let state = AppState::bootstrap(&config).await?;
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until Ctrl+C or SIGTERM.
    pub async fn run(self) -> ServiceResult<()> {
        let addr = self.config.server.listen_addr;
        let app = build_router(self.state.clone(), self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;

        let store = self.state.ledger.store();
        let backend = store.backend_label().await;
        let events = store.len()?;
        tracing::info!(
            %addr,
            backend,
            events,
            "govledgerd listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServiceError::Server(e.to_string()))?;

        tracing::info!("govledgerd shutting down");
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::errors::ServiceError;
use crate::server::serve::serve;
use crate::server::state::ServerState;

/// Run the Fleet Forge service until the shutdown signal resolves.
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServiceError> {
    info!("Initializing Fleet Forge service...");

    let app_state = AppState::init(&options).await?;

    let server_state = Arc::new(ServerState::new(
        app_state.registry.clone(),
        app_state.orchestrator.clone(),
        app_state.artifacts.clone(),
        app_state.signer.clone(),
        app_state.devices.clone(),
        app_state.rollouts.clone(),
        app_state.ota.clone(),
        app_state.projects.clone(),
        app_state.audit.clone(),
    ));

    let server_handle = serve(&options.server, server_state, shutdown_signal).await?;

    // In-flight build tasks are detached; the graceful shutdown only
    // drains the HTTP side.
    server_handle
        .await
        .map_err(|e| ServiceError::Server(e.to_string()))??;

    info!("Shutdown complete");
    Ok(())
}

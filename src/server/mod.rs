pub mod http;

use crate::config::Config;
use crate::rate_limit::spawn_idle_eviction;
use anyhow::{Context, Result};
use axum::Router;
use std::{future::Future, net::SocketAddr};
use tokio::net::TcpListener;
use tracing::{error, info};

pub use http::{AppState, build_router};

/// Run the HTTP server until Ctrl-C or SIGTERM
pub async fn run(config: Config) -> Result<()> {
    let bind = config.server.bind.clone();
    let idle_eviction = config.rate_limiting.idle_eviction();
    let state = AppState::from_config(config)?;

    let eviction = match (&state.limiter, idle_eviction) {
        (Some(limiter), Some(max_idle)) => {
            info!("✓ Idle bucket eviction every {:?} of inactivity", max_idle);
            Some(spawn_idle_eviction(limiter.clone(), max_idle))
        }
        _ => None,
    };

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("✓ HTTP server listening on {}", bind);

    let result = serve(listener, build_router(state), shutdown_signal()).await;

    if let Some(handle) = eviction {
        handle.abort();
    }
    result
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// Connections carry their peer address so the rate limiter can key on it.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received, draining connections");
}

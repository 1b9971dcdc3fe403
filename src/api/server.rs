//! HTTP server lifecycle: bind, spawn, shut down.
//!
//! bind → spawn background task → return handle with shutdown channel.
//! `lib::run` uses [`serve`] directly so it can wait on Ctrl-C; tests and
//! embedders use [`start_server`] and keep the handle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::router::api_router;
use crate::core_state::CoreState;

/// Handle to a running server.
pub struct ApiServer {
    pub local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ApiServer {
    /// Ask the server to stop accepting requests. Safe to call twice.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }

    /// Shut down and wait for in-flight requests to finish.
    pub async fn stop(mut self) {
        self.shutdown();
        let _ = self.task.await;
    }
}

/// Serve the API on an already bound listener until `shutdown` resolves.
///
/// Open WebSockets are asked to close as soon as the signal fires, since
/// graceful shutdown would otherwise wait on them forever.
pub async fn serve<F>(listener: TcpListener, core: Arc<CoreState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = api_router(core.clone());
    let signal = async move {
        shutdown.await;
        core.shutdown();
    };
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(signal)
        .await
}

/// Bind `addr` and serve in a background task.
pub async fn start_server(core: Arc<CoreState>, addr: SocketAddr) -> std::io::Result<ApiServer> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        tracing::info!(%local_addr, "API server started");
        let signal = async move {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = serve(listener, core, signal).await {
            tracing::error!(error = %e, "API server error");
        }
        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

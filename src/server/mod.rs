//! Viewer-facing HTTP and WebSocket surface.

mod router;
mod state;
mod ws;

pub use router::{build_router, STATUS_LINE};
pub use state::{AdapterTapView, FrameTapView, HealthReport, RelayHealth, RelayState};

use tokio::net::TcpListener;
use tracing::info;

/// Serves until the state's shutdown token is cancelled.
pub async fn run_server(listener: TcpListener, state: RelayState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        info!(target: "ws", %addr, "relay listening");
    }
    state.health.mark_live();
    axum::serve(listener, build_router(state).into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

//! peerstat worker
//!
//! - Peer socket: `<socket_dir>/<prefix><id>.sock`, answers snapshot fetches
//! - HTTP: `/metrics` (instance-wide), `/metrics/local`, `/healthz`
//! - Ctrl-C: stop both, remove the socket file

use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use peerstat_core::error::{PeerstatError, Result};
use peerstat_worker::{app_state::AppState, config, peer::PeerServer, router};

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.code().as_str(), error = %e, "worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "peerstat.yaml".into());
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .scrape
        .listen
        .parse()
        .map_err(|e| PeerstatError::InvalidConfig(format!("scrape.listen: {e}")))?;

    // No relational store is wired in by default; embedders pass one here.
    let state = AppState::new(cfg, None)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = PeerServer::bind(&state.socket_path(), state.cfg().scrape.max_frame_bytes).await?;
    let peer_task = tokio::spawn(server.run(state.provider(), shutdown_rx));

    let app = router::build_router(state);
    tracing::info!(%listen, "peerstat-worker starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| PeerstatError::Internal(format!("bind {listen} failed: {e}")))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "ctrl-c handler unavailable");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = peer_task.await {
        tracing::warn!(error = %e, "peer socket task ended abnormally");
    }
    served.map_err(|e| PeerstatError::Internal(format!("http server failed: {e}")))?;
    Ok(())
}

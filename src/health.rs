use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Bind the liveness listener. A bind failure at startup is fatal for the
/// whole process.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health server to {addr}"))?;
    info!("Health server listening on {addr}");
    Ok(listener)
}

/// Serve `GET /` until the shutdown token flips.
pub async fn serve(listener: TcpListener, shutdown: CancellationToken) {
    let app = Router::new().route("/", get(probe));

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        error!("Health server error: {}", e);
    }
}

async fn probe() -> &'static str {
    info!("Health check received");
    "ReactionBot is alive!"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_reports_alive() {
        assert_eq!(probe().await, "ReactionBot is alive!");
    }
}

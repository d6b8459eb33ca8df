use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use hallpass::api::{self, AppState};
use hallpass::booking::DayGrid;
use hallpass::session::Session;
use hallpass::store::{ExternalStore, MemoryStore, RestStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("HALLPASS_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    hallpass::observability::init(metrics_port);

    let bind = std::env::var("HALLPASS_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("HALLPASS_PORT").unwrap_or_else(|_| "8080".into());
    let call_timeout_ms: u64 = std::env::var("HALLPASS_CALL_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5000);
    let call_timeout = Duration::from_millis(call_timeout_ms);

    let store: Arc<dyn ExternalStore> = match std::env::var("HALLPASS_BACKEND_URL") {
        Ok(url) => {
            let key = std::env::var("HALLPASS_BACKEND_KEY").unwrap_or_else(|_| {
                warn!("HALLPASS_BACKEND_KEY not set, sending unauthenticated requests");
                String::new()
            });
            info!("using hosted backend at {url}");
            Arc::new(RestStore::new(&url, &key, call_timeout)?)
        }
        Err(_) => {
            warn!("HALLPASS_BACKEND_URL not set, using a volatile in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let session = Arc::new(Session::new(store, call_timeout));
    // Initial bulk loads. A failure degrades to empty lists and an explicit
    // refresh later; it never aborts startup.
    if let Err(e) = session.refresh().await {
        warn!("initial snapshot load failed: {e}");
    }

    let state = AppState {
        session,
        grid: DayGrid::default(),
    };
    let app = api::router(state);

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("hallpass listening on {addr}");
    info!("  call_timeout: {call_timeout_ms}ms");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("hallpass stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received");
}

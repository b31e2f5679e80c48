use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use tutord::config::SchedulePolicy;
use tutord::engine::Engine;
use tutord::http::{self, AppState};
use tutord::notify::{LogNotifier, NotifyHub};
use tutord::payment::AutoConfirm;
use tutord::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("TUTORD_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    tutord::observability::init(metrics_port);

    let port = std::env::var("TUTORD_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("TUTORD_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("TUTORD_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let compact_threshold: u64 = std::env::var("TUTORD_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let policy = SchedulePolicy::from_env()?;

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("lessons.wal");

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        wal_path,
        policy,
        notify,
        Arc::new(LogNotifier),
    )?);

    tokio::spawn(reaper::run_reaper(engine.clone()));
    tokio::spawn(reaper::run_compactor(engine.clone(), compact_threshold));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        engine,
        gateway: Arc::new(AutoConfirm),
    };
    let app = http::router(state).layer(cors);

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("tutord listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    // Stop accepting on SIGTERM/ctrl-c; axum drains in-flight requests.
    let shutdown = async {
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
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("tutord stopped");
    Ok(())
}

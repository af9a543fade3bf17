use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vespers::compactor;
use vespers::config::Config;
use vespers::engine::Engine;
use vespers::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vespers=info")),
        )
        .init();

    let config = Config::from_env()?;
    vespers::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let policy = config.policy()?;
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        Arc::new(NotifyHub::new()),
        policy,
    )?);

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("vespers listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  slots: {} from {}:00 to {}:00 every {} min",
        engine.grid().len(),
        config.open_hour,
        config.close_hour,
        config.slot_minutes
    );
    info!("  venues: {}", config.venues.join(", "));
    info!(
        "  booking intake: {}",
        if config.maintenance_mode { "closed" } else { "open" }
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    vespers::http::serve(listener, engine, shutdown_signal()).await?;
    info!("vespers stopped");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM. In-flight requests are drained by the server.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
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
    info!("shutdown signal received, draining requests");
}

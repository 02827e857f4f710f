use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use fleet_sync::admin::setup_admin_router;
use fleet_sync::config::{load_config, ConfigWatcher, ControlPlaneConfig};
use fleet_sync::http::HttpServer;
use fleet_sync::lifecycle::{bootstrap, signals, Shutdown};
use fleet_sync::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "fleet-sync")]
#[command(about = "Control plane for a multi-tenant proxy fleet", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "fleet-sync.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let from_file = cli.config.exists();
    let config = if from_file {
        load_config(&cli.config)?
    } else {
        ControlPlaneConfig::default()
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fleet-sync starting");
    if !from_file {
        tracing::warn!(path = ?cli.config, "Config file not found, using defaults");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        request_timeout_secs = config.timeouts.request_secs,
        heartbeat_timeout_secs = config.sync.heartbeat_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let services = bootstrap(config.clone())?;
    let shutdown = Shutdown::new();

    tokio::spawn(services.sweeper().run(shutdown.subscribe()));
    tokio::spawn(services.stats.clone().run_pruner(
        Duration::from_secs(config.sync.stats_window_secs),
        shutdown.subscribe(),
    ));

    // The watcher must outlive the server.
    let (config_updates, _watcher) = if from_file {
        let (watcher, updates) = ConfigWatcher::new(&cli.config);
        (updates, Some(watcher.run()?))
    } else {
        let (_, updates) = mpsc::unbounded_channel();
        (updates, None)
    };

    let state = services.app_state();

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let admin_router = setup_admin_router(state.clone());
        let mut admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(admin_listener, admin_router)
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for agents");

    let server = HttpServer::new(state);
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(server.run(listener, config_updates, server_shutdown));

    signals::wait_for_shutdown().await;
    shutdown.trigger();

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
        Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

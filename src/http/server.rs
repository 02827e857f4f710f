//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the agent endpoints
//! - Wire up middleware (tracing, limits, request ID, timeout)
//! - Bind to the listener, optionally behind TLS
//! - Apply hot-reloaded configuration to the running services

use arc_swap::ArcSwap;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{ControlPlaneConfig, TlsConfig};
use crate::http::agent;
use crate::http::request::{propagate_request_id_layer, request_span, set_request_id_layer};
use crate::http::tls::load_tls_config;
use crate::sync::SyncService;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub sync: SyncService,
    pub config: Arc<ArcSwap<ControlPlaneConfig>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(sync: SyncService, config: ControlPlaneConfig) -> Self {
        Self {
            sync,
            config: Arc::new(ArcSwap::from_pointee(config)),
            started_at: Instant::now(),
        }
    }

    /// Swap in a reloaded config. Listener and admin addresses keep their
    /// startup values.
    pub fn apply_config(&self, config: ControlPlaneConfig) {
        self.sync.apply_settings(config.sync.clone());
        self.sync
            .cache()
            .set_build_wait(Duration::from_millis(config.cache.build_wait_timeout_ms));
        tracing::info!(
            heartbeat_timeout_secs = config.sync.heartbeat_timeout_secs,
            sweep_interval_secs = config.sync.sweep_interval_secs,
            enrollment_keys = config.sync.enrollment_keys.len(),
            "Configuration reloaded"
        );
        self.config.store(Arc::new(config));
    }
}

/// HTTP server for the agent protocol.
pub struct HttpServer {
    router: Router,
    state: AppState,
    tls: Option<TlsConfig>,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let config = state.config.load_full();
        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            state,
            tls: config.listener.tls.clone(),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ControlPlaneConfig, state: AppState) -> Router {
        Router::new()
            .route("/api/v1/agent/register", post(agent::register))
            .route("/api/v1/agent/heartbeat", post(agent::heartbeat))
            .route("/api/v1/agent/config/{node_id}", get(agent::fetch_config))
            .route("/api/v1/agent/stats", post(agent::report_stats))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(set_request_id_layer())
    }

    /// Run the server until `shutdown` fires, applying config updates as
    /// they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ControlPlaneConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                state.apply_config(config);
            }
        });

        match &self.tls {
            Some(tls) => {
                let rustls = load_tls_config(tls).await?;
                tracing::info!(address = %addr, "HTTPS server starting");

                let handle = axum_server::Handle::new();
                let shutdown_handle = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
                });

                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(self.router.into_make_service())
                    .await?;
            }
            None => {
                tracing::info!(address = %addr, "HTTP server starting");
                axum::serve(listener, self.router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        tracing::info!("Shutdown signal received");
                    })
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}

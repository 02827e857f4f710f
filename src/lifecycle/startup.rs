//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem in dependency order
//! - Connect the store's change hook to cache invalidation
//!
//! # Design Decisions
//! - Fail fast: a broken seed file is fatal
//! - Listeners are bound by the caller, after bootstrap succeeds

use arc_swap::ArcSwap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{ConfigCache, InvalidationTrigger, MemoryCacheStore};
use crate::config::{ControlPlaneConfig, SyncConfig};
use crate::http::server::AppState;
use crate::liveness::LivenessSweeper;
use crate::stats::StatsAggregator;
use crate::store::seed::{load_seed, SeedError};
use crate::store::{ChangeHook, MemoryStore};
use crate::sync::SyncService;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load store seed: {0}")]
    Seed(#[from] SeedError),
}

/// Every long-lived component, wired together.
#[derive(Clone)]
pub struct Services {
    pub config: ControlPlaneConfig,
    pub store: Arc<MemoryStore>,
    pub cache_store: Arc<MemoryCacheStore>,
    pub cache: ConfigCache,
    pub stats: Arc<StatsAggregator>,
    pub settings: Arc<ArcSwap<SyncConfig>>,
    pub sync: SyncService,
    // The store holds its hook weakly.
    _invalidation: Arc<dyn ChangeHook>,
}

pub fn bootstrap(config: ControlPlaneConfig) -> Result<Services, StartupError> {
    let store = match &config.store.seed_path {
        Some(path) => Arc::new(MemoryStore::from_seed(load_seed(Path::new(path))?)),
        None => Arc::new(MemoryStore::new()),
    };
    let cache_store = Arc::new(MemoryCacheStore::new());
    let cache = ConfigCache::new(
        store.clone(),
        cache_store.clone(),
        Duration::from_millis(config.cache.build_wait_timeout_ms),
    );

    let invalidation: Arc<dyn ChangeHook> = Arc::new(InvalidationTrigger::new(cache.clone()));
    store.set_hook(&invalidation);

    let stats = Arc::new(StatsAggregator::new(
        config.sync.stats_window_secs,
        config.sync.stats_retention_windows,
    ));
    let settings = Arc::new(ArcSwap::from_pointee(config.sync.clone()));
    let sync = SyncService::new(store.clone(), cache.clone(), stats.clone(), settings.clone());

    tracing::info!(
        seeded = config.store.seed_path.is_some(),
        enrollment_keys = config.sync.enrollment_keys.len(),
        heartbeat_timeout_secs = config.sync.heartbeat_timeout_secs,
        "Services initialized"
    );

    Ok(Services {
        config,
        store,
        cache_store,
        cache,
        stats,
        settings,
        sync,
        _invalidation: invalidation,
    })
}

impl Services {
    pub fn sweeper(&self) -> LivenessSweeper {
        LivenessSweeper::new(self.store.clone(), self.settings.clone())
    }

    /// Handler state shared by the agent and admin routers.
    pub fn app_state(&self) -> AppState {
        AppState::new(self.sync.clone(), self.config.clone())
    }
}

//! Versioned document cache with single-flight builds.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::store::{CacheEntry, CacheStore};
use crate::compiler::{compile, CompiledDocument};
use crate::error::{CacheError, SyncError, SyncResult};
use crate::model::{unix_now, NodeId, TenantId};
use crate::observability::metrics;
use crate::store::ConfigStore;

type SharedBuild = Shared<BoxFuture<'static, SyncResult<Arc<CompiledDocument>>>>;

/// A build currently running for one node.
struct InFlight {
    generation: u64,
    build_id: u64,
    build: SharedBuild,
}

/// Cache in front of the compiler.
///
/// A stored document is served only while its generation matches the node's
/// current generation. Concurrent misses for one node share a single build;
/// a build started before an invalidation is never joined by callers that
/// arrive after it. An invalidation that fails while the cache store is down
/// is held in `pending` and replayed before the node's next cached read.
#[derive(Clone)]
pub struct ConfigCache {
    store: Arc<dyn ConfigStore>,
    cache: Arc<dyn CacheStore>,
    in_flight: Arc<DashMap<NodeId, InFlight>>,
    pending: Arc<DashMap<NodeId, TenantId>>,
    build_wait_ms: Arc<AtomicU64>,
    next_build_id: Arc<AtomicU64>,
    builds: Arc<AtomicU64>,
}

impl ConfigCache {
    pub fn new(store: Arc<dyn ConfigStore>, cache: Arc<dyn CacheStore>, build_wait: Duration) -> Self {
        Self {
            store,
            cache,
            in_flight: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            build_wait_ms: Arc::new(AtomicU64::new(build_wait.as_millis() as u64)),
            next_build_id: Arc::new(AtomicU64::new(0)),
            builds: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Applies to waits that start after the call.
    pub fn set_build_wait(&self, build_wait: Duration) {
        self.build_wait_ms
            .store(build_wait.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of compiles run so far, direct fallbacks included.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// The current document for `node`, building it if the cached one is stale
    /// or a client bound into it has since expired.
    ///
    /// Falls back to an uncached compile when the cache store is unreachable.
    pub async fn get(&self, tenant: &TenantId, node: NodeId) -> SyncResult<Arc<CompiledDocument>> {
        if let Err(e) = self.replay_pending(node).await {
            return self.fallback(tenant, node, e).await;
        }

        let generation = match self.cache.generation(node).await {
            Ok(generation) => generation,
            Err(e) => return self.fallback(tenant, node, e).await,
        };

        match self.cache.load(node).await {
            Ok(Some(entry))
                if entry.generation == generation && !entry.document.is_outlived(unix_now()) =>
            {
                if &entry.document.tenant_id != tenant {
                    return Err(SyncError::NotFound(node));
                }
                metrics::record_cache_lookup("hit");
                return Ok(entry.document);
            }
            Ok(_) => {}
            Err(e) => return self.fallback(tenant, node, e).await,
        }

        let build = self.join_or_start(tenant, node, generation);
        let wait_ms = self.build_wait_ms.load(Ordering::Relaxed);
        match tokio::time::timeout(Duration::from_millis(wait_ms), build).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    node_id = %node,
                    tenant_id = %tenant,
                    wait_ms,
                    "Gave up waiting for config build"
                );
                Err(SyncError::BuildTimeout(wait_ms))
            }
        }
    }

    /// Mark every cached document for `node` stale. Never builds.
    ///
    /// On failure the node stays pending until a later read replays the bump.
    pub async fn invalidate(&self, tenant: &TenantId, node: NodeId) -> SyncResult<()> {
        match self.cache.bump_generation(node).await {
            Ok(generation) => {
                metrics::record_invalidation();
                tracing::debug!(node_id = %node, tenant_id = %tenant, generation, "Config invalidated");
                Ok(())
            }
            Err(e) => {
                self.pending.insert(node, tenant.clone());
                tracing::error!(node_id = %node, tenant_id = %tenant, error = %e, "Invalidation failed, deferred");
                Err(e.into())
            }
        }
    }

    /// Whether `node` has an invalidation waiting to be replayed.
    pub fn is_pending(&self, node: NodeId) -> bool {
        self.pending.contains_key(&node)
    }

    /// Re-issue a deferred invalidation for `node`, if one is held.
    async fn replay_pending(&self, node: NodeId) -> Result<(), CacheError> {
        let Some((_, tenant)) = self.pending.remove(&node) else {
            return Ok(());
        };
        match self.cache.bump_generation(node).await {
            Ok(generation) => {
                metrics::record_invalidation();
                tracing::info!(node_id = %node, tenant_id = %tenant, generation, "Deferred invalidation replayed");
                Ok(())
            }
            Err(e) => {
                self.pending.entry(node).or_insert(tenant);
                Err(e)
            }
        }
    }

    /// Record `document` as current for its node, e.g. one built by another instance.
    pub async fn put(&self, document: CompiledDocument) -> SyncResult<bool> {
        let node = document.node_id;
        let generation = self.cache.generation(node).await?;
        let entry = CacheEntry {
            generation,
            document: Arc::new(document),
        };
        Ok(self.cache.store(node, entry).await?)
    }

    /// Version last handed to the agent, if any.
    pub async fn delivered(&self, node: NodeId) -> SyncResult<Option<String>> {
        Ok(self.cache.delivered(node).await?)
    }

    pub async fn mark_delivered(&self, node: NodeId, version: &str) -> SyncResult<()> {
        Ok(self.cache.set_delivered(node, version).await?)
    }

    pub async fn clear_delivered(&self, node: NodeId) -> SyncResult<()> {
        Ok(self.cache.clear_delivered(node).await?)
    }

    /// Compile straight from the store without touching the cache.
    pub async fn compile_direct(&self, tenant: &TenantId, node: NodeId) -> SyncResult<Arc<CompiledDocument>> {
        self.compile_snapshot(tenant, node).await.map(Arc::new)
    }

    async fn fallback(
        &self,
        tenant: &TenantId,
        node: NodeId,
        error: CacheError,
    ) -> SyncResult<Arc<CompiledDocument>> {
        tracing::warn!(
            node_id = %node,
            tenant_id = %tenant,
            error = %error,
            "Cache unavailable, compiling directly"
        );
        metrics::record_cache_lookup("fallback");
        self.compile_direct(tenant, node).await
    }

    fn join_or_start(&self, tenant: &TenantId, node: NodeId, generation: u64) -> SharedBuild {
        match self.in_flight.entry(node) {
            Entry::Occupied(existing) if existing.get().generation >= generation => {
                metrics::record_cache_lookup("joined");
                existing.get().build.clone()
            }
            slot => {
                metrics::record_cache_lookup("miss");
                let build_id = self.next_build_id.fetch_add(1, Ordering::Relaxed);
                let build = self.spawn_build(tenant.clone(), node, generation, build_id);
                let in_flight = InFlight {
                    generation,
                    build_id,
                    build: build.clone(),
                };
                match slot {
                    Entry::Occupied(mut stale) => {
                        stale.insert(in_flight);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(in_flight);
                    }
                }
                build
            }
        }
    }

    /// Run the build on its own task so a caller timing out cannot cancel it.
    fn spawn_build(&self, tenant: TenantId, node: NodeId, generation: u64, build_id: u64) -> SharedBuild {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = this.build_and_store(&tenant, node, generation).await;
            this.in_flight.remove_if(&node, |_, f| f.build_id == build_id);
            result
        });
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::Internal(format!("config build task failed: {}", e))),
            }
        }
        .boxed()
        .shared()
    }

    async fn build_and_store(
        &self,
        tenant: &TenantId,
        node: NodeId,
        generation: u64,
    ) -> SyncResult<Arc<CompiledDocument>> {
        let document = Arc::new(self.compile_snapshot(tenant, node).await?);
        let entry = CacheEntry {
            generation,
            document: document.clone(),
        };
        match self.cache.store(node, entry).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(node_id = %node, generation, "Newer config already cached; build not stored");
            }
            Err(e) => {
                tracing::warn!(node_id = %node, tenant_id = %tenant, error = %e, "Failed to store compiled config");
            }
        }
        Ok(document)
    }

    async fn compile_snapshot(&self, tenant: &TenantId, node: NodeId) -> SyncResult<CompiledDocument> {
        let snapshot = match self.store.snapshot(tenant, node).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Err(SyncError::NotFound(node)),
            Err(e) => {
                metrics::record_compile_failure();
                tracing::error!(node_id = %node, tenant_id = %tenant, error = %e, "Snapshot load failed");
                return Err(e.into());
            }
        };

        let started = Instant::now();
        let document = compile(&snapshot, unix_now());
        metrics::record_compile(started.elapsed(), &document.issues);
        self.builds.fetch_add(1, Ordering::Relaxed);

        for issue in &document.issues {
            tracing::warn!(
                node_id = %node,
                tenant_id = %tenant,
                code = issue.code(),
                "{}",
                issue
            );
        }
        tracing::debug!(
            node_id = %node,
            tenant_id = %tenant,
            version = %document.version,
            issues = document.issues.len(),
            "Config compiled"
        );
        Ok(document)
    }
}

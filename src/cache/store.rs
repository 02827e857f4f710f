//! Shared cache store interface and its in-process implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::compiler::CompiledDocument;
use crate::error::CacheError;
use crate::model::NodeId;

/// A compiled document tagged with the generation it was built for.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub generation: u64,
    pub document: Arc<CompiledDocument>,
}

/// Key-value store shared by every control-plane instance.
///
/// Holds three things per node: the invalidation generation, the last
/// compiled entry and the version last handed to the agent.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Current generation; `0` for a node never invalidated.
    async fn generation(&self, node: NodeId) -> Result<u64, CacheError>;

    /// Advance the generation, making every stored entry stale. Returns the new value.
    async fn bump_generation(&self, node: NodeId) -> Result<u64, CacheError>;

    async fn load(&self, node: NodeId) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `entry` unless a newer generation is already stored.
    ///
    /// Returns whether the entry was written.
    async fn store(&self, node: NodeId, entry: CacheEntry) -> Result<bool, CacheError>;

    async fn delivered(&self, node: NodeId) -> Result<Option<String>, CacheError>;

    async fn set_delivered(&self, node: NodeId, version: &str) -> Result<(), CacheError>;

    async fn clear_delivered(&self, node: NodeId) -> Result<(), CacheError>;
}

/// `CacheStore` on concurrent maps.
///
/// `set_available(false)` makes every call fail, which is how tests exercise
/// the outage path.
pub struct MemoryCacheStore {
    generations: DashMap<NodeId, u64>,
    entries: DashMap<NodeId, CacheEntry>,
    delivered: DashMap<NodeId, String>,
    available: AtomicBool,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            generations: DashMap::new(),
            entries: DashMap::new(),
            delivered: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("memory cache marked unavailable".into()))
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn generation(&self, node: NodeId) -> Result<u64, CacheError> {
        self.check()?;
        Ok(self.generations.get(&node).map(|g| *g).unwrap_or(0))
    }

    async fn bump_generation(&self, node: NodeId) -> Result<u64, CacheError> {
        self.check()?;
        let mut generation = self.generations.entry(node).or_insert(0);
        *generation += 1;
        Ok(*generation)
    }

    async fn load(&self, node: NodeId) -> Result<Option<CacheEntry>, CacheError> {
        self.check()?;
        Ok(self.entries.get(&node).map(|e| e.value().clone()))
    }

    async fn store(&self, node: NodeId, entry: CacheEntry) -> Result<bool, CacheError> {
        self.check()?;
        let current = self.generations.get(&node).map(|g| *g).unwrap_or(0);
        if entry.generation < current {
            return Ok(false);
        }
        let mut written = false;
        self.entries
            .entry(node)
            .and_modify(|existing| {
                if entry.generation >= existing.generation {
                    *existing = entry.clone();
                    written = true;
                }
            })
            .or_insert_with(|| {
                written = true;
                entry.clone()
            });
        Ok(written)
    }

    async fn delivered(&self, node: NodeId) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.delivered.get(&node).map(|v| v.value().clone()))
    }

    async fn set_delivered(&self, node: NodeId, version: &str) -> Result<(), CacheError> {
        self.check()?;
        self.delivered.insert(node, version.to_string());
        Ok(())
    }

    async fn clear_delivered(&self, node: NodeId) -> Result<(), CacheError> {
        self.check()?;
        self.delivered.remove(&node);
        Ok(())
    }
}

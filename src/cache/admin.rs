use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::{CacheStats, CacheStore};
use crate::error::{AppError, AppResult};

/// Registry of named caches for introspection and maintenance
#[derive(Clone, Default)]
pub struct CacheAdmin {
    caches: BTreeMap<String, Arc<CacheStore>>,
}

impl CacheAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cache under its own name
    pub fn register(&mut self, cache: Arc<CacheStore>) {
        self.caches.insert(cache.name().to_string(), cache);
    }

    pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.register(cache);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> AppResult<&Arc<CacheStore>> {
        self.caches
            .get(name)
            .ok_or_else(|| AppError::UnknownCache(name.to_string()))
    }

    pub fn stats(&self, name: &str) -> AppResult<CacheStats> {
        Ok(self.get(name)?.stats())
    }

    pub fn stats_all(&self) -> BTreeMap<String, CacheStats> {
        self.caches
            .iter()
            .map(|(name, cache)| (name.clone(), cache.stats()))
            .collect()
    }

    /// Remove every entry of the named cache from both tiers
    pub async fn clear(&self, name: &str) -> AppResult<usize> {
        let removed = self.get(name)?.clear().await?;
        info!(cache = name, removed, "Cache cleared by admin");
        Ok(removed)
    }

    pub fn reset_stats(&self, name: &str) -> AppResult<()> {
        self.get(name)?.reset_stats();
        Ok(())
    }
}

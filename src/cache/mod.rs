//! Two-tier cache store
//!
//! A `CacheStore` is one named cache: an LRU memory tier in front of an optional
//! JSON-file disk tier. Reads walk the tiers in order and promote lower-tier
//! hits upward. Every read checks TTL against the store's clock, and a
//! background sweeper removes whatever expires without being read.

pub mod admin;
pub mod entry;
pub mod tiers;


pub use admin::CacheAdmin;
pub use entry::{CacheEntry, Clock, SystemClock, Tier};
pub use tiers::{CacheTier, DiskTier, MemoryTier};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

/// Construction parameters for one named cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Cache name; also the disk namespace directory
    pub name: String,
    /// Default entry lifetime
    pub ttl: Duration,
    /// Memory tier capacity in entries
    pub memory_capacity: usize,
    /// Disk tier capacity in entries
    pub disk_capacity: usize,
    /// Root directory for the disk tier; `None` keeps the cache in memory only
    pub disk_root: Option<PathBuf>,
    /// Upper bound for a single disk operation
    pub disk_io_timeout: Duration,
}

impl CacheSettings {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            memory_capacity: 1024,
            disk_capacity: 10_000,
            disk_root: None,
            disk_io_timeout: Duration::from_millis(200),
        }
    }

    pub fn with_disk(mut self, root: impl Into<PathBuf>) -> Self {
        self.disk_root = Some(root.into());
        self
    }

    pub fn with_capacity(mut self, memory: usize, disk: usize) -> Self {
        self.memory_capacity = memory.max(1);
        self.disk_capacity = disk.max(1);
        self
    }

    pub fn with_disk_io_timeout(mut self, timeout: Duration) -> Self {
        self.disk_io_timeout = timeout;
        self
    }
}

/// Point-in-time view of a cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Approximate key plus payload bytes held in memory
    pub memory_bytes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Named two-tier cache with TTL
pub struct CacheStore {
    name: String,
    ttl: Duration,
    tiers: Vec<Box<dyn CacheTier>>,
    counters: Mutex<Counters>,
    /// Bumped by invalidate/clear so in-flight promotions can detect them
    epoch: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Open a cache using the wall clock
    pub async fn open(settings: CacheSettings) -> AppResult<Self> {
        Self::open_with_clock(settings, Arc::new(SystemClock)).await
    }

    /// Open a cache, loading any surviving disk entries and warming memory with the newest
    pub async fn open_with_clock(settings: CacheSettings, clock: Arc<dyn Clock>) -> AppResult<Self> {
        let memory = MemoryTier::new(settings.memory_capacity);
        let mut tiers: Vec<Box<dyn CacheTier>> = Vec::with_capacity(2);

        let mut warmed = 0;
        if let Some(root) = &settings.disk_root {
            let (disk, entries) = DiskTier::open(
                root.join(&settings.name),
                settings.disk_capacity,
                settings.disk_io_timeout,
                clock.now(),
            )
            .await?;

            // Oldest first so the newest end up most recently used
            for entry in entries.into_iter().take(settings.memory_capacity).rev() {
                memory.promote(entry).await?;
                warmed += 1;
            }
            tiers.push(Box::new(memory));
            tiers.push(Box::new(disk));
        } else {
            tiers.push(Box::new(memory));
        }

        info!(
            cache = %settings.name,
            ttl_secs = settings.ttl.as_secs(),
            persistent = settings.disk_root.is_some(),
            warmed,
            "Cache opened"
        );

        Ok(Self {
            name: settings.name,
            ttl: settings.ttl,
            tiers,
            counters: Mutex::new(Counters::default()),
            epoch: AtomicU64::new(0),
            clock,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn record(&self, update: impl FnOnce(&mut Counters)) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut counters);
    }

    /// Get a value, promoting disk hits into memory
    pub async fn get(&self, key: &str) -> Option<String> {
        self.lookup(key).await.map(|entry| entry.value)
    }

    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let epoch = self.epoch.load(Ordering::Acquire);
        let now = self.clock.now();

        for (level, tier) in self.tiers.iter().enumerate() {
            let entry = match tier.try_get(key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(AppError::CacheCorruption(msg)) => {
                    warn!(cache = %self.name, tier = tier.tier().as_str(), "Cache corruption, treating as miss: {}", msg);
                    continue;
                }
                Err(e) => {
                    warn!(cache = %self.name, tier = tier.tier().as_str(), error = %e, "Cache read failed, treating as miss");
                    continue;
                }
            };

            if entry.is_expired_at(now) {
                let removed = self.remove_expired_everywhere(key, now).await;
                self.record(|c| {
                    c.misses += 1;
                    if removed {
                        c.evictions += 1;
                    }
                });
                debug!(cache = %self.name, tier = entry.tier.as_str(), "Cache entry expired");
                return None;
            }

            if level > 0 && self.epoch.load(Ordering::Acquire) == epoch {
                let mut evicted = 0;
                for upper in &self.tiers[..level] {
                    match upper.promote(entry.clone()).await {
                        Ok(n) => evicted += n,
                        Err(e) => warn!(cache = %self.name, error = %e, "Cache promotion failed"),
                    }
                }
                if evicted > 0 {
                    self.record(|c| c.evictions += evicted as u64);
                }
            }

            self.record(|c| c.hits += 1);
            debug!(cache = %self.name, tier = entry.tier.as_str(), "Cache hit");
            return Some(entry);
        }

        self.record(|c| c.misses += 1);
        debug!(cache = %self.name, "Cache miss");
        None
    }

    /// Get and deserialize a value; an undecodable payload is dropped and reported as a miss
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(cache = %self.name, error = %e, "Cached payload does not decode, invalidating");
                self.remove_everywhere(key).await;
                self.reclassify_hit_as_miss();
                None
            }
        }
    }

    /// Like `get_json`, but a value rejected by `accept` is counted as a miss
    pub async fn get_json_where<T, F>(&self, key: &str, accept: F) -> Option<T>
    where
        T: DeserializeOwned,
        F: FnOnce(&T) -> bool,
    {
        let value = self.get_json::<T>(key).await?;
        if accept(&value) {
            Some(value)
        } else {
            self.reclassify_hit_as_miss();
            None
        }
    }

    fn reclassify_hit_as_miss(&self) {
        self.record(|c| {
            c.hits = c.hits.saturating_sub(1);
            c.misses += 1;
        });
    }

    /// Store a value with the cache's default TTL
    pub async fn set(&self, key: &str, value: String) {
        self.set_with_ttl(key, value, self.ttl).await
    }

    /// Store a value; lower-tier write failures are logged and absorbed
    pub async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) {
        let entry = CacheEntry::new(key, value, self.clock.now(), ttl.as_secs());
        let mut evicted = 0;

        for tier in &self.tiers {
            match tier.put(entry.clone()).await {
                Ok(n) => evicted += n,
                Err(e) => warn!(
                    cache = %self.name,
                    tier = tier.tier().as_str(),
                    error = %e,
                    "Cache write failed, value remains in upper tiers"
                ),
            }
        }

        if evicted > 0 {
            self.record(|c| c.evictions += evicted as u64);
        }
    }

    /// Serialize and store a value with the default TTL
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> AppResult<()> {
        self.set_json_with_ttl(key, value, self.ttl).await
    }

    /// Serialize and store a value with an explicit TTL
    pub async fn set_json_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_with_ttl(key, raw, ttl).await;
        Ok(())
    }

    async fn remove_everywhere(&self, key: &str) -> bool {
        let mut removed = false;
        for tier in &self.tiers {
            match tier.remove(key).await {
                Ok(hit) => removed |= hit,
                Err(e) => warn!(cache = %self.name, tier = tier.tier().as_str(), error = %e, "Cache delete failed"),
            }
        }
        removed
    }

    async fn remove_expired_everywhere(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut removed = false;
        for tier in &self.tiers {
            match tier.remove_if_expired(key, now).await {
                Ok(hit) => removed |= hit,
                Err(e) => warn!(cache = %self.name, tier = tier.tier().as_str(), error = %e, "Cache delete failed"),
            }
        }
        removed
    }

    /// Remove a key from every tier; absent keys are fine
    pub async fn invalidate(&self, key: &str) -> bool {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.remove_everywhere(key).await
    }

    /// Remove every entry from every tier; returns the number of distinct keys removed
    pub async fn clear(&self) -> AppResult<usize> {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let keys: HashSet<String> = self.tiers.iter().flat_map(|t| t.keys()).collect();

        for tier in &self.tiers {
            if let Err(e) = tier.clear().await {
                warn!(cache = %self.name, tier = tier.tier().as_str(), error = %e, "Cache clear incomplete");
            }
        }

        let remaining: HashSet<String> = self.tiers.iter().flat_map(|t| t.keys()).collect();
        let removed = keys.difference(&remaining).count();
        info!(cache = %self.name, removed, remaining = remaining.len(), "Cache cleared");
        Ok(removed)
    }

    /// Remove expired entries from every tier; returns the number of distinct keys removed
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: HashSet<String> = self
            .tiers
            .iter()
            .flat_map(|t| t.expired_keys(now))
            .collect();

        let mut removed = 0usize;
        for key in &expired {
            if self.remove_expired_everywhere(key, now).await {
                removed += 1;
            }
        }

        if removed > 0 {
            self.record(|c| c.evictions += removed as u64);
            debug!(cache = %self.name, removed, "Swept expired entries");
        }
        removed
    }

    fn tier_ref(&self, tier: Tier) -> Option<&dyn CacheTier> {
        self.tiers.iter().find(|t| t.tier() == tier).map(|t| t.as_ref())
    }

    /// Counters and tier sizes, read together under the counter lock
    pub fn stats(&self) -> CacheStats {
        let c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let memory = self.tier_ref(Tier::Memory);
        CacheStats {
            memory_entries: memory.map(|t| t.len()).unwrap_or(0),
            disk_entries: self.tier_ref(Tier::Disk).map(|t| t.len()).unwrap_or(0),
            hits: c.hits,
            misses: c.misses,
            evictions: c.evictions,
            memory_bytes: memory.map(|t| t.size_bytes()).unwrap_or(0),
        }
    }

    /// Zero hit, miss and eviction counters
    pub fn reset_stats(&self) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters = Counters::default();
    }

    /// Run `sweep_expired` every `interval` until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.sweep_expired().await;
                if removed > 0 {
                    info!(cache = %store.name, removed, "Expired cache entries swept");
                }
            }
        })
    }
}

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::{debug, warn};

use super::entry::{CacheEntry, Tier};
use crate::error::{AppError, AppResult};

/// One level of a cache's tier chain.
///
/// Tiers only store and return entries; expiry decisions, counters and promotion
/// belong to the owning store.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn tier(&self) -> Tier;

    /// Fetch an entry; `CacheCorruption` means the tier already discarded it
    async fn try_get(&self, key: &str) -> AppResult<Option<CacheEntry>>;

    /// Insert or overwrite; returns the number of entries evicted for capacity
    async fn put(&self, entry: CacheEntry) -> AppResult<usize>;

    /// Insert an entry read from a lower tier without replacing newer data
    async fn promote(&self, entry: CacheEntry) -> AppResult<usize> {
        self.put(entry).await
    }

    async fn remove(&self, key: &str) -> AppResult<bool>;

    /// Remove `key` only if the stored entry is still expired at `now`.
    ///
    /// The check and the removal happen under the tier's own lock, so an entry
    /// refreshed by a concurrent `put` survives.
    async fn remove_if_expired(&self, key: &str, now: DateTime<Utc>) -> AppResult<bool>;

    /// Remove everything; returns how many entries were removed
    async fn clear(&self) -> AppResult<usize>;

    fn keys(&self) -> Vec<String>;

    fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String>;

    fn len(&self) -> usize;

    fn size_bytes(&self) -> usize;
}

/// Bounded LRU map of entries
pub struct MemoryTier {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn insert(&self, entry: CacheEntry, keep_newer: bool) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if keep_newer {
            if let Some(existing) = entries.peek(&entry.key) {
                if existing.created_at >= entry.created_at {
                    return 0;
                }
            }
        }
        let key = entry.key.clone();
        match entries.push(key.clone(), entry.with_tier(Tier::Memory)) {
            Some((evicted, _)) if evicted != key => 1,
            _ => 0,
        }
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn tier(&self) -> Tier {
        Tier::Memory
    }

    async fn try_get(&self, key: &str) -> AppResult<Option<CacheEntry>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> AppResult<usize> {
        Ok(self.insert(entry, false))
    }

    async fn promote(&self, entry: CacheEntry) -> AppResult<usize> {
        Ok(self.insert(entry, true))
    }

    async fn remove(&self, key: &str) -> AppResult<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.pop(key).is_some())
    }

    async fn remove_if_expired(&self, key: &str, now: DateTime<Utc>) -> AppResult<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = entries.peek(key).map_or(false, |e| e.is_expired_at(now));
        if expired {
            entries.pop(key);
        }
        Ok(expired)
    }

    async fn clear(&self) -> AppResult<usize> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    fn keys(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|(k, _)| k.clone()).collect()
    }

    fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn size_bytes(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().map(|(_, e)| e.size_bytes()).sum()
    }
}

const WRITE_LOCK_STRIPES: usize = 16;

/// What the disk index knows about a file without reading it
#[derive(Debug, Clone)]
struct DiskMeta {
    key: String,
    created_at: DateTime<Utc>,
    ttl_secs: u64,
    path: PathBuf,
}

impl DiskMeta {
    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.created_at).num_milliseconds();
        age_ms > i64::try_from(self.ttl_secs).unwrap_or(i64::MAX).saturating_mul(1000)
    }
}

/// One JSON file per entry under a namespace directory.
///
/// Files are named after the farmhash of the key. An in-memory index maps the
/// hash to the stored key so misses cost no I/O. Writes land in a temp file
/// and are renamed into place. File mutations for one hash are serialized by
/// a striped async lock, and the index is re-checked under it before deleting.
pub struct DiskTier {
    dir: PathBuf,
    capacity: usize,
    io_timeout: Duration,
    index: Mutex<HashMap<u64, DiskMeta>>,
    write_locks: Vec<tokio::sync::Mutex<()>>,
}

fn key_hash(key: &str) -> u64 {
    farmhash::hash64(key.as_bytes())
}

impl DiskTier {
    /// Open (creating if needed) a namespace directory.
    ///
    /// Expired, corrupt and leftover temp files are deleted. Valid entries are
    /// indexed and returned newest first so the caller can warm upper tiers.
    pub async fn open(
        dir: impl AsRef<Path>,
        capacity: usize,
        io_timeout: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<(Self, Vec<CacheEntry>)> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let mut valid = Vec::new();
        let mut discarded = 0usize;
        let mut listing = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = listing.next_entry().await? {
            let path = item.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            if file_name.ends_with(".tmp") {
                let _ = tokio::fs::remove_file(&path).await;
                discarded += 1;
                continue;
            }
            if !file_name.ends_with(".json") {
                continue;
            }

            let record = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<CacheEntry>(&bytes).ok(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable cache file");
                    None
                }
            };

            match record {
                Some(entry)
                    if !entry.is_expired_at(now)
                        && file_name == format!("{:016x}.json", key_hash(&entry.key)) =>
                {
                    valid.push((path, entry));
                }
                _ => {
                    let _ = tokio::fs::remove_file(&path).await;
                    discarded += 1;
                }
            }
        }

        valid.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
        let capacity = capacity.max(1);
        for (path, _) in valid.iter().skip(capacity) {
            let _ = tokio::fs::remove_file(path).await;
            discarded += 1;
        }
        valid.truncate(capacity);

        let index = valid
            .iter()
            .map(|(path, entry)| {
                (
                    key_hash(&entry.key),
                    DiskMeta {
                        key: entry.key.clone(),
                        created_at: entry.created_at,
                        ttl_secs: entry.ttl_secs,
                        path: path.clone(),
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        debug!(
            dir = %dir.display(),
            loaded = index.len(),
            discarded,
            "Opened disk cache tier"
        );

        let tier = Self {
            dir,
            capacity,
            io_timeout,
            index: Mutex::new(index),
            write_locks: (0..WRITE_LOCK_STRIPES).map(|_| tokio::sync::Mutex::new(())).collect(),
        };
        Ok((tier, valid.into_iter().map(|(_, entry)| entry).collect()))
    }

    fn path_for(&self, hash: u64) -> PathBuf {
        self.dir.join(format!("{:016x}.json", hash))
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(AppError::IoError(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("disk {} timed out after {:?}", op, self.io_timeout),
            ))),
        }
    }

    async fn delete_file(&self, path: &Path) -> AppResult<()> {
        match self.bounded("delete", tokio::fs::remove_file(path)).await {
            Err(AppError::IoError(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn write_lock(&self, hash: u64) -> &tokio::sync::Mutex<()> {
        &self.write_locks[(hash % WRITE_LOCK_STRIPES as u64) as usize]
    }

    fn is_indexed(&self, hash: u64) -> bool {
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&hash)
    }

    /// Drop the index entry for `key` if it still matches `accept`
    fn forget_if(&self, hash: u64, key: &str, accept: impl FnOnce(&DiskMeta) -> bool) -> Option<DiskMeta> {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let matches = index.get(&hash).map_or(false, |meta| meta.key == key && accept(meta));
        if matches {
            index.remove(&hash)
        } else {
            None
        }
    }

    /// Delete a file whose index entry was already dropped, unless a newer write reclaimed the hash
    async fn delete_unindexed(&self, hash: u64, path: &Path) -> AppResult<()> {
        let _guard = self.write_lock(hash).lock().await;
        if self.is_indexed(hash) {
            return Ok(());
        }
        self.delete_file(path).await
    }

    /// Delete `.json` files the index does not know about
    async fn delete_orphans(&self) -> AppResult<usize> {
        let mut orphans = Vec::new();
        let mut listing = self.bounded("list", tokio::fs::read_dir(&self.dir)).await?;
        while let Some(item) = self.bounded("list", listing.next_entry()).await? {
            let path = item.path();
            let hash = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|stem| u64::from_str_radix(stem, 16).ok());
            if let Some(hash) = hash {
                orphans.push((hash, path));
            }
        }

        let mut removed = 0;
        for (hash, path) in orphans {
            let _guard = self.write_lock(hash).lock().await;
            if self.is_indexed(hash) {
                continue;
            }
            match self.delete_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete orphaned cache file"),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheTier for DiskTier {
    fn tier(&self) -> Tier {
        Tier::Disk
    }

    async fn try_get(&self, key: &str) -> AppResult<Option<CacheEntry>> {
        let hash = key_hash(key);
        let (path, created_at) = {
            let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            match index.get(&hash) {
                Some(meta) if meta.key == key => (meta.path.clone(), meta.created_at),
                _ => return Ok(None),
            }
        };
        let same_write = |meta: &DiskMeta| meta.created_at == created_at;

        let bytes = match self.bounded("read", tokio::fs::read(&path)).await {
            Ok(bytes) => bytes,
            Err(AppError::IoError(e)) if e.kind() == io::ErrorKind::NotFound => {
                self.forget_if(hash, key, same_write);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.key == key => Ok(Some(entry.with_tier(Tier::Disk))),
            Ok(entry) => {
                self.forget_if(hash, key, same_write);
                Err(AppError::CacheCorruption(format!(
                    "{} holds key {:?}, expected {:?}",
                    path.display(),
                    entry.key,
                    key
                )))
            }
            Err(e) => {
                let _guard = self.write_lock(hash).lock().await;
                if self.forget_if(hash, key, same_write).is_some() {
                    if let Err(delete_err) = self.delete_file(&path).await {
                        warn!(path = %path.display(), error = %delete_err, "Failed to delete corrupt cache file");
                    }
                }
                Err(AppError::CacheCorruption(format!("{}: {}", path.display(), e)))
            }
        }
    }

    async fn put(&self, entry: CacheEntry) -> AppResult<usize> {
        let hash = key_hash(&entry.key);
        let path = self.path_for(hash);
        let tmp = self
            .dir
            .join(format!("{:016x}.{}.tmp", hash, uuid::Uuid::new_v4().simple()));
        let payload = serde_json::to_vec(&entry)?;

        let guard = self.write_lock(hash).lock().await;
        let written = self
            .bounded("write", async {
                tokio::fs::write(&tmp, &payload).await?;
                tokio::fs::rename(&tmp, &path).await
            })
            .await;
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        let evicted = {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            index.insert(
                hash,
                DiskMeta {
                    key: entry.key.clone(),
                    created_at: entry.created_at,
                    ttl_secs: entry.ttl_secs,
                    path,
                },
            );

            let mut evicted = Vec::new();
            while index.len() > self.capacity {
                let oldest = index
                    .iter()
                    .filter(|(h, _)| **h != hash)
                    .min_by_key(|(_, meta)| meta.created_at)
                    .map(|(h, _)| *h);
                match oldest.and_then(|h| index.remove(&h).map(|meta| (h, meta))) {
                    Some(victim) => evicted.push(victim),
                    None => break,
                }
            }
            evicted
        };
        drop(guard);

        for (victim, meta) in &evicted {
            if let Err(e) = self.delete_unindexed(*victim, &meta.path).await {
                warn!(path = %meta.path.display(), error = %e, "Failed to delete evicted cache file");
            }
        }
        Ok(evicted.len())
    }

    async fn remove(&self, key: &str) -> AppResult<bool> {
        let hash = key_hash(key);
        let _guard = self.write_lock(hash).lock().await;
        match self.forget_if(hash, key, |_| true) {
            Some(meta) => {
                self.delete_file(&meta.path).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_if_expired(&self, key: &str, now: DateTime<Utc>) -> AppResult<bool> {
        let hash = key_hash(key);
        let _guard = self.write_lock(hash).lock().await;
        match self.forget_if(hash, key, |meta| meta.is_expired_at(now)) {
            Some(meta) => {
                self.delete_file(&meta.path).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear(&self) -> AppResult<usize> {
        let drained: Vec<(u64, DiskMeta)> = {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            index.drain().collect()
        };

        let mut removed = 0;
        let mut kept = Vec::new();
        for (hash, meta) in drained {
            match self.delete_unindexed(hash, &meta.path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %meta.path.display(), error = %e, "Failed to delete cache file during clear");
                    kept.push((hash, meta));
                }
            }
        }

        if !kept.is_empty() {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            for (hash, meta) in kept {
                index.entry(hash).or_insert(meta);
            }
        }

        // Writes that finished renaming after their timeout are on disk but not indexed
        match self.delete_orphans().await {
            Ok(0) => {}
            Ok(orphans) => debug!(dir = %self.dir.display(), orphans, "Deleted unindexed cache files"),
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "Failed to scan cache directory during clear"),
        }
        Ok(removed)
    }

    fn keys(&self) -> Vec<String> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index.values().map(|meta| meta.key.clone()).collect()
    }

    fn expired_keys(&self, now: DateTime<Utc>) -> Vec<String> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        index
            .values()
            .filter(|meta| meta.is_expired_at(now))
            .map(|meta| meta.key.clone())
            .collect()
    }

    fn len(&self) -> usize {
        self.index.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn size_bytes(&self) -> usize {
        0
    }
}

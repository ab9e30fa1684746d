use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::Tile;

/// Key for cached tiles: raster identity plus tile grid position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Raster identifier
    pub raster_id: Arc<str>,
    pub tile_x: usize,
    pub tile_y: usize,
}

impl TileKey {
    pub fn new(raster_id: &str, tile_x: usize, tile_y: usize) -> Self {
        TileKey {
            raster_id: Arc::from(raster_id),
            tile_x,
            tile_y,
        }
    }
}

/// Store/retrieve service for computed tiles, shared between threads
pub trait TileCache: Send + Sync {
    fn get(&self, key: &TileKey) -> Option<Arc<Tile>>;

    fn put(&self, key: TileKey, tile: Arc<Tile>);

    /// Drop every tile of one raster, e.g. after its parameters changed
    fn remove_raster(&self, raster_id: &str);

    fn clear(&self);
}

/// Tile cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileCacheConfig {
    /// Upper bound on the bytes held by cached tiles
    pub capacity_bytes: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 256 * 1024 * 1024, // 256 MB
        }
    }
}

struct CacheEntry {
    tile: Arc<Tile>,
    size_bytes: usize,
}

struct LruTiles {
    current_bytes: usize,
    capacity_bytes: usize,
    entries: LruCache<TileKey, CacheEntry>,
}

impl LruTiles {
    fn insert(&mut self, key: TileKey, tile: Arc<Tile>) {
        let size_bytes = tile.size_bytes();
        if size_bytes > self.capacity_bytes {
            log::debug!("Tile {:?} ({} bytes) exceeds cache capacity, not stored", key, size_bytes);
            return;
        }

        if let Some(old) = self.entries.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }

        while self.current_bytes + size_bytes > self.capacity_bytes {
            if let Some((_key, entry)) = self.entries.pop_lru() {
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            } else {
                break;
            }
        }

        self.current_bytes = self.current_bytes.saturating_add(size_bytes);
        self.entries.put(key, CacheEntry { tile, size_bytes });
    }
}

/// In-memory tile cache with least-recently-used eviction under a byte budget
pub struct MemoryTileCache {
    inner: Mutex<LruTiles>,
}

impl MemoryTileCache {
    pub fn new(config: TileCacheConfig) -> Self {
        MemoryTileCache {
            inner: Mutex::new(LruTiles {
                current_bytes: 0,
                capacity_bytes: config.capacity_bytes,
                entries: LruCache::unbounded(),
            }),
        }
    }

    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self::new(TileCacheConfig { capacity_bytes })
    }

    fn lock(&self) -> MutexGuard<'_, LruTiles> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of cached tiles
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently held
    pub fn current_bytes(&self) -> usize {
        self.lock().current_bytes
    }
}

impl Default for MemoryTileCache {
    fn default() -> Self {
        Self::new(TileCacheConfig::default())
    }
}

impl TileCache for MemoryTileCache {
    fn get(&self, key: &TileKey) -> Option<Arc<Tile>> {
        self.lock().entries.get(key).map(|entry| Arc::clone(&entry.tile))
    }

    fn put(&self, key: TileKey, tile: Arc<Tile>) {
        self.lock().insert(key, tile);
    }

    fn remove_raster(&self, raster_id: &str) {
        let mut tiles = self.lock();
        let stale: Vec<TileKey> = tiles
            .entries
            .iter()
            .filter(|(key, _)| &*key.raster_id == raster_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(entry) = tiles.entries.pop(&key) {
                tiles.current_bytes = tiles.current_bytes.saturating_sub(entry.size_bytes);
            }
        }
    }

    fn clear(&self) {
        let mut tiles = self.lock();
        tiles.entries.clear();
        tiles.current_bytes = 0;
    }
}

/// Counters collected by [`DiagnosticTileCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Pass-through cache wrapper that counts and traces every access
pub struct DiagnosticTileCache<C: TileCache> {
    inner: C,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
}

impl<C: TileCache> DiagnosticTileCache<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
        }
    }
}

impl<C: TileCache> TileCache for DiagnosticTileCache<C> {
    fn get(&self, key: &TileKey) -> Option<Arc<Tile>> {
        let tile = self.inner.get(key);
        if tile.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("tile cache hit {}:{},{}", key.raster_id, key.tile_x, key.tile_y);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            log::trace!("tile cache miss {}:{},{}", key.raster_id, key.tile_x, key.tile_y);
        }
        tile
    }

    fn put(&self, key: TileKey, tile: Arc<Tile>) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "tile cache put {}:{},{} ({} bytes)",
            key.raster_id,
            key.tile_x,
            key.tile_y,
            tile.size_bytes()
        );
        self.inner.put(key, tile);
    }

    fn remove_raster(&self, raster_id: &str) {
        log::trace!("tile cache remove raster {}", raster_id);
        self.inner.remove_raster(raster_id);
    }

    fn clear(&self) {
        log::trace!("tile cache clear");
        self.inner.clear();
    }
}

//! Tile cache facade.
//!
//! [`TileCache`] is the surface the rendering pipeline talks to. It maps
//! `(image, tile_x, tile_y)` to decoded tiles, bounds resident memory by the
//! byte weight of the tiles, and keeps hit/miss statistics.
//!
//! # Weight Bound
//!
//! The underlying map enforces `memory_capacity * memory_threshold` bytes.
//! Changing the capacity, threshold, concurrency level or eviction policy
//! discards all content and builds a fresh map; nothing is re-weighed in
//! place.
//!
//! # Diagnostics
//!
//! With diagnostics enabled every lifecycle transition refreshes the entry's
//! timestamp and is published to the registered observers. With diagnostics
//! disabled the facade skips both, which keeps the hot path to a map lookup
//! and a counter increment. The flag is read without synchronization, so a
//! toggle racing with in-flight operations may or may not affect them.
//!
//! # Statistics
//!
//! Hit, miss and eviction counters are relaxed atomics: approximate figures
//! that are not transactionally consistent with the cache contents. They are
//! only reset by a flush.
//!
//! # Flush
//!
//! A flush swaps in an empty map under the configuration lock, then drains
//! the old one with no lock held, so observers may call back into the cache.
//! Evictions the old map had already decided are reported before it is
//! retired; after that its listener is silenced. Entries inserted by other
//! threads while the swap is in progress may land in the old map and be
//! discarded with it.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::config::{validate_concurrency, validate_threshold, CacheConfig};
use crate::diagnostics::{ObserverId, ObserverRegistry, TileObserver};
use crate::error::CacheError;
use crate::map::{build_map, EvictionPolicy, MapSettings, WeightedConcurrentCache};

use super::entry::{CacheEntry, EntryAction, TileMetric};
use super::key::{SourceImage, TileKey};
use super::payload::Tile;

/// Maps a tile to its weight in bytes. Must be pure and O(1).
pub type TileWeigher<T> = Arc<dyn Fn(&T) -> u32 + Send + Sync>;

/// Ordering over entries, as used by comparator-driven eviction.
///
/// Only exists so the unsupported legacy operations have a signature.
pub type TileComparator<T> =
    Arc<dyn Fn(&CacheEntry<T>, &CacheEntry<T>) -> CmpOrdering + Send + Sync>;

type EntryMap<T> = Arc<dyn WeightedConcurrentCache<TileKey, Arc<CacheEntry<T>>>>;

/// One map instance plus the switch that silences its eviction listener.
struct Generation<T> {
    map: EntryMap<T>,
    live: Arc<AtomicBool>,
}

/// Weigher that reads [`Tile::byte_size`], saturating at `u32::MAX`.
pub fn byte_size_weigher<T: Tile>() -> TileWeigher<T> {
    Arc::new(|tile: &T| {
        let size = tile.byte_size();
        u32::try_from(size).unwrap_or_else(|_| {
            warn!(size, "Tile size exceeds u32 weight, saturating");
            u32::MAX
        })
    })
}

// =============================================================================
// Statistics
// =============================================================================

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups that found a tile, plus substitutions on add
    pub hits: u64,

    /// Lookups that found nothing
    pub misses: u64,

    /// Entries removed by the eviction policy
    pub evictions: u64,

    /// Number of resident tiles
    pub resident_count: usize,

    /// Total weight of resident tiles in bytes
    pub resident_weight: u64,

    /// Weight bound enforced by the map
    pub max_weight: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, 0.0 when nothing was looked up.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// State reachable from the map's eviction listener.
struct Shared<T> {
    diagnostics: AtomicBool,
    observers: ObserverRegistry<T>,
    evictions: AtomicU64,
}

impl<T> Shared<T> {
    fn diagnostics_enabled(&self) -> bool {
        self.diagnostics.load(Ordering::Relaxed)
    }

    /// Record a transition on `entry` and publish it, if diagnostics are on.
    fn notify(&self, entry: &CacheEntry<T>, action: EntryAction) {
        if self.diagnostics_enabled() {
            entry.record(action);
            self.observers.publish_entry(entry);
        }
    }

    fn on_eviction(&self, key: TileKey, entry: &CacheEntry<T>) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        trace!(%key, "Evicted tile");
        self.notify(entry, EntryAction::RemovalOnEviction);
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Concurrent, weight-bounded cache of decoded tiles.
///
/// All operations take `&self`; share the cache across threads with `Arc`.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use raster_tile_cache::{SourceImage, TileCache, TileGrid};
///
/// let cache: TileCache<Bytes> = TileCache::new();
/// let image = SourceImage::new("scene.tif", TileGrid::with_size(4, 4));
///
/// cache.add(&image, 0, 0, Bytes::from(vec![0u8; 256]), None);
///
/// assert!(cache.get(&image, 0, 0).is_some());
/// assert!(cache.get(&image, 1, 1).is_none());
/// assert_eq!(cache.hit_count(), 1);
/// assert_eq!(cache.miss_count(), 1);
/// ```
pub struct TileCache<T: Tile = Bytes> {
    map: RwLock<Generation<T>>,
    config: Mutex<CacheConfig>,
    weigher: TileWeigher<T>,
    shared: Arc<Shared<T>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Tile> TileCache<T> {
    /// Create a cache with the default configuration (16 MiB at 0.75).
    pub fn new() -> Self {
        Self::build(CacheConfig::default(), byte_size_weigher())
    }

    /// Create a cache from a configuration.
    pub fn with_config(config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_config_and_weigher(config, byte_size_weigher())
    }

    /// Create a cache with a custom tile weigher.
    pub fn with_config_and_weigher(
        config: CacheConfig,
        weigher: TileWeigher<T>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self::build(config, weigher))
    }

    fn build(config: CacheConfig, weigher: TileWeigher<T>) -> Self {
        let shared = Arc::new(Shared {
            diagnostics: AtomicBool::new(config.diagnostics),
            observers: ObserverRegistry::new(),
            evictions: AtomicU64::new(0),
        });
        let generation = build_generation(&config, &weigher, &shared);

        Self {
            map: RwLock::new(generation),
            config: Mutex::new(config),
            weigher,
            shared,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn map(&self) -> EntryMap<T> {
        self.map.read().map.clone()
    }

    // =========================================================================
    // Tile Operations
    // =========================================================================

    /// Cache `tile` at `(tile_x, tile_y)` of `image`.
    ///
    /// Replacing an existing tile counts as a hit. May evict unrelated tiles.
    pub fn add(
        &self,
        image: &SourceImage,
        tile_x: i32,
        tile_y: i32,
        tile: impl Into<Arc<T>>,
        metric: Option<TileMetric>,
    ) {
        let entry = Arc::new(CacheEntry::new(
            image.clone(),
            tile_x,
            tile_y,
            tile.into(),
            metric,
        ));
        let previous = self.map().put(image.key(tile_x, tile_y), entry.clone());

        if previous.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }

        if self.shared.diagnostics_enabled() {
            if let Some(old) = previous {
                self.shared.notify(&old, EntryAction::SubstitutionOnAdd);
            }
            self.shared.notify(&entry, EntryAction::Addition);
        }
    }

    /// Cache several tiles of one image, in input order.
    ///
    /// `positions` and `tiles` must have the same length; nothing is cached
    /// otherwise. Each tile goes to the map current at its turn, so a flush
    /// completing mid-batch only discards the tiles added before it.
    pub fn add_batch<I>(
        &self,
        image: &SourceImage,
        positions: &[(i32, i32)],
        tiles: Vec<I>,
        metric: Option<TileMetric>,
    ) -> Result<(), CacheError>
    where
        I: Into<Arc<T>>,
    {
        if positions.len() != tiles.len() {
            return Err(CacheError::invalid(format!(
                "batch has {} positions but {} tiles",
                positions.len(),
                tiles.len()
            )));
        }

        for (&(tile_x, tile_y), tile) in positions.iter().zip(tiles) {
            self.add(image, tile_x, tile_y, tile, metric.clone());
        }
        Ok(())
    }

    /// Look up a tile. Counts a hit or a miss.
    pub fn get(&self, image: &SourceImage, tile_x: i32, tile_y: i32) -> Option<Arc<T>> {
        match self.map().get(&image.key(tile_x, tile_y)) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.shared.notify(&entry, EntryAction::AccessRefresh);
                Some(entry.tile().clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up several tiles of one image. The result has one slot per
    /// position, `None` where the tile is absent.
    pub fn get_batch(&self, image: &SourceImage, positions: &[(i32, i32)]) -> Vec<Option<Arc<T>>> {
        positions
            .iter()
            .map(|&(tile_x, tile_y)| self.get(image, tile_x, tile_y))
            .collect()
    }

    /// Whether a tile is resident. Does not touch the counters.
    pub fn contains(&self, image: &SourceImage, tile_x: i32, tile_y: i32) -> bool {
        self.map().contains(&image.key(tile_x, tile_y))
    }

    /// Remove a tile, returning it if it was resident.
    pub fn remove(&self, image: &SourceImage, tile_x: i32, tile_y: i32) -> Option<Arc<T>> {
        let key = image.key(tile_x, tile_y);
        let map = self.map();
        if !self.shared.diagnostics_enabled() {
            return map.remove(&key).map(|entry| entry.tile().clone());
        }

        let pending = map.get(&key)?;
        self.shared.notify(&pending, EntryAction::AboutToRemove);

        let removed = map.remove(&key)?;
        self.shared.notify(&removed, EntryAction::RemovalManual);
        Some(removed.tile().clone())
    }

    /// Remove every tile of `image` by walking its declared tile grid.
    ///
    /// Costs one map operation per grid cell, independent of cache size.
    pub fn remove_tiles(&self, image: &SourceImage) {
        let mut removed = 0usize;
        for (tile_x, tile_y) in image.grid().positions() {
            if self.remove(image, tile_x, tile_y).is_some() {
                removed += 1;
            }
        }
        debug!(image = %image.id(), name = image.name(), removed, "Removed image tiles");
    }

    /// Discard all tiles, reset the counters and rebuild the map.
    pub fn flush(&self) {
        self.reconfigure(|_| {});
    }

    /// Reset hit/miss counters. Counters are coupled to content, so this
    /// flushes the cache.
    pub fn reset_counts(&self) {
        self.flush();
    }

    /// Apply `update` to the configuration and swap in a fresh map for it,
    /// then retire the old map once the configuration lock is released.
    fn reconfigure(&self, update: impl FnOnce(&mut CacheConfig)) {
        let (retired, config) = {
            let mut config = self.config.lock();
            update(&mut config);
            let fresh = build_generation(&config, &self.weigher, &self.shared);
            let retired = std::mem::replace(&mut *self.map.write(), fresh);
            (retired, config.clone())
        };
        self.retire(retired, &config);
    }

    /// Drain a map that is no longer reachable by new operations.
    ///
    /// Runs without any cache lock held, since observers are notified here.
    fn retire(&self, retired: Generation<T>, config: &CacheConfig) {
        // Evictions decided before the flush are reported as evictions, and
        // nothing after this point reaches the shared listener.
        retired.map.run_pending_tasks();
        retired.live.store(false, Ordering::Release);

        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.shared.evictions.store(0, Ordering::Relaxed);

        let discarded = if self.shared.diagnostics_enabled() {
            let entries = retired.map.entries();
            for (_, entry) in &entries {
                self.shared.notify(entry, EntryAction::RemovalOnFlush);
            }
            entries.len()
        } else {
            retired.map.size()
        };
        retired.map.clear();

        debug!(
            discarded,
            max_weight = config.max_weight(),
            concurrency = config.concurrency_level,
            policy = %config.eviction_policy,
            "Flushed tile cache"
        );
    }

    /// Drive deferred map maintenance so weight and counts settle.
    pub fn run_pending_tasks(&self) {
        self.map().run_pending_tasks();
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Set the memory capacity in bytes. Flushes the cache.
    pub fn set_memory_capacity(&self, bytes: u64) {
        self.reconfigure(|config| {
            debug!(from = config.memory_capacity, to = bytes, "Changing memory capacity");
            config.memory_capacity = bytes;
        });
    }

    /// Set the usable fraction of the capacity. Must be within [0, 1].
    /// Flushes the cache.
    pub fn set_memory_threshold(&self, threshold: f64) -> Result<(), CacheError> {
        validate_threshold(threshold)?;
        self.reconfigure(|config| {
            debug!(from = config.memory_threshold, to = threshold, "Changing memory threshold");
            config.memory_threshold = threshold;
        });
        Ok(())
    }

    /// Set the map's striping hint. Must be positive. Flushes the cache.
    pub fn set_concurrency_level(&self, level: usize) -> Result<(), CacheError> {
        validate_concurrency(level)?;
        self.reconfigure(|config| {
            debug!(from = config.concurrency_level, to = level, "Changing concurrency level");
            config.concurrency_level = level;
        });
        Ok(())
    }

    /// Switch the victim-selection strategy. Flushes the cache.
    pub fn set_eviction_policy(&self, policy: EvictionPolicy) {
        self.reconfigure(|config| {
            debug!(from = %config.eviction_policy, to = %policy, "Changing eviction policy");
            config.eviction_policy = policy;
        });
    }

    /// Start publishing lifecycle events. Existing tiles stay resident.
    pub fn enable_diagnostics(&self) {
        self.config.lock().diagnostics = true;
        self.shared.diagnostics.store(true, Ordering::Relaxed);
    }

    /// Stop publishing lifecycle events. Existing tiles stay resident.
    pub fn disable_diagnostics(&self) {
        self.config.lock().diagnostics = false;
        self.shared.diagnostics.store(false, Ordering::Relaxed);
    }

    /// Whether lifecycle events are currently published.
    pub fn is_diagnostics_enabled(&self) -> bool {
        self.shared.diagnostics_enabled()
    }

    /// Attach an observer for lifecycle events.
    pub fn add_observer(&self, observer: impl TileObserver<T> + 'static) -> ObserverId {
        self.shared.observers.register(Arc::new(observer))
    }

    /// Detach an observer. Returns `false` if it was not attached.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.shared.observers.unregister(id)
    }

    /// Number of attached observers.
    pub fn observer_count(&self) -> usize {
        self.shared.observers.len()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Snapshot of the current configuration.
    pub fn config(&self) -> CacheConfig {
        self.config.lock().clone()
    }

    /// Configured memory capacity in bytes.
    pub fn memory_capacity(&self) -> u64 {
        self.config.lock().memory_capacity
    }

    /// Fraction of the capacity usable by resident tiles.
    pub fn memory_threshold(&self) -> f64 {
        self.config.lock().memory_threshold
    }

    /// Striping hint the map was built with.
    pub fn concurrency_level(&self) -> usize {
        self.config.lock().concurrency_level
    }

    /// Active victim-selection strategy.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        self.config.lock().eviction_policy
    }

    /// Weight bound currently enforced by the map.
    pub fn max_weight(&self) -> u64 {
        self.map().max_weight()
    }

    /// Hits since the last flush, substitutions included.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Misses since the last flush.
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Evictions since the last flush.
    pub fn eviction_count(&self) -> u64 {
        self.shared.evictions.load(Ordering::Relaxed)
    }

    /// Total weight of resident tiles in bytes.
    pub fn resident_weight(&self) -> u64 {
        self.map().weighted_size()
    }

    /// Number of resident tiles.
    pub fn resident_count(&self) -> usize {
        self.map().size()
    }

    /// Snapshot of counters and residency.
    pub fn stats(&self) -> CacheStats {
        let map = self.map();
        CacheStats {
            hits: self.hit_count(),
            misses: self.miss_count(),
            evictions: self.eviction_count(),
            resident_count: map.size(),
            resident_weight: map.weighted_size(),
            max_weight: map.max_weight(),
        }
    }

    // =========================================================================
    // Unsupported Legacy Operations
    // =========================================================================

    /// Count-based capacity does not exist in the weight-bounded design.
    pub fn set_tile_capacity(&self, _tiles: usize) -> Result<(), CacheError> {
        Err(CacheError::UnsupportedOperation("set_tile_capacity"))
    }

    /// Count-based capacity does not exist in the weight-bounded design.
    pub fn tile_capacity(&self) -> Result<usize, CacheError> {
        Err(CacheError::UnsupportedOperation("tile_capacity"))
    }

    /// Victims are chosen by the eviction policy, not by a comparator.
    pub fn set_tile_comparator(&self, _comparator: TileComparator<T>) -> Result<(), CacheError> {
        Err(CacheError::UnsupportedOperation("set_tile_comparator"))
    }

    /// Victims are chosen by the eviction policy, not by a comparator.
    pub fn tile_comparator(&self) -> Result<TileComparator<T>, CacheError> {
        Err(CacheError::UnsupportedOperation("tile_comparator"))
    }

    /// Eviction runs as part of regular operations; there is no manual trigger.
    pub fn memory_control(&self) -> Result<(), CacheError> {
        Err(CacheError::UnsupportedOperation("memory_control"))
    }
}

impl<T: Tile> Default for TileCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Tile> fmt::Debug for TileCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("config", &self.config())
            .field("stats", &self.stats())
            .field("observers", &self.observer_count())
            .finish()
    }
}

fn build_generation<T: Tile>(
    config: &CacheConfig,
    weigher: &TileWeigher<T>,
    shared: &Arc<Shared<T>>,
) -> Generation<T> {
    let settings = MapSettings {
        max_weight: config.max_weight(),
        concurrency: config.concurrency_level.max(1),
    };

    let live = Arc::new(AtomicBool::new(true));
    let tile_weigher = weigher.clone();
    let listener_live = live.clone();
    let listener_state = shared.clone();

    let map = build_map(
        config.eviction_policy,
        settings,
        Arc::new(move |_key: &TileKey, entry: &Arc<CacheEntry<T>>| {
            tile_weigher(&**entry.tile())
        }),
        Arc::new(move |key: TileKey, entry: Arc<CacheEntry<T>>| {
            if listener_live.load(Ordering::Acquire) {
                listener_state.on_eviction(key, &entry);
            }
        }),
    );

    Generation { map, live }
}

// =============================================================================
// Tests
// =============================================================================

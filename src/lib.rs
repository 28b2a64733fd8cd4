//! # Raster Tile Cache
//!
//! A concurrent, memory-bounded cache for decoded raster tiles, keyed by
//! source image and tile coordinates.
//!
//! Rendering pipelines decode the same tiles over and over while panning and
//! zooming. This crate keeps recently useful tiles in memory up to a byte
//! budget and evicts the rest, with hit/miss statistics and an optional
//! lifecycle event stream for diagnostics.
//!
//! ## Features
//!
//! - **Weight-bounded**: Eviction is driven by tile byte size, not tile count
//! - **Concurrent**: All operations take `&self` and never serialize behind one lock
//! - **Pluggable eviction**: TinyLFU (moka) or hash-sharded LRU
//! - **Diagnostics**: Observers receive every addition, access, removal and eviction
//!
//! ## Architecture
//!
//! - [`tile`] - Keys, payloads, entries and the [`TileCache`] facade
//! - [`map`] - The weighted concurrent map contract and its implementations
//! - [`diagnostics`] - Lifecycle events and observer registration
//! - [`config`] - Cache settings, size parsing and the stress-harness CLI
//! - [`error`] - Error type shared by all fallible operations
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use raster_tile_cache::{
//!     CacheConfig, EntryAction, RasterTile, SourceImage, TileCache, TileEvent, TileGrid,
//! };
//!
//! let cache: TileCache<RasterTile> = TileCache::with_config(CacheConfig {
//!     memory_capacity: 4 * 1024 * 1024,
//!     diagnostics: true,
//!     ..CacheConfig::default()
//! })
//! .unwrap();
//!
//! cache.add_observer(|event: &TileEvent<RasterTile>| {
//!     if event.action == EntryAction::RemovalOnEviction {
//!         println!("evicted {}", event.key());
//!     }
//! });
//!
//! let image = SourceImage::new("mosaic", TileGrid::with_size(16, 16));
//! cache.add(&image, 3, 7, RasterTile::blank(256, 256, 3), None);
//!
//! let tile: Option<Arc<RasterTile>> = cache.get(&image, 3, 7);
//! assert_eq!(tile.map(|t| t.width), Some(256));
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod map;
pub mod tile;

// Re-export commonly used types
pub use config::{parse_size, CacheConfig, StressConfig};
pub use diagnostics::{ObserverId, ObserverRegistry, TileEvent, TileObserver};
pub use error::CacheError;
pub use map::{
    build_map, EvictionListener, EvictionPolicy, MapSettings, ShardedLruMap, TinyLfuMap, Weigher,
    WeightedConcurrentCache,
};
pub use tile::{
    byte_size_weigher, CacheEntry, CacheStats, EntryAction, ImageId, RasterTile, SourceImage, Tile,
    TileCache, TileComparator, TileGrid, TileKey, TileMetric, TileWeigher,
};

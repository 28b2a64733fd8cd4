//! Tile identity, payloads and the tile cache.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Rendering Pipeline           │
//! └────────────────────┬────────────────────┘
//!                      │ add / get / remove
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │                TileCache                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ CacheEntry   │  │ ObserverRegistry│  │
//! │  │ (tile, key,  │  │ (diagnostics)   │  │
//! │  │  action, ts) │  │                 │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        WeightedConcurrentCache          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileCache`]: Concurrent facade with hit/miss statistics and diagnostics
//! - [`TileKey`]: Composite key (image identity, tile coordinates)
//! - [`SourceImage`]: Image handle carrying its tile grid layout
//! - [`CacheEntry`]: Cached tile with its last lifecycle action and timestamp
//! - [`Tile`]: Payload trait reporting the byte footprint used for weighing

mod cache;
mod entry;
mod key;
mod payload;

pub use cache::{byte_size_weigher, CacheStats, TileCache, TileComparator, TileWeigher};
pub use entry::{CacheEntry, EntryAction, TileMetric};
pub use key::{ImageId, SourceImage, TileGrid, TileKey};
pub use payload::{RasterTile, Tile};

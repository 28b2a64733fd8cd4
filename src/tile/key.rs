//! Tile identity: source images, their tile grids and cache keys.
//!
//! # Image Identity
//!
//! The cache never looks inside a source image. Each [`SourceImage`] carries
//! an [`ImageId`] allocated from a process-wide counter when the handle is
//! created; clones of the handle share the id, while two handles built
//! separately for the same logical source get different ids and therefore
//! never share cached tiles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Image Identity
// =============================================================================

/// Opaque, process-unique identity of a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl ImageId {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        ImageId(NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value of the id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image#{}", self.0)
    }
}

// =============================================================================
// Tile Grid
// =============================================================================

/// The tile-index rectangle an image declares.
///
/// Tiles run from `min_tile_x` to `min_tile_x + num_tiles_x - 1` horizontally
/// and likewise vertically. Minimums may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileGrid {
    pub min_tile_x: i32,
    pub min_tile_y: i32,
    pub num_tiles_x: u32,
    pub num_tiles_y: u32,
}

impl TileGrid {
    pub fn new(min_tile_x: i32, min_tile_y: i32, num_tiles_x: u32, num_tiles_y: u32) -> Self {
        Self {
            min_tile_x,
            min_tile_y,
            num_tiles_x,
            num_tiles_y,
        }
    }

    /// A grid anchored at tile (0, 0).
    pub fn with_size(num_tiles_x: u32, num_tiles_y: u32) -> Self {
        Self::new(0, 0, num_tiles_x, num_tiles_y)
    }

    /// Total number of tiles in the grid.
    pub fn tile_count(&self) -> u64 {
        self.num_tiles_x as u64 * self.num_tiles_y as u64
    }

    /// Iterate every tile coordinate, row by row.
    pub fn positions(&self) -> impl Iterator<Item = (i32, i32)> {
        let grid = *self;
        (0..grid.num_tiles_y as i64).flat_map(move |dy| {
            (0..grid.num_tiles_x as i64).map(move |dx| {
                (
                    (grid.min_tile_x as i64 + dx) as i32,
                    (grid.min_tile_y as i64 + dy) as i32,
                )
            })
        })
    }
}

// =============================================================================
// Source Image
// =============================================================================

#[derive(Debug)]
struct SourceImageInner {
    id: ImageId,
    name: Arc<str>,
    grid: TileGrid,
}

/// Handle to an image whose tiles are cached.
///
/// Cloning is cheap and preserves identity.
#[derive(Debug, Clone)]
pub struct SourceImage {
    inner: Arc<SourceImageInner>,
}

impl SourceImage {
    /// Create a new image handle with a fresh identity.
    pub fn new(name: impl Into<Arc<str>>, grid: TileGrid) -> Self {
        Self {
            inner: Arc::new(SourceImageInner {
                id: ImageId::next(),
                name: name.into(),
                grid,
            }),
        }
    }

    pub fn id(&self) -> ImageId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn grid(&self) -> TileGrid {
        self.inner.grid
    }

    /// Cache key for the tile at `(tile_x, tile_y)` of this image.
    pub fn key(&self, tile_x: i32, tile_y: i32) -> TileKey {
        TileKey::new(self.inner.id, tile_x, tile_y)
    }
}

impl PartialEq for SourceImage {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for SourceImage {}

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for a tile: image identity plus tile coordinates.
///
/// Plain `Copy` data so hashing and comparison stay cheap on every access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Identity of the owning image
    pub image: ImageId,

    /// Tile X index in the image's tile grid
    pub tile_x: i32,

    /// Tile Y index in the image's tile grid
    pub tile_y: i32,
}

impl TileKey {
    pub fn new(image: ImageId, tile_x: i32, tile_y: i32) -> Self {
        Self {
            image,
            tile_x,
            tile_y,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {}]", self.image, self.tile_x, self.tile_y)
    }
}

// =============================================================================
// Tests
// =============================================================================

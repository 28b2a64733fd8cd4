//! Tile payloads and their byte sizes.
//!
//! The cache bounds memory by bytes, not by entry count, so every payload
//! reports its size through [`Tile::byte_size`]. The accessor must be O(1);
//! it is called once per insertion on the hot path.

use bytes::Bytes;

/// A cacheable tile payload.
pub trait Tile: Send + Sync + 'static {
    /// Size of the payload in bytes.
    fn byte_size(&self) -> usize;
}

impl Tile for Bytes {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

impl Tile for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

/// A decoded raster tile with interleaved samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterTile {
    /// Tile width in pixels
    pub width: u32,

    /// Tile height in pixels
    pub height: u32,

    /// Number of bands (samples per pixel)
    pub bands: u16,

    /// Interleaved sample data
    pub data: Bytes,
}

impl RasterTile {
    pub fn new(width: u32, height: u32, bands: u16, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            bands,
            data: data.into(),
        }
    }

    /// A zero-filled 8-bit tile.
    pub fn blank(width: u32, height: u32, bands: u16) -> Self {
        let len = width as usize * height as usize * bands as usize;
        Self::new(width, height, bands, vec![0u8; len])
    }
}

impl Tile for RasterTile {
    fn byte_size(&self) -> usize {
        self.data.len()
    }
}

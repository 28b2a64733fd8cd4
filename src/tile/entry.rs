//! Cache entries and their lifecycle bookkeeping.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::key::{SourceImage, TileKey};

/// Opaque caller-supplied value carried alongside a tile.
///
/// The cache never inspects it; observers may downcast it.
pub type TileMetric = Arc<dyn Any + Send + Sync>;

// =============================================================================
// Entry Action
// =============================================================================

/// The lifecycle transition that most recently affected an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryAction {
    /// The entry was inserted.
    Addition = 0,

    /// The entry was replaced by a newer tile at the same key.
    SubstitutionOnAdd = 1,

    /// The entry is about to be removed on caller request (pending removal).
    AboutToRemove = 2,

    /// The entry was removed on caller request.
    RemovalManual = 3,

    /// The entry was removed by the eviction policy.
    RemovalOnEviction = 4,

    /// The entry was discarded by a flush.
    RemovalOnFlush = 5,

    /// The entry was read.
    AccessRefresh = 6,
}

impl EntryAction {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EntryAction::Addition,
            1 => EntryAction::SubstitutionOnAdd,
            2 => EntryAction::AboutToRemove,
            3 => EntryAction::RemovalManual,
            4 => EntryAction::RemovalOnEviction,
            5 => EntryAction::RemovalOnFlush,
            _ => EntryAction::AccessRefresh,
        }
    }

    /// Whether the action ends the entry's residency.
    pub fn is_removal(&self) -> bool {
        matches!(
            self,
            EntryAction::RemovalManual | EntryAction::RemovalOnEviction | EntryAction::RemovalOnFlush
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryAction::Addition => "ADDITION",
            EntryAction::SubstitutionOnAdd => "SUBSTITUTION_ON_ADD",
            EntryAction::AboutToRemove => "ABOUT_TO_REMOVE",
            EntryAction::RemovalManual => "REMOVAL_MANUAL",
            EntryAction::RemovalOnEviction => "REMOVAL_ON_EVICTION",
            EntryAction::RemovalOnFlush => "REMOVAL_ON_FLUSH",
            EntryAction::AccessRefresh => "ACCESS_REFRESH",
        }
    }
}

impl fmt::Display for EntryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached tile plus its bookkeeping.
///
/// Identity (tile, image, coordinates, metric) is fixed at construction. The
/// timestamp and action tag are atomics so whichever thread owns a transition
/// can update them through a shared reference.
pub struct CacheEntry<T> {
    tile: Arc<T>,
    image: SourceImage,
    tile_x: i32,
    tile_y: i32,
    metric: Option<TileMetric>,
    /// Microseconds since the Unix epoch
    timestamp_micros: AtomicU64,
    action: AtomicU8,
}

impl<T> CacheEntry<T> {
    /// Create a new entry tagged [`EntryAction::Addition`].
    pub fn new(
        image: SourceImage,
        tile_x: i32,
        tile_y: i32,
        tile: Arc<T>,
        metric: Option<TileMetric>,
    ) -> Self {
        Self {
            tile,
            image,
            tile_x,
            tile_y,
            metric,
            timestamp_micros: AtomicU64::new(now_micros()),
            action: AtomicU8::new(EntryAction::Addition as u8),
        }
    }

    pub fn tile(&self) -> &Arc<T> {
        &self.tile
    }

    pub fn image(&self) -> &SourceImage {
        &self.image
    }

    pub fn tile_x(&self) -> i32 {
        self.tile_x
    }

    pub fn tile_y(&self) -> i32 {
        self.tile_y
    }

    pub fn key(&self) -> TileKey {
        self.image.key(self.tile_x, self.tile_y)
    }

    pub fn metric(&self) -> Option<&TileMetric> {
        self.metric.as_ref()
    }

    /// Time of the last recorded transition.
    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(self.timestamp_micros.load(Ordering::Relaxed))
    }

    pub fn action(&self) -> EntryAction {
        EntryAction::from_u8(self.action.load(Ordering::Relaxed))
    }

    /// Record a transition: refresh the timestamp and set the action tag.
    pub fn record(&self, action: EntryAction) {
        self.timestamp_micros.store(now_micros(), Ordering::Relaxed);
        self.action.store(action as u8, Ordering::Relaxed);
    }
}

impl<T> fmt::Debug for CacheEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("image", &self.image.id())
            .field("tile_x", &self.tile_x)
            .field("tile_y", &self.tile_y)
            .field("action", &self.action())
            .field("has_metric", &self.metric.is_some())
            .finish()
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================

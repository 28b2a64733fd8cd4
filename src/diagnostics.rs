//! Lifecycle notifications for cache entries.
//!
//! When diagnostics are enabled on a [`TileCache`](crate::TileCache), every
//! transition of every entry is published synchronously to each registered
//! [`TileObserver`] as a [`TileEvent`]: a plain snapshot of the entry plus the
//! action that produced it.
//!
//! Observers run on the thread that caused the transition. For evictions that
//! is whichever thread drained the map's pending work, which need not be the
//! thread whose insertion created the pressure. Observers should return
//! quickly and must not assume any ordering between an eviction event and the
//! addition that triggered it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::trace;

use crate::tile::{CacheEntry, EntryAction, SourceImage, TileKey, TileMetric};

// =============================================================================
// Events
// =============================================================================

/// Snapshot of an entry at the moment of a lifecycle transition.
pub struct TileEvent<T> {
    pub image: SourceImage,
    pub tile_x: i32,
    pub tile_y: i32,
    pub tile: Arc<T>,
    pub timestamp: SystemTime,
    pub action: EntryAction,
    pub metric: Option<TileMetric>,
}

impl<T> TileEvent<T> {
    /// Capture the current state of `entry`.
    pub fn from_entry(entry: &CacheEntry<T>) -> Self {
        Self {
            image: entry.image().clone(),
            tile_x: entry.tile_x(),
            tile_y: entry.tile_y(),
            tile: entry.tile().clone(),
            timestamp: entry.timestamp(),
            action: entry.action(),
            metric: entry.metric().cloned(),
        }
    }

    pub fn key(&self) -> TileKey {
        self.image.key(self.tile_x, self.tile_y)
    }
}

impl<T> Clone for TileEvent<T> {
    fn clone(&self) -> Self {
        Self {
            image: self.image.clone(),
            tile_x: self.tile_x,
            tile_y: self.tile_y,
            tile: self.tile.clone(),
            timestamp: self.timestamp,
            action: self.action,
            metric: self.metric.clone(),
        }
    }
}

impl<T> fmt::Debug for TileEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileEvent")
            .field("key", &self.key())
            .field("action", &self.action)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

// =============================================================================
// Observers
// =============================================================================

/// Receives lifecycle events from a tile cache.
pub trait TileObserver<T>: Send + Sync {
    fn on_event(&self, event: &TileEvent<T>);
}

impl<T, F> TileObserver<T> for F
where
    F: Fn(&TileEvent<T>) + Send + Sync,
{
    fn on_event(&self, event: &TileEvent<T>) {
        self(event)
    }
}

/// Handle returned on registration, used to detach the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// The set of currently attached observers.
///
/// Publishing takes a read lock and clones the observer list, so observers
/// may attach or detach (even from inside a callback) while events flow.
pub struct ObserverRegistry<T> {
    observers: RwLock<Vec<(ObserverId, Arc<dyn TileObserver<T>>)>>,
    next_id: AtomicU64,
}

impl<T> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach an observer.
    pub fn register(&self, observer: Arc<dyn TileObserver<T>>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        trace!(observer = id.0, "Registered tile observer");
        id
    }

    /// Detach an observer. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        let removed = observers.len() != before;
        if removed {
            trace!(observer = id.0, "Unregistered tile observer");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Deliver `event` to every registered observer, in registration order.
    pub fn publish(&self, event: &TileEvent<T>) {
        let observers: Vec<Arc<dyn TileObserver<T>>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            observer.on_event(event);
        }
    }

    /// Snapshot `entry` and publish it. Skips the snapshot when nobody listens.
    pub fn publish_entry(&self, entry: &CacheEntry<T>) {
        if self.is_empty() {
            return;
        }
        self.publish(&TileEvent::from_entry(entry));
    }
}

impl<T> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

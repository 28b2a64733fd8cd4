//! Weighted map backed by a segmented moka cache.
//!
//! moka stripes its table into independently locked segments, records reads
//! and writes into bounded lock-free buffers, and drains those buffers in
//! amortized housekeeping passes piggybacked on regular operations. Victims
//! are chosen by TinyLFU admission over an LRU queue.
//!
//! moka gives every segment an equal share of the capacity, so the segment
//! count is rounded to a power of two and the capacity floored to a multiple
//! of it; the segment budgets then never add up to more than the bound.
//!
//! Because housekeeping is deferred, `weighted_size` can briefly overshoot the
//! bound by the writes still sitting in the buffers; `run_pending_tasks`
//! settles it.

use std::hash::Hash;
use std::sync::Arc;

use moka::notification::RemovalCause;
use moka::ops::compute::Op;
use moka::sync::SegmentedCache;

use super::{EvictionListener, MapSettings, Weigher, WeightedConcurrentCache};

/// [`WeightedConcurrentCache`] over `moka::sync::SegmentedCache`.
pub struct TinyLfuMap<K, V> {
    inner: SegmentedCache<K, V>,
    max_weight: u64,
}

impl<K, V> TinyLfuMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a map with `settings.concurrency` segments.
    pub fn new(
        settings: MapSettings,
        weigher: Weigher<K, V>,
        listener: EvictionListener<K, V>,
    ) -> Self {
        let (segments, capacity) = segment_layout(settings.max_weight, settings.concurrency);
        let inner = SegmentedCache::builder(segments)
            .max_capacity(capacity)
            .weigher(move |key: &K, value: &V| weigher(key, value))
            .eviction_listener(move |key: Arc<K>, value: V, cause: RemovalCause| {
                // Explicit removals and replacements are reported by the caller.
                if cause == RemovalCause::Size {
                    listener((*key).clone(), value);
                }
            })
            .build();

        Self {
            inner,
            max_weight: settings.max_weight,
        }
    }
}

/// Segment count and total capacity for a weight bound.
///
/// Segments shrink while there are more of them than units of weight, so
/// small bounds keep a non-zero budget per segment.
fn segment_layout(max_weight: u64, concurrency: usize) -> (usize, u64) {
    let mut segments = concurrency.max(1).next_power_of_two();
    while segments > 1 && (segments as u64) > max_weight {
        segments /= 2;
    }
    let capacity = (max_weight / segments as u64) * segments as u64;
    (segments, capacity)
}

impl<K, V> WeightedConcurrentCache<K, V> for TinyLfuMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn put(&self, key: K, value: V) -> Option<V> {
        let mut previous = None;
        // The compute closure runs under the key's lock, so observing the old
        // value and installing the new one is a single step for this key.
        self.inner.entry(key).and_compute_with(|current| {
            previous = current.map(|entry| entry.into_value());
            Op::Put(value)
        });
        previous
    }

    fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    fn weighted_size(&self) -> u64 {
        self.inner.weighted_size()
    }

    fn size(&self) -> usize {
        self.inner.entry_count() as usize
    }

    fn max_weight(&self) -> u64 {
        self.max_weight
    }

    fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    fn entries(&self) -> Vec<(K, V)> {
        self.inner
            .iter()
            .map(|(key, value)| ((*key).clone(), value))
            .collect()
    }

    fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks();
    }
}

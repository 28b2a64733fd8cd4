//! Concurrent weighted maps with eviction.
//!
//! This module defines the storage contract the tile cache is built on and
//! two interchangeable implementations of it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 TileCache (facade)                      │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │ Arc<dyn WeightedConcurrentCache>
//!                             ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │           WeightedConcurrentCache<K, V>                 │
//! │  put / get / remove / weighted_size / size / clear      │
//! │  ┌──────────────────────┐   ┌────────────────────────┐  │
//! │  │    TinyLfuMap        │   │    ShardedLruMap       │  │
//! │  │  (moka segments,     │   │  (N × Mutex<LruCache>, │  │
//! │  │   TinyLFU admission) │   │   per-shard budget)    │  │
//! │  └──────────────────────┘   └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────┘
//!          weigher(K, V) -> u32       listener(K, V) on eviction
//! ```
//!
//! Neither implementation serializes access behind a single lock: moka
//! stripes its hash table and buffers recency updates for amortized
//! draining, and the sharded LRU confines every operation to one shard.

mod sharded_lru;
mod tiny_lfu;

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

pub use sharded_lru::ShardedLruMap;
pub use tiny_lfu::TinyLfuMap;

/// Computes the weight of an entry. Must be pure and O(1).
pub type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u32 + Send + Sync>;

/// Invoked exactly once for every entry removed by the eviction policy.
///
/// Not invoked for explicit removals, replacements or `clear`.
pub type EvictionListener<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;

// =============================================================================
// Map Contract
// =============================================================================

/// A thread-safe map bounded by total entry weight.
///
/// Every method may be called concurrently from any number of threads.
/// Operations on the same key are linearizable; operations on different keys
/// are unordered with respect to each other.
pub trait WeightedConcurrentCache<K, V>: Send + Sync {
    /// Insert or replace the value at `key`, returning the previous value.
    ///
    /// Concurrent puts to the same key race; the last to complete wins. May
    /// evict other entries once the weight bound is exceeded.
    fn put(&self, key: K, value: V) -> Option<V>;

    /// Current value at `key`, recording the access for victim selection.
    fn get(&self, key: &K) -> Option<V>;

    /// Remove and return the value at `key`. No-op if absent.
    fn remove(&self, key: &K) -> Option<V>;

    /// Whether `key` is resident, without recording an access.
    fn contains(&self, key: &K) -> bool;

    /// Sum of the weights of resident entries. May lag concurrent writes.
    fn weighted_size(&self) -> u64;

    /// Number of resident entries. May lag concurrent writes.
    fn size(&self) -> usize;

    /// The configured weight bound.
    fn max_weight(&self) -> u64;

    /// Remove every entry without notifying the eviction listener.
    fn clear(&self);

    /// Snapshot of the resident entries.
    fn entries(&self) -> Vec<(K, V)>;

    /// Drain deferred maintenance (pending evictions, recency updates).
    ///
    /// After this returns, `weighted_size` and `size` reflect all writes that
    /// completed before the call.
    fn run_pending_tasks(&self) {}
}

// =============================================================================
// Settings
// =============================================================================

/// Structural parameters for a map instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapSettings {
    /// Total weight allowed before eviction kicks in
    pub max_weight: u64,

    /// Striping hint: segment or shard count
    pub concurrency: usize,
}

impl MapSettings {
    /// Validate and create settings. `concurrency` must be positive.
    pub fn new(max_weight: u64, concurrency: usize) -> Result<Self, CacheError> {
        if concurrency == 0 {
            return Err(CacheError::invalid(
                "concurrency level must be greater than 0",
            ));
        }
        Ok(Self {
            max_weight,
            concurrency,
        })
    }
}

/// Victim-selection strategy for the underlying map.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Segmented moka cache: TinyLFU admission with LRU eviction.
    #[default]
    TinyLfu,

    /// Hash-sharded LRU lists, each with an equal share of the weight budget.
    ShardedLru,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::TinyLfu => f.write_str("tiny-lfu"),
            EvictionPolicy::ShardedLru => f.write_str("sharded-lru"),
        }
    }
}

/// Build a map for the given policy.
pub fn build_map<K, V>(
    policy: EvictionPolicy,
    settings: MapSettings,
    weigher: Weigher<K, V>,
    listener: EvictionListener<K, V>,
) -> Arc<dyn WeightedConcurrentCache<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    match policy {
        EvictionPolicy::TinyLfu => Arc::new(TinyLfuMap::new(settings, weigher, listener)),
        EvictionPolicy::ShardedLru => Arc::new(ShardedLruMap::new(settings, weigher, listener)),
    }
}

// =============================================================================
// Tests
// =============================================================================

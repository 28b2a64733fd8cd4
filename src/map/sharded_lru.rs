//! Weighted map built from hash-sharded LRU lists.
//!
//! Keys are distributed over N shards by hash. Each shard is an
//! `LruCache` behind its own mutex and owns `max_weight / N` of the weight
//! budget, so an insertion only ever evicts from the shard it landed in and
//! contention is limited to threads touching the same shard.
//!
//! # Eviction
//!
//! Victims are popped from the shard's LRU end while the shard is over
//! budget, then handed to the eviction listener after the shard lock is
//! released, so a slow listener never blocks other users of the shard.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use super::{EvictionListener, MapSettings, Weigher, WeightedConcurrentCache};

struct Shard<K, V> {
    /// Values with the weight they were admitted at
    entries: LruCache<K, (V, u32)>,
    weight: u64,
}

/// [`WeightedConcurrentCache`] over mutex-guarded LRU shards.
pub struct ShardedLruMap<K, V> {
    shards: Box<[Mutex<Shard<K, V>>]>,
    shard_budget: u64,
    max_weight: u64,
    hasher: RandomState,
    weigher: Weigher<K, V>,
    listener: EvictionListener<K, V>,
    weighted_size: AtomicU64,
    entry_count: AtomicU64,
}

impl<K, V> ShardedLruMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a map with `settings.concurrency` shards.
    pub fn new(
        settings: MapSettings,
        weigher: Weigher<K, V>,
        listener: EvictionListener<K, V>,
    ) -> Self {
        let shard_count = settings.concurrency.max(1);
        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(Shard {
                    entries: LruCache::unbounded(),
                    weight: 0,
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            shard_budget: settings.max_weight / shard_count as u64,
            max_weight: settings.max_weight,
            hasher: RandomState::new(),
            weigher,
            listener,
            weighted_size: AtomicU64::new(0),
            entry_count: AtomicU64::new(0),
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    /// Account for an entry leaving a shard. Caller holds the shard lock.
    fn release(&self, shard: &mut Shard<K, V>, weight: u32) {
        shard.weight -= weight as u64;
        self.weighted_size.fetch_sub(weight as u64, Ordering::Relaxed);
        self.entry_count.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<K, V> WeightedConcurrentCache<K, V> for ShardedLruMap<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn put(&self, key: K, value: V) -> Option<V> {
        let weight = (self.weigher)(&key, &value);
        let mut victims = Vec::new();

        let previous = {
            let mut shard = self.shard_for(&key).lock();

            // Counters only ever drop by what this shard previously added.
            shard.weight += weight as u64;
            self.weighted_size.fetch_add(weight as u64, Ordering::Relaxed);
            self.entry_count.fetch_add(1, Ordering::Relaxed);

            // Unbounded by count, so push only returns an entry on replacement.
            let previous = match shard.entries.push(key, (value, weight)) {
                Some((_, (old, old_weight))) => {
                    self.release(&mut shard, old_weight);
                    Some(old)
                }
                None => None,
            };

            while shard.weight > self.shard_budget {
                match shard.entries.pop_lru() {
                    Some((victim_key, (victim, victim_weight))) => {
                        self.release(&mut shard, victim_weight);
                        victims.push((victim_key, victim));
                    }
                    None => break,
                }
            }

            previous
        };

        for (victim_key, victim) in victims {
            (self.listener)(victim_key, victim);
        }

        previous
    }

    fn get(&self, key: &K) -> Option<V> {
        let mut shard = self.shard_for(key).lock();
        shard.entries.get(key).map(|(value, _)| value.clone())
    }

    fn remove(&self, key: &K) -> Option<V> {
        let mut shard = self.shard_for(key).lock();
        let (value, weight) = shard.entries.pop(key)?;
        self.release(&mut shard, weight);
        Some(value)
    }

    fn contains(&self, key: &K) -> bool {
        self.shard_for(key).lock().entries.contains(key)
    }

    fn weighted_size(&self) -> u64 {
        self.weighted_size.load(Ordering::Relaxed)
    }

    fn size(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed) as usize
    }

    fn max_weight(&self) -> u64 {
        self.max_weight
    }

    fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            let count = shard.entries.len() as u64;
            shard.entries.clear();
            self.weighted_size.fetch_sub(shard.weight, Ordering::Relaxed);
            self.entry_count.fetch_sub(count, Ordering::Relaxed);
            shard.weight = 0;
        }
    }

    fn entries(&self) -> Vec<(K, V)> {
        let mut snapshot = Vec::with_capacity(self.size());
        for shard in self.shards.iter() {
            let shard = shard.lock();
            snapshot.extend(
                shard
                    .entries
                    .iter()
                    .map(|(key, (value, _))| (key.clone(), value.clone())),
            );
        }
        snapshot
    }
}

//! Facade integration tests.
//!
//! Tests verify:
//! - Hit/miss accounting for single lookups and batches
//! - Substitution is counted as a hit and the newer tile wins
//! - Flush and reconfiguration discard content and reset counters
//! - Image-scoped removal walks the declared tile grid
//! - Validation errors leave the cache untouched

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use raster_tile_cache::{
    parse_size, CacheConfig, CacheError, EntryAction, EvictionPolicy, RasterTile, SourceImage,
    TileCache, TileEvent, TileGrid,
};

use super::test_utils::{bounded_cache, make_image, make_tile, POLICIES};

// =============================================================================
// Hits and Misses
// =============================================================================

#[test]
fn test_hit_after_add() {
    for policy in POLICIES {
        let cache = bounded_cache(policy, 1 << 20, 4);
        let image = make_image("hit", 4);
        let tile = make_tile(128, 7);

        cache.add(&image, 0, 0, tile.clone(), None);

        let cached = cache.get(&image, 0, 0).expect("tile should be cached");
        assert_eq!(*cached, tile, "{policy}");
        assert_eq!(cache.hit_count(), 1, "{policy}");
        assert_eq!(cache.miss_count(), 0, "{policy}");
    }
}

#[test]
fn test_miss_on_empty_cache() {
    for policy in POLICIES {
        let cache = bounded_cache(policy, 1 << 20, 4);
        let image = make_image("miss", 4);

        assert!(cache.get(&image, 1, 1).is_none(), "{policy}");
        assert_eq!(cache.miss_count(), 1, "{policy}");
        assert_eq!(cache.hit_count(), 0, "{policy}");
    }
}

#[test]
fn test_substitution_counts_as_hit() {
    for policy in POLICIES {
        let cache = bounded_cache(policy, 1 << 20, 4);
        let image = make_image("subst", 4);

        cache.add(&image, 0, 0, make_tile(64, 1), None);
        cache.add(&image, 0, 0, make_tile(64, 2), None);
        assert_eq!(cache.hit_count(), 1, "{policy}");

        let cached = cache.get(&image, 0, 0).unwrap();
        assert_eq!(cached[0], 2, "{policy}");

        cache.run_pending_tasks();
        assert_eq!(cache.resident_count(), 1, "{policy}");
        assert_eq!(cache.resident_weight(), 64, "{policy}");
    }
}

#[test]
fn test_images_with_same_name_are_distinct() {
    let cache: TileCache = TileCache::new();
    let first = SourceImage::new("dup", TileGrid::with_size(2, 2));
    let second = SourceImage::new("dup", TileGrid::with_size(2, 2));

    cache.add(&first, 0, 0, make_tile(8, 1), None);

    assert!(cache.get(&second, 0, 0).is_none());
    assert!(cache.get(&first.clone(), 0, 0).is_some());
}

#[test]
fn test_negative_coordinates_are_plain_keys() {
    let cache: TileCache = TileCache::new();
    let image = SourceImage::new("offset", TileGrid::new(-4, -4, 8, 8));

    cache.add(&image, -3, -1, make_tile(8, 3), None);

    assert!(cache.contains(&image, -3, -1));
    assert!(!cache.contains(&image, 3, 1));
}

// =============================================================================
// Batches
// =============================================================================

#[test]
fn test_add_batch_preserves_order() {
    let cache: TileCache = TileCache::new();
    let image = make_image("batch", 4);

    // Same position twice: the later tile must win
    let positions = [(0, 0), (1, 0), (0, 0)];
    let tiles = vec![make_tile(4, 1), make_tile(4, 2), make_tile(4, 3)];
    cache.add_batch(&image, &positions, tiles, None).unwrap();

    assert_eq!(cache.get(&image, 0, 0).unwrap()[0], 3);
    assert_eq!(cache.get(&image, 1, 0).unwrap()[0], 2);
}

#[test]
fn test_add_batch_rejects_mismatched_lengths() {
    let cache: TileCache = TileCache::new();
    let image = make_image("mismatch", 4);

    let result = cache.add_batch(&image, &[(0, 0)], vec![make_tile(4, 1), make_tile(4, 2)], None);

    match result {
        Err(CacheError::InvalidArgument(message)) => assert!(message.contains("1 positions")),
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
    cache.run_pending_tasks();
    assert_eq!(cache.resident_count(), 0);
}

#[test]
fn test_flush_during_batch_keeps_later_tiles() {
    for policy in POLICIES {
        let cache = Arc::new(bounded_cache(policy, 1 << 20, 4));
        cache.enable_diagnostics();

        // Flush from inside the first addition, i.e. between two batch items
        let handle = Arc::downgrade(&cache);
        let flushed = Arc::new(AtomicBool::new(false));
        let once = flushed.clone();
        cache.add_observer(move |event: &TileEvent<Bytes>| {
            if event.action == EntryAction::Addition && !once.swap(true, Ordering::SeqCst) {
                if let Some(cache) = handle.upgrade() {
                    cache.flush();
                }
            }
        });

        let image = make_image("batch-flush", 4);
        let positions = [(0, 0), (1, 0), (2, 0), (3, 0)];
        let tiles: Vec<Bytes> = (0..4u8).map(|i| make_tile(8, i)).collect();
        cache.add_batch(&image, &positions, tiles, None).unwrap();

        assert!(flushed.load(Ordering::SeqCst), "{policy}");
        assert!(!cache.contains(&image, 0, 0), "{policy}");
        for x in 1..4 {
            assert!(cache.contains(&image, x, 0), "{policy}: tile {x} lost");
        }
        cache.run_pending_tasks();
        assert_eq!(cache.resident_count(), 3, "{policy}");

        // Lookups after the flush see the fresh map too
        let found = cache.get_batch(&image, &positions);
        assert_eq!(found.iter().filter(|t| t.is_some()).count(), 3, "{policy}");
    }
}

#[test]
fn test_get_batch_slots_match_positions() {
    let cache: TileCache = TileCache::new();
    let image = make_image("get-batch", 4);
    cache.add(&image, 2, 2, make_tile(4, 9), None);

    let result = cache.get_batch(&image, &[(0, 0), (2, 2), (3, 3), (2, 2)]);

    assert_eq!(result.len(), 4);
    assert!(result[0].is_none());
    assert_eq!(result[1].as_ref().map(|t| t[0]), Some(9));
    assert!(result[2].is_none());
    assert!(result[3].is_some());
    assert_eq!(cache.hit_count(), 2);
    assert_eq!(cache.miss_count(), 2);
}

#[test]
fn test_empty_batches() {
    let cache: TileCache = TileCache::new();
    let image = make_image("empty", 1);

    cache
        .add_batch(&image, &[], Vec::<Bytes>::new(), None)
        .unwrap();
    assert!(cache.get_batch(&image, &[]).is_empty());
    assert_eq!(cache.stats().hits + cache.stats().misses, 0);
}

// =============================================================================
// Removal
// =============================================================================

#[test]
fn test_remove_tiles_only_touches_one_image() {
    for policy in POLICIES {
        let cache = bounded_cache(policy, 1 << 20, 4);
        let a = make_image("a", 2);
        let b = make_image("b", 2);

        cache.add(&a, 0, 0, make_tile(16, 1), None);
        cache.add(&a, 0, 1, make_tile(16, 1), None);
        cache.add(&b, 0, 0, make_tile(16, 2), None);

        cache.remove_tiles(&a);

        assert!(cache.get(&a, 0, 0).is_none(), "{policy}");
        assert!(cache.get(&a, 0, 1).is_none(), "{policy}");
        assert!(cache.get(&b, 0, 0).is_some(), "{policy}");
    }
}

#[test]
fn test_remove_tiles_walks_offset_grid() {
    let cache: TileCache = TileCache::new();
    let image = SourceImage::new("offset", TileGrid::new(-1, 2, 3, 2));

    for (x, y) in image.grid().positions() {
        cache.add(&image, x, y, make_tile(4, 0), None);
    }
    // Outside the declared grid, so not reachable by remove_tiles
    cache.add(&image, 10, 10, make_tile(4, 0), None);

    cache.remove_tiles(&image);

    assert!(!cache.contains(&image, -1, 2));
    assert!(!cache.contains(&image, 1, 3));
    assert!(cache.contains(&image, 10, 10));
}

#[test]
fn test_remove_absent_is_noop() {
    let cache: TileCache = TileCache::new();
    let image = make_image("absent", 2);

    assert!(cache.remove(&image, 0, 0).is_none());
    assert_eq!(cache.stats().resident_count, 0);
}

// =============================================================================
// Flush and Reconfiguration
// =============================================================================

#[test]
fn test_flush_resets_everything() {
    for policy in POLICIES {
        let cache = bounded_cache(policy, 1 << 20, 4);
        let image = make_image("flush", 8);

        for x in 0..8 {
            cache.add(&image, x, 0, make_tile(256, 0), None);
        }
        cache.get(&image, 0, 0);
        cache.get(&image, 7, 7);

        cache.flush();

        assert_eq!(cache.resident_count(), 0, "{policy}");
        assert_eq!(cache.resident_weight(), 0, "{policy}");
        assert_eq!(cache.hit_count(), 0, "{policy}");
        assert_eq!(cache.miss_count(), 0, "{policy}");
        for x in 0..8 {
            assert!(cache.get(&image, x, 0).is_none(), "{policy}");
        }
    }
}

#[test]
fn test_reconfiguration_keeps_settings_and_flushes() {
    let cache: TileCache = TileCache::new();
    let image = make_image("reconfigure", 2);
    cache.add(&image, 0, 0, make_tile(8, 0), None);

    cache.set_memory_capacity(parse_size("2MB").unwrap());
    cache.set_memory_threshold(0.5).unwrap();
    cache.set_concurrency_level(2).unwrap();
    cache.set_eviction_policy(EvictionPolicy::ShardedLru);

    let config = cache.config();
    assert_eq!(config.memory_capacity, 2 * 1024 * 1024);
    assert_eq!(config.memory_threshold, 0.5);
    assert_eq!(config.concurrency_level, 2);
    assert_eq!(config.eviction_policy, EvictionPolicy::ShardedLru);
    assert_eq!(cache.max_weight(), 1024 * 1024);
    assert!(!cache.contains(&image, 0, 0));
}

#[test]
fn test_invalid_settings_leave_cache_untouched() {
    let cache: TileCache = TileCache::new();
    let image = make_image("invalid", 2);
    cache.add(&image, 0, 0, make_tile(8, 0), None);
    cache.get(&image, 0, 0);

    assert!(cache.set_memory_threshold(f64::NAN).is_err());
    assert!(cache.set_memory_threshold(1.01).is_err());
    assert!(cache.set_concurrency_level(0).is_err());

    assert!(cache.contains(&image, 0, 0));
    assert_eq!(cache.hit_count(), 1);
    assert_eq!(cache.config(), CacheConfig::default());
}

#[test]
fn test_zero_threshold_caches_nothing() {
    let cache: TileCache = TileCache::new();
    cache.set_memory_threshold(0.0).unwrap();
    let image = make_image("zero", 2);

    cache.add(&image, 0, 0, make_tile(8, 0), None);
    cache.run_pending_tasks();

    assert_eq!(cache.max_weight(), 0);
    assert_eq!(cache.resident_weight(), 0);
}

#[test]
fn test_negative_capacity_rejected_at_parse() {
    assert!(matches!(
        parse_size("-1MB"),
        Err(CacheError::InvalidArgument(_))
    ));
}

#[test]
fn test_config_from_json() {
    let config: CacheConfig = serde_json::from_str(
        r#"{ "memory_capacity": 1048576, "eviction_policy": "sharded-lru", "diagnostics": true }"#,
    )
    .unwrap();

    let cache: TileCache = TileCache::with_config(config).unwrap();

    assert_eq!(cache.memory_capacity(), 1024 * 1024);
    assert_eq!(cache.memory_threshold(), 0.75);
    assert_eq!(cache.eviction_policy(), EvictionPolicy::ShardedLru);
    assert!(cache.is_diagnostics_enabled());
}

// =============================================================================
// Payloads and Legacy Surface
// =============================================================================

#[test]
fn test_raster_tiles_weighed_by_sample_bytes() {
    let cache: TileCache<RasterTile> = TileCache::new();
    let image = make_image("raster", 2);

    cache.add(&image, 0, 0, RasterTile::blank(256, 256, 3), None);
    cache.add(&image, 1, 0, Arc::new(RasterTile::blank(128, 128, 1)), None);
    cache.run_pending_tasks();

    assert_eq!(cache.resident_weight(), 256 * 256 * 3 + 128 * 128);
    assert_eq!(cache.get(&image, 1, 0).map(|t| t.bands), Some(1));
}

#[test]
fn test_legacy_operations_are_unsupported() {
    let cache: TileCache = TileCache::new();

    let error = cache.set_tile_capacity(1000).unwrap_err();
    assert_eq!(
        error.to_string(),
        "Unsupported operation: set_tile_capacity is not available on a weight-bounded tile cache"
    );
    assert!(matches!(
        cache.memory_control(),
        Err(CacheError::UnsupportedOperation("memory_control"))
    ));
    assert!(cache.tile_capacity().is_err());
    assert!(cache.tile_comparator().is_err());
}

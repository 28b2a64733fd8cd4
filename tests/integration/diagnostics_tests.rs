//! Lifecycle event integration tests.
//!
//! Tests verify:
//! - Each operation publishes the expected actions, in order, with the right key
//! - Evictions reach observers even though nobody asked for them
//! - Toggling diagnostics gates publication without touching content

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use bytes::Bytes;

use raster_tile_cache::{EntryAction, EvictionPolicy, TileCache, TileEvent, TileMetric};

use super::test_utils::{bounded_cache, make_image, make_tile, EventLog, POLICIES};

fn diagnostic_cache(policy: EvictionPolicy, max_weight: u64) -> TileCache {
    let cache = bounded_cache(policy, max_weight, 1);
    cache.enable_diagnostics();
    cache
}

#[test]
fn test_add_then_remove_event_order() {
    for policy in POLICIES {
        let cache = diagnostic_cache(policy, 1 << 20);
        let log = EventLog::attach(&cache);
        let image = make_image("order", 8);

        cache.add(&image, 5, 6, make_tile(32, 0), None);
        cache.remove(&image, 5, 6);

        let events = log.events();
        let actions: Vec<EntryAction> = events.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                EntryAction::Addition,
                EntryAction::AboutToRemove,
                EntryAction::RemovalManual,
            ],
            "{policy}"
        );
        for event in &events {
            assert_eq!(event.image, image, "{policy}");
            assert_eq!((event.tile_x, event.tile_y), (5, 6), "{policy}");
        }
    }
}

#[test]
fn test_substitution_events_carry_old_then_new_tile() {
    let cache = diagnostic_cache(EvictionPolicy::TinyLfu, 1 << 20);
    let log = EventLog::attach(&cache);
    let image = make_image("subst", 2);

    cache.add(&image, 0, 0, make_tile(8, 1), None);
    cache.add(&image, 0, 0, make_tile(8, 2), None);

    let events = log.events();
    let summary: Vec<(EntryAction, u8)> = events.iter().map(|e| (e.action, e.tile[0])).collect();
    assert_eq!(
        summary,
        vec![
            (EntryAction::Addition, 1),
            (EntryAction::SubstitutionOnAdd, 1),
            (EntryAction::Addition, 2),
        ]
    );
}

#[test]
fn test_access_refresh_advances_timestamp() {
    let cache = diagnostic_cache(EvictionPolicy::TinyLfu, 1 << 20);
    let log = EventLog::attach(&cache);
    let image = make_image("refresh", 2);

    cache.add(&image, 1, 1, make_tile(8, 0), None);
    std::thread::sleep(std::time::Duration::from_millis(2));
    cache.get(&image, 1, 1);

    let events = log.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].action, EntryAction::AccessRefresh);
    assert!(events[1].timestamp > events[0].timestamp);
}

#[test]
fn test_miss_and_absent_remove_publish_nothing() {
    let cache = diagnostic_cache(EvictionPolicy::ShardedLru, 1 << 20);
    let log = EventLog::attach(&cache);
    let image = make_image("quiet", 2);

    assert!(cache.get(&image, 0, 0).is_none());
    assert!(cache.remove(&image, 0, 0).is_none());

    assert!(log.actions().is_empty());
    assert_eq!(cache.miss_count(), 1);
}

#[test]
fn test_flush_publishes_each_entry() {
    for policy in POLICIES {
        let cache = diagnostic_cache(policy, 1 << 20);
        let image = make_image("flush", 4);
        for x in 0..4 {
            cache.add(&image, x, 0, make_tile(8, 0), None);
        }

        let log = EventLog::attach(&cache);
        cache.flush();

        let mut flushed: Vec<i32> = log
            .events()
            .iter()
            .filter(|e| e.action == EntryAction::RemovalOnFlush)
            .map(|e| e.tile_x)
            .collect();
        flushed.sort_unstable();
        assert_eq!(flushed, vec![0, 1, 2, 3], "{policy}");
        assert_eq!(log.actions().len(), 4, "{policy}");
    }
}

#[test]
fn test_eviction_reaches_observer() {
    let cache = diagnostic_cache(EvictionPolicy::ShardedLru, 300);
    let log = EventLog::attach(&cache);
    let image = make_image("evict", 4);

    for x in 0..4 {
        cache.add(&image, x, 0, make_tile(100, 0), None);
    }

    assert_eq!(log.keys_for(EntryAction::RemovalOnEviction), vec![image.key(0, 0)]);
    assert_eq!(log.keys_for(EntryAction::Addition).len(), 4);
    assert_eq!(cache.eviction_count(), 1);
}

#[test]
fn test_disable_stops_events_but_keeps_content() {
    let cache = diagnostic_cache(EvictionPolicy::TinyLfu, 1 << 20);
    let log = EventLog::attach(&cache);
    let image = make_image("toggle", 2);

    cache.add(&image, 0, 0, make_tile(8, 0), None);
    cache.disable_diagnostics();
    assert!(!cache.is_diagnostics_enabled());

    cache.get(&image, 0, 0);
    cache.add(&image, 1, 0, make_tile(8, 0), None);
    cache.remove(&image, 1, 0);

    assert_eq!(log.actions(), vec![EntryAction::Addition]);
    assert!(cache.contains(&image, 0, 0));

    cache.enable_diagnostics();
    cache.get(&image, 0, 0);
    assert_eq!(
        log.actions(),
        vec![EntryAction::Addition, EntryAction::AccessRefresh]
    );
}

#[test]
fn test_multiple_observers_and_detach() {
    let cache = diagnostic_cache(EvictionPolicy::TinyLfu, 1 << 20);
    let first = EventLog::attach(&cache);
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    let id = cache.add_observer(move |_event: &TileEvent<Bytes>| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(cache.observer_count(), 2);

    let image = make_image("observers", 2);
    cache.add(&image, 0, 0, make_tile(8, 0), None);

    assert!(cache.remove_observer(id));
    assert!(!cache.remove_observer(id));
    cache.get(&image, 0, 0);

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(first.actions().len(), 2);
    assert_eq!(cache.observer_count(), 1);
}

#[test]
fn test_metric_travels_with_events() {
    let cache = diagnostic_cache(EvictionPolicy::TinyLfu, 1 << 20);
    let log = EventLog::attach(&cache);
    let image = make_image("metric", 2);

    let metric: TileMetric = Arc::new(String::from("decode-ms=12"));
    cache.add(&image, 0, 0, make_tile(8, 0), Some(metric));
    cache.get(&image, 0, 0);

    for event in log.events() {
        let value = event
            .metric
            .as_ref()
            .and_then(|m| m.downcast_ref::<String>())
            .map(String::as_str);
        assert_eq!(value, Some("decode-ms=12"));
    }
}

#[test]
fn test_observer_can_call_back_into_cache_during_flush() {
    for policy in POLICIES {
        let cache = Arc::new(diagnostic_cache(policy, 1 << 20));
        let image = make_image("reentrant", 4);
        for x in 0..4 {
            cache.add(&image, x, 0, make_tile(8, 0), None);
        }

        let handle = Arc::downgrade(&cache);
        let seen = Arc::new(AtomicUsize::new(0));
        let nested = Arc::new(AtomicBool::new(false));
        let (counter, nested_once) = (seen.clone(), nested.clone());
        cache.add_observer(move |event: &TileEvent<Bytes>| {
            if event.action != EntryAction::RemovalOnFlush {
                return;
            }
            if let Some(cache) = handle.upgrade() {
                let _ = cache.memory_capacity();
                let _ = cache.config();
                let _ = format!("{cache:?}");
                if !nested_once.swap(true, Ordering::SeqCst) {
                    cache.flush();
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (done_tx, done_rx) = mpsc::channel();
        let flusher = cache.clone();
        std::thread::spawn(move || {
            flusher.flush();
            flusher.set_memory_threshold(0.5).unwrap();
            let _ = done_tx.send(());
        });

        assert!(
            done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "{policy}: flush did not complete"
        );
        assert_eq!(seen.load(Ordering::SeqCst), 4, "{policy}");
        assert!(nested.load(Ordering::SeqCst), "{policy}");
        assert_eq!(cache.memory_threshold(), 0.5, "{policy}");
    }
}

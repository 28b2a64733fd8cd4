//! tile-cache-stress - concurrent load generator for the tile cache.
//!
//! Spawns worker threads that add, read and remove random tiles over a fixed
//! key space, then checks that the cache stayed within its weight bound and
//! reports the statistics.

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raster_tile_cache::{
    CacheConfig, EntryAction, RasterTile, SourceImage, StressConfig, TileCache, TileEvent,
    TileGrid,
};

const BANDS: u16 = 3;

fn main() -> ExitCode {
    let args = StressConfig::parse();
    init_logging(args.verbose);

    let config = match args.cache_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    print_settings(&args, &config);

    let cache: TileCache<RasterTile> = match TileCache::with_config(config) {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to create cache: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let observed = Arc::new(EventCounts::default());
    if args.diagnostics {
        let counts = observed.clone();
        cache.add_observer(move |event: &TileEvent<RasterTile>| counts.record(event.action));
    }

    let images: Vec<SourceImage> = (0..args.images)
        .map(|i| SourceImage::new(format!("image-{i}"), TileGrid::with_size(args.tiles, args.tiles)))
        .collect();

    let started = Instant::now();
    std::thread::scope(|scope| {
        for worker in 0..args.threads {
            let cache = &cache;
            let images = &images;
            let args = &args;
            scope.spawn(move || run_worker(worker, cache, images, args));
        }
    });
    let elapsed = started.elapsed();

    cache.run_pending_tasks();
    let stats = cache.stats();
    let total_ops = (args.threads * args.operations) as f64;

    info!("");
    info!("Results:");
    info!("  Elapsed: {:.2?} ({:.0} ops/s)", elapsed, total_ops / elapsed.as_secs_f64());
    info!(
        "  Hits: {}, misses: {} (hit ratio {:.1}%)",
        stats.hits,
        stats.misses,
        stats.hit_ratio() * 100.0
    );
    info!("  Evictions: {}", stats.evictions);
    info!(
        "  Resident: {} tiles, {} / {} bytes",
        stats.resident_count, stats.resident_weight, stats.max_weight
    );
    if args.diagnostics {
        info!(
            "  Events: {} additions, {} evictions, {} manual removals",
            observed.additions.load(Ordering::Relaxed),
            observed.evictions.load(Ordering::Relaxed),
            observed.removals.load(Ordering::Relaxed)
        );
    }

    if stats.resident_weight > stats.max_weight {
        error!(
            "Weight bound violated: {} > {}",
            stats.resident_weight, stats.max_weight
        );
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// One worker's share of the load: 60% reads, 30% adds, 10% removals.
fn run_worker(
    worker: usize,
    cache: &TileCache<RasterTile>,
    images: &[SourceImage],
    args: &StressConfig,
) {
    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(worker as u64));
    let side = args.tiles as i32;

    for _ in 0..args.operations {
        let image = &images[rng.gen_range(0..images.len())];
        let tile_x = rng.gen_range(0..side);
        let tile_y = rng.gen_range(0..side);

        match rng.gen_range(0..10u8) {
            0..=5 => {
                let _ = cache.get(image, tile_x, tile_y);
            }
            6..=8 => {
                let tile = RasterTile::blank(args.tile_size, args.tile_size, BANDS);
                cache.add(image, tile_x, tile_y, tile, None);
            }
            _ => {
                let _ = cache.remove(image, tile_x, tile_y);
            }
        }
    }
}

/// Lifecycle events seen by the diagnostics observer.
#[derive(Default)]
struct EventCounts {
    additions: AtomicU64,
    evictions: AtomicU64,
    removals: AtomicU64,
}

impl EventCounts {
    fn record(&self, action: EntryAction) {
        let counter = match action {
            EntryAction::Addition => &self.additions,
            EntryAction::RemovalOnEviction => &self.evictions,
            EntryAction::RemovalManual => &self.removals,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn print_settings(args: &StressConfig, config: &CacheConfig) {
    let version = env!("CARGO_PKG_VERSION");
    info!("tile-cache-stress v{}", version);
    info!("");
    info!("Configuration:");
    info!("  Threads: {}, operations/thread: {}", args.threads, args.operations);
    info!(
        "  Key space: {} images x {}x{} tiles",
        args.images, args.tiles, args.tiles
    );
    info!(
        "  Tile: {}x{} px, {} bytes",
        args.tile_size,
        args.tile_size,
        args.tile_size as u64 * args.tile_size as u64 * BANDS as u64
    );
    info!(
        "  Cache: {}MB at threshold {} ({} bytes usable)",
        config.memory_capacity / (1024 * 1024),
        config.memory_threshold,
        config.max_weight()
    );
    info!(
        "  Policy: {}, concurrency level: {}",
        config.eviction_policy, config.concurrency_level
    );

    if config.diagnostics {
        warn!("  Diagnostics: ENABLED - every operation publishes an event");
    }
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "raster_tile_cache=debug,tile_cache_stress=debug"
    } else {
        "raster_tile_cache=info,tile_cache_stress=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

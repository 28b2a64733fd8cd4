//! Configuration for the tile cache and the stress harness.
//!
//! This module provides:
//! - [`CacheConfig`], the programmatic (and serde-loadable) cache settings
//! - [`StressConfig`], the command-line arguments of `tile-cache-stress`
//! - [`parse_size`], human-readable byte sizes such as `16MB` or `512KiB`
//!
//! # Example
//!
//! ```
//! use raster_tile_cache::config::{CacheConfig, parse_size};
//!
//! let config = CacheConfig {
//!     memory_capacity: parse_size("64MB").unwrap(),
//!     ..CacheConfig::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.max_weight(), 48 * 1024 * 1024);
//! ```
//!
//! # Environment Variables
//!
//! Every stress-harness option can also be set with a `TILE_CACHE_` prefixed
//! variable, e.g. `TILE_CACHE_THREADS=8` or `TILE_CACHE_POLICY=sharded-lru`.

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::map::EvictionPolicy;

// =============================================================================
// Default Values
// =============================================================================

/// Default memory capacity: 16 MiB.
pub const DEFAULT_MEMORY_CAPACITY: u64 = 16 * 1024 * 1024;

/// Default fraction of the capacity the map may actually fill.
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.75;

/// Default striping hint for the underlying map.
pub const DEFAULT_CONCURRENCY_LEVEL: usize = 16;

// =============================================================================
// Cache Configuration
// =============================================================================

/// Settings a [`TileCache`](crate::TileCache) is built with.
///
/// The map enforces `memory_capacity * memory_threshold` as its weight bound;
/// the threshold is headroom inside the capacity, not a separate cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory capacity in bytes
    pub memory_capacity: u64,

    /// Fraction of the capacity usable by resident tiles, within [0, 1]
    pub memory_threshold: f64,

    /// Segment/shard count of the underlying map (must be positive)
    pub concurrency_level: usize,

    /// Publish lifecycle events to observers
    pub diagnostics: bool,

    /// Victim-selection strategy
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            diagnostics: false,
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CacheError> {
        validate_threshold(self.memory_threshold)?;
        validate_concurrency(self.concurrency_level)?;
        Ok(())
    }

    /// The weight bound the map enforces.
    pub fn max_weight(&self) -> u64 {
        (self.memory_capacity as f64 * self.memory_threshold).floor() as u64
    }
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<(), CacheError> {
    // Written so that NaN fails too.
    if !(0.0..=1.0).contains(&threshold) {
        return Err(CacheError::invalid(format!(
            "memory threshold must be within [0, 1], got {threshold}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_concurrency(level: usize) -> Result<(), CacheError> {
    if level == 0 {
        return Err(CacheError::invalid(
            "concurrency level must be greater than 0",
        ));
    }
    Ok(())
}

// =============================================================================
// Size Parsing
// =============================================================================

/// Parse a byte size such as `1024`, `64KB`, `16MB`, `512KiB` or `1.5GB`.
///
/// Units are binary (`KB` = `KiB` = 1024 bytes) and case-insensitive.
/// Negative or malformed sizes are rejected.
pub fn parse_size(input: &str) -> Result<u64, CacheError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CacheError::invalid("size must not be empty"));
    }
    if trimmed.starts_with('-') {
        return Err(CacheError::invalid(format!(
            "memory capacity must not be negative, got {trimmed}"
        )));
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| CacheError::invalid(format!("invalid size: {trimmed}")))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        other => {
            return Err(CacheError::invalid(format!(
                "unknown size unit '{other}' in {trimmed}"
            )))
        }
    };

    Ok((value * multiplier as f64).round() as u64)
}

// =============================================================================
// Stress Harness CLI
// =============================================================================

/// Tile cache stress harness.
///
/// Hammers a shared cache from many threads with random add/get/remove
/// operations over a small key space, then checks that the weight bound and
/// counters are still coherent.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-cache-stress")]
#[command(author, version, about, long_about = None)]
pub struct StressConfig {
    /// Number of worker threads.
    #[arg(short, long, default_value_t = 8, env = "TILE_CACHE_THREADS")]
    pub threads: usize,

    /// Operations performed by each worker.
    #[arg(long, default_value_t = 100_000, env = "TILE_CACHE_OPERATIONS")]
    pub operations: usize,

    /// Tiles per image side; the key space is `images * tiles^2`.
    #[arg(long, default_value_t = 16, env = "TILE_CACHE_TILES")]
    pub tiles: u32,

    /// Number of distinct source images.
    #[arg(long, default_value_t = 4, env = "TILE_CACHE_IMAGES")]
    pub images: usize,

    /// Tile edge length in pixels (tiles are 8-bit RGB).
    #[arg(long, default_value_t = 64, env = "TILE_CACHE_TILE_SIZE")]
    pub tile_size: u32,

    /// Memory capacity, e.g. 16MB.
    #[arg(long, default_value = "16MB", env = "TILE_CACHE_CAPACITY")]
    pub capacity: String,

    /// Fraction of the capacity usable by resident tiles.
    #[arg(long, default_value_t = DEFAULT_MEMORY_THRESHOLD, env = "TILE_CACHE_THRESHOLD")]
    pub threshold: f64,

    /// Segment/shard count of the underlying map.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY_LEVEL, env = "TILE_CACHE_CONCURRENCY")]
    pub concurrency: usize,

    /// Victim-selection strategy.
    #[arg(long, value_enum, default_value_t = EvictionPolicy::TinyLfu, env = "TILE_CACHE_POLICY")]
    pub policy: EvictionPolicy,

    /// Publish lifecycle events to a counting observer.
    #[arg(long, default_value_t = false, env = "TILE_CACHE_DIAGNOSTICS")]
    pub diagnostics: bool,

    /// Seed for the per-thread random generators.
    #[arg(long, default_value_t = 0x5eed, env = "TILE_CACHE_SEED")]
    pub seed: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl StressConfig {
    /// Validate the arguments and derive the cache configuration.
    pub fn cache_config(&self) -> Result<CacheConfig, CacheError> {
        if self.threads == 0 {
            return Err(CacheError::invalid("threads must be greater than 0"));
        }
        if self.images == 0 || self.tiles == 0 {
            return Err(CacheError::invalid(
                "images and tiles must be greater than 0",
            ));
        }
        if self.tile_size == 0 {
            return Err(CacheError::invalid("tile_size must be greater than 0"));
        }

        let config = CacheConfig {
            memory_capacity: parse_size(&self.capacity)?,
            memory_threshold: self.threshold,
            concurrency_level: self.concurrency,
            diagnostics: self.diagnostics,
            eviction_policy: self.policy,
        };
        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Tests
// =============================================================================

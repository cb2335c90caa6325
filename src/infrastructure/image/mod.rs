//! Image handling infrastructure.
//!
//! This module provides:
//! - Bounded decoding with power-of-two style subsampling
//! - Memory caching with size-aware LRU eviction
//! - Disk caching with atomic writes
//! - HTTP and bundled-resource sources
//! - The cache orchestrator with per-key load coalescing

pub mod decoder;
pub mod disk_cache;
pub mod fetcher;
pub mod manager;
pub mod memory_cache;
pub mod resources;
pub mod single_flight;
pub mod sized_lru;

pub use decoder::{
    DEFAULT_MAX_HEIGHT, DEFAULT_MAX_WIDTH, calculate_sample_size, decode_bounded, encode_lossless,
    probe_dimensions,
};
pub use disk_cache::{DiskImageCache, default_cache_dir};
pub use fetcher::HttpFetcher;
pub use manager::CacheManager;
pub use memory_cache::{CacheStats, MemoryImageCache, default_capacity};
pub use resources::BundledResources;
pub use single_flight::SingleFlight;
pub use sized_lru::SizedLru;

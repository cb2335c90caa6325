//! Infrastructure layer with configuration and image cache adapters.

/// Application configuration.
pub mod config;
/// Image handling (decoding, caching, loading).
pub mod image;

pub use config::{AppConfig, CacheConfig, CliArgs, Command, LogLevel, StorageManager};
pub use image::{
    BundledResources, CacheManager, CacheStats, DiskImageCache, HttpFetcher, MemoryImageCache,
};

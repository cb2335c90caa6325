//! Domain types for cached images.

use std::sync::Arc;

use image::DynamicImage;
use sha2::{Digest, Sha256};

/// Prefix used for keys of bundled resources.
pub const RESOURCE_KEY_PREFIX: &str = "drawable_";

/// Canonical identifier of a cacheable image.
///
/// Keys double as file names in the disk cache, so they only ever contain
/// ASCII alphanumerics and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a bundled resource: `drawable_<id>`.
    #[must_use]
    pub fn for_resource(id: u32) -> Self {
        Self(format!("{RESOURCE_KEY_PREFIX}{id}"))
    }

    /// Key for a remote image: hex of the first 128 bits of SHA-256(url).
    #[must_use]
    pub fn for_url(url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..16]))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this key addresses a bundled resource.
    #[must_use]
    pub fn is_resource(&self) -> bool {
        self.0.starts_with(RESOURCE_KEY_PREFIX)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an image was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory LRU.
    MemoryCache,
    /// Decoded from the disk cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
    /// Decoded from a bundled resource.
    Resource,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
            Self::Resource => write!(f, "resource"),
        }
    }
}

/// A decoded image ready for rendering.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key the image is stored under.
    pub key: CacheKey,
    /// Decoded (possibly downsampled) pixels.
    pub image: Arc<DynamicImage>,
    /// Tier that satisfied the request.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

//! Port definitions for the image cache.

use async_trait::async_trait;
use bytes::Bytes;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Requested image does not exist at its source.
    #[error("Image not found: {0}")]
    NotFound(String),
    /// Failed to decode or encode image bytes.
    #[error("Decode error: {0}")]
    DecodeError(String),
    /// I/O error during a disk cache operation.
    #[error("IO error: {0}")]
    IoError(String),
    /// Network error during download.
    #[error("Network error: {0}")]
    NetworkError(String),
    /// A background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
    /// The cache has been closed.
    #[error("Cache is closed")]
    Closed,
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::TaskFailed(e.to_string())
    }
}

/// Port for downloading encoded image bytes.
/// Implementations must be thread-safe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Downloads the full response body for `url`.
    async fn download(&self, url: &str) -> CacheResult<Bytes>;
}

/// Port for reading bundled image resources by numeric id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProviderPort: Send + Sync {
    /// Reads the encoded bytes of resource `id`.
    async fn read(&self, id: u32) -> CacheResult<Bytes>;
}

//! Cache orchestrator.
//!
//! Serves images from memory, then disk, then the image's source (network
//! or bundled resource), populating the tiers that missed on the way back.
//! Concurrent misses for one key are coalesced into a single load.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::domain::entities::{CacheKey, ImageSource, LoadedImage};
use crate::domain::ports::{CacheError, CacheResult, ImageFetcherPort, ResourceProviderPort};
use crate::infrastructure::config::CacheConfig;

use super::decoder::{decode_bounded, encode_lossless};
use super::disk_cache::{DiskImageCache, default_cache_dir};
use super::fetcher::HttpFetcher;
use super::memory_cache::{CacheStats, MemoryImageCache};
use super::single_flight::SingleFlight;

/// Two-tier image cache service.
///
/// Construct one per application and share it; call [`CacheManager::close`]
/// when done.
pub struct CacheManager {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Arc<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcherPort>,
    resources: Arc<dyn ResourceProviderPort>,
    flights: SingleFlight<CacheKey, LoadedImage>,
    closed: Arc<AtomicBool>,
    max_width: u32,
    max_height: u32,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("memory_cache", &self.memory_cache)
            .field("disk_cache", &self.disk_cache)
            .field("flights", &self.flights)
            .field("max_width", &self.max_width)
            .field("max_height", &self.max_height)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Creates a manager over an existing disk cache and source adapters.
    #[must_use]
    pub fn new(
        config: &CacheConfig,
        disk_cache: DiskImageCache,
        fetcher: Arc<dyn ImageFetcherPort>,
        resources: Arc<dyn ResourceProviderPort>,
    ) -> Self {
        let memory_cache = config
            .memory_cache_bytes
            .map_or_else(MemoryImageCache::with_default_capacity, MemoryImageCache::new);

        debug!(
            memory_capacity = memory_cache.capacity(),
            disk_dir = %disk_cache.dir().display(),
            max_width = config.max_width,
            max_height = config.max_height,
            "Created image cache"
        );

        Self {
            memory_cache: Arc::new(memory_cache),
            disk_cache: Arc::new(disk_cache),
            fetcher,
            resources,
            flights: SingleFlight::new(),
            closed: Arc::new(AtomicBool::new(false)),
            max_width: config.max_width,
            max_height: config.max_height,
        }
    }

    /// Creates a manager that downloads over HTTP and stores files in the
    /// configured (or default) cache directory.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub async fn from_config(
        config: &CacheConfig,
        resources: Arc<dyn ResourceProviderPort>,
    ) -> CacheResult<Self> {
        let dir = config
            .disk_cache_dir
            .clone()
            .unwrap_or_else(default_cache_dir);
        let disk_cache = DiskImageCache::new(dir, config.disk_max_size).await;
        let fetcher = Arc::new(HttpFetcher::new(config.timeout())?);
        Ok(Self::new(config, disk_cache, fetcher, resources))
    }

    /// Loads a bundled resource, or `None` if it cannot be produced.
    pub async fn load_drawable(&self, resource_id: u32) -> Option<Arc<DynamicImage>> {
        match self.try_load_drawable(resource_id).await {
            Ok(loaded) => Some(loaded.image),
            Err(e) => {
                warn!(resource_id, error = %e, "Failed to load drawable");
                None
            }
        }
    }

    /// Loads a remote image, or `None` if it cannot be produced.
    pub async fn load_remote(&self, url: &str) -> Option<Arc<DynamicImage>> {
        match self.try_load_remote(url).await {
            Ok(loaded) => Some(loaded.image),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to load image");
                None
            }
        }
    }

    /// Loads a bundled resource, reporting where it came from or why it failed.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `DecodeError` for undecodable bytes,
    /// `Closed` after [`CacheManager::close`].
    pub async fn try_load_drawable(&self, resource_id: u32) -> CacheResult<LoadedImage> {
        let key = CacheKey::for_resource(resource_id);
        let resources = Arc::clone(&self.resources);
        self.load(key, ImageSource::Resource, async move {
            resources.read(resource_id).await
        })
        .await
    }

    /// Loads a remote image, reporting where it came from or why it failed.
    ///
    /// # Errors
    /// `NetworkError` when the download fails, `DecodeError` for undecodable
    /// bytes, `Closed` after [`CacheManager::close`].
    pub async fn try_load_remote(&self, url: &str) -> CacheResult<LoadedImage> {
        let key = CacheKey::for_url(url);
        let fetcher = Arc::clone(&self.fetcher);
        let url = url.to_string();
        self.load(key, ImageSource::Network, async move {
            fetcher.download(&url).await
        })
        .await
    }

    async fn load<F>(
        &self,
        key: CacheKey,
        source: ImageSource,
        fetch: F,
    ) -> CacheResult<LoadedImage>
    where
        F: Future<Output = CacheResult<Bytes>> + Send + 'static,
    {
        if self.is_closed() {
            return Err(CacheError::Closed);
        }

        if let Some(image) = self.memory_cache.get(&key) {
            return Ok(LoadedImage {
                key,
                image,
                source: ImageSource::MemoryCache,
            });
        }

        let handle = self.handle();
        let flight_key = key.clone();
        self.flights
            .run(key, move || handle.load(flight_key, source, fetch))
            .await
    }

    fn handle(&self) -> LoadHandle {
        LoadHandle {
            memory_cache: Arc::clone(&self.memory_cache),
            disk_cache: Arc::clone(&self.disk_cache),
            closed: Arc::clone(&self.closed),
            max_width: self.max_width,
            max_height: self.max_height,
        }
    }

    /// Returns true once [`CacheManager::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shuts the cache down: later loads fail with `Closed` and decoded
    /// images are released. Files on disk are kept. Loads already running
    /// finish but no longer populate memory.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flights.clear();
        self.memory_cache.clear();
        info!("Image cache closed");
    }

    /// Drops every decoded image from memory.
    pub fn clear_memory(&self) {
        self.memory_cache.clear();
    }

    /// Clears both tiers.
    ///
    /// # Errors
    /// Returns error if the disk cache directory cannot be read.
    pub async fn clear_all(&self) -> CacheResult<()> {
        self.memory_cache.clear();
        self.disk_cache.clear().await?;
        info!("Cleared all image caches");
        Ok(())
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_stats(&self) -> CacheStats {
        self.memory_cache.stats()
    }

    /// The in-memory tier.
    #[must_use]
    pub fn memory(&self) -> &MemoryImageCache {
        &self.memory_cache
    }

    /// The on-disk tier.
    #[must_use]
    pub fn disk(&self) -> &DiskImageCache {
        &self.disk_cache
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Owned view of the tiers, moved into background loads.
struct LoadHandle {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Arc<DiskImageCache>,
    closed: Arc<AtomicBool>,
    max_width: u32,
    max_height: u32,
}

impl LoadHandle {
    async fn load<F>(self, key: CacheKey, source: ImageSource, fetch: F) -> CacheResult<LoadedImage>
    where
        F: Future<Output = CacheResult<Bytes>>,
    {
        // A flight that finished just before this one started may have
        // populated memory already.
        if let Some(image) = self.memory_cache.peek(&key) {
            return Ok(LoadedImage {
                key,
                image,
                source: ImageSource::MemoryCache,
            });
        }

        if let Some(bytes) = self.disk_cache.read(&key).await {
            match self.decode(bytes).await {
                Ok(image) => {
                    debug!(key = %key, "Decoded image from disk cache");
                    self.promote(&key, &image);
                    return Ok(LoadedImage {
                        key,
                        image,
                        source: ImageSource::DiskCache,
                    });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable disk cache entry");
                    self.disk_cache.remove(&key).await;
                }
            }
        }

        let bytes = fetch.await?;
        let image = self.decode(bytes).await?;

        self.persist(&key, &image).await;
        self.promote(&key, &image);

        debug!(key = %key, source = %source, "Image loaded successfully");

        Ok(LoadedImage { key, image, source })
    }

    async fn decode<B>(&self, bytes: B) -> CacheResult<Arc<DynamicImage>>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let (max_width, max_height) = (self.max_width, self.max_height);
        let decoded = tokio::task::spawn_blocking(move || {
            decode_bounded(bytes.as_ref(), max_width, max_height)
        })
        .await??;
        Ok(Arc::new(decoded))
    }

    /// Writes the lossless encoding to disk. Failures only cost a future miss.
    async fn persist(&self, key: &CacheKey, image: &Arc<DynamicImage>) {
        let image = Arc::clone(image);
        let encoded = match tokio::task::spawn_blocking(move || encode_lossless(&image)).await {
            Ok(Ok(encoded)) => encoded,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Failed to encode image for disk cache");
                return;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Encode task failed");
                return;
            }
        };

        if let Err(e) = self.disk_cache.write(key, &encoded).await {
            warn!(key = %key, error = %e, "Failed to cache to disk");
        }
    }

    fn promote(&self, key: &CacheKey, image: &Arc<DynamicImage>) {
        if !self.closed.load(Ordering::Acquire) {
            self.memory_cache.put(key.clone(), Arc::clone(image));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::{MockImageFetcherPort, MockResourceProviderPort};
    use crate::infrastructure::image::BundledResources;
    use crate::infrastructure::image::decoder::probe_dimensions;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    const URL: &str = "https://example.com/cat.png";

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 42])
        }));
        Bytes::from(encode_lossless(&img).unwrap())
    }

    fn test_config() -> CacheConfig {
        CacheConfig {
            memory_cache_bytes: Some(16 * 1024 * 1024),
            ..CacheConfig::default()
        }
    }

    async fn manager_with(
        fetcher: impl ImageFetcherPort + 'static,
        resources: impl ResourceProviderPort + 'static,
        config: &CacheConfig,
    ) -> (CacheManager, TempDir) {
        let temp = TempDir::new().unwrap();
        let disk = DiskImageCache::new(temp.path().join("image_cache"), None).await;
        let manager = CacheManager::new(config, disk, Arc::new(fetcher), Arc::new(resources));
        (manager, temp)
    }

    fn fetcher_returning(bytes: Bytes, times: usize) -> MockImageFetcherPort {
        let mut fetcher = MockImageFetcherPort::new();
        fetcher
            .expect_download()
            .times(times)
            .returning(move |_| Ok(bytes.clone()));
        fetcher
    }

    /// Counts downloads and holds each one open for a while.
    struct SlowFetcher {
        calls: Arc<AtomicUsize>,
        body: Bytes,
    }

    #[async_trait]
    impl ImageFetcherPort for SlowFetcher {
        async fn download(&self, _url: &str) -> CacheResult<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(self.body.clone())
        }
    }

    #[tokio::test]
    async fn test_second_load_does_not_fetch() {
        let fetcher = fetcher_returning(png_bytes(32, 16), 1);
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;

        let first = manager.try_load_remote(URL).await.unwrap();
        let second = manager.try_load_remote(URL).await.unwrap();

        assert_eq!(first.source, ImageSource::Network);
        assert_eq!(second.source, ImageSource::MemoryCache);
        assert_eq!(first.image.as_bytes(), second.image.as_bytes());
    }

    #[tokio::test]
    async fn test_cold_to_warm_path() {
        let fetcher = fetcher_returning(png_bytes(32, 16), 1);
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;
        let key = CacheKey::for_url(URL);

        let cold = manager.try_load_remote(URL).await.unwrap();
        assert_eq!(cold.source, ImageSource::Network);
        assert!(manager.memory().contains(&key));
        assert!(manager.disk().exists(&key).await);

        manager.clear_memory();
        let warm = manager.try_load_remote(URL).await.unwrap();

        assert_eq!(warm.source, ImageSource::DiskCache);
        assert_eq!(warm.image.as_bytes(), cold.image.as_bytes());
        assert!(manager.memory().contains(&key));
    }

    #[tokio::test]
    async fn test_network_failure_returns_none_and_writes_nothing() {
        let mut fetcher = MockImageFetcherPort::new();
        fetcher
            .expect_download()
            .returning(|_| Err(CacheError::NetworkError("connection refused".to_string())));
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;

        assert!(manager.load_remote(URL).await.is_none());
        assert!(matches!(
            manager.try_load_remote(URL).await,
            Err(CacheError::NetworkError(_))
        ));
        assert!(!manager.disk().exists(&CacheKey::for_url(URL)).await);
        assert!(manager.disk().is_empty());
        assert!(manager.memory().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_download_is_not_persisted() {
        let fetcher = fetcher_returning(Bytes::from_static(b"<html>oops</html>"), 1);
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;

        let result = manager.try_load_remote(URL).await;

        assert!(matches!(result, Err(CacheError::DecodeError(_))));
        assert!(!manager.disk().exists(&CacheKey::for_url(URL)).await);
    }

    #[tokio::test]
    async fn test_concurrent_loads_fetch_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = SlowFetcher {
            calls: Arc::clone(&calls),
            body: png_bytes(8, 8),
        };
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;

        let (a, b, c, d) = tokio::join!(
            manager.load_remote(URL),
            manager.load_remote(URL),
            manager.load_remote(URL),
            manager.load_remote(URL),
        );

        assert!(a.is_some() && b.is_some() && c.is_some() && d.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.disk().len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_urls_fetch_independently() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = SlowFetcher {
            calls: Arc::clone(&calls),
            body: png_bytes(8, 8),
        };
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;

        let (a, b) = tokio::join!(
            manager.load_remote("https://example.com/a.png"),
            manager.load_remote("https://example.com/b.png"),
        );

        assert!(a.is_some() && b.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_disk_entry_is_replaced() {
        let fetcher = fetcher_returning(png_bytes(10, 10), 1);
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;
        let key = CacheKey::for_url(URL);
        manager.disk().write(&key, b"garbage").await.unwrap();

        let loaded = manager.try_load_remote(URL).await.unwrap();

        assert_eq!(loaded.source, ImageSource::Network);
        let stored = manager.disk().read(&key).await.unwrap();
        assert_eq!(probe_dimensions(&stored).unwrap(), (10, 10));
    }

    #[tokio::test]
    async fn test_large_image_downsampled_in_both_tiers() {
        let config = CacheConfig {
            max_width: 100,
            max_height: 100,
            ..test_config()
        };
        let fetcher = fetcher_returning(png_bytes(300, 200), 1);
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &config).await;

        let loaded = manager.try_load_remote(URL).await.unwrap();

        assert_eq!((loaded.width(), loaded.height()), (150, 100));
        let stored = manager.disk().read(&CacheKey::for_url(URL)).await.unwrap();
        assert_eq!(probe_dimensions(&stored).unwrap(), (150, 100));
    }

    #[tokio::test]
    async fn test_disk_write_failure_still_returns_image() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("image_cache");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let disk = DiskImageCache::new(blocker, None).await;
        let manager = CacheManager::new(
            &test_config(),
            disk,
            Arc::new(fetcher_returning(png_bytes(4, 4), 1)),
            Arc::new(MockResourceProviderPort::new()),
        );

        let loaded = manager.try_load_remote(URL).await.unwrap();

        assert_eq!(loaded.source, ImageSource::Network);
        assert!(manager.memory().contains(&CacheKey::for_url(URL)));
    }

    #[tokio::test]
    async fn test_load_drawable_populates_tiers() {
        let mut resources = BundledResources::new();
        resources.insert(7, png_bytes(20, 20));
        let (manager, _temp) =
            manager_with(MockImageFetcherPort::new(), resources, &test_config()).await;

        let first = manager.try_load_drawable(7).await.unwrap();
        let second = manager.try_load_drawable(7).await.unwrap();

        assert_eq!(first.key.as_str(), "drawable_7");
        assert_eq!(first.source, ImageSource::Resource);
        assert_eq!(second.source, ImageSource::MemoryCache);
        assert!(manager.disk().exists(&CacheKey::for_resource(7)).await);
    }

    #[tokio::test]
    async fn test_drawable_served_from_disk_without_reading_resource() {
        let mut resources = MockResourceProviderPort::new();
        resources
            .expect_read()
            .times(1)
            .returning(|_| Ok(png_bytes(12, 12)));
        let (manager, _temp) =
            manager_with(MockImageFetcherPort::new(), resources, &test_config()).await;

        manager.try_load_drawable(3).await.unwrap();
        manager.clear_memory();
        let again = manager.try_load_drawable(3).await.unwrap();

        assert_eq!(again.source, ImageSource::DiskCache);
    }

    #[tokio::test]
    async fn test_unknown_drawable_is_absent() {
        let (manager, _temp) = manager_with(
            MockImageFetcherPort::new(),
            BundledResources::new(),
            &test_config(),
        )
        .await;

        assert!(manager.load_drawable(99).await.is_none());
        assert!(matches!(
            manager.try_load_drawable(99).await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_manager_returns_none() {
        let fetcher = fetcher_returning(png_bytes(4, 4), 1);
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;
        manager.load_remote(URL).await.unwrap();

        manager.close();

        assert!(manager.is_closed());
        assert!(manager.memory().is_empty());
        assert!(manager.load_remote(URL).await.is_none());
        assert!(matches!(
            manager.try_load_remote(URL).await,
            Err(CacheError::Closed)
        ));
        // Files survive a close.
        assert!(manager.disk().exists(&CacheKey::for_url(URL)).await);
    }

    #[tokio::test]
    async fn test_clear_all_empties_both_tiers() {
        let fetcher = fetcher_returning(png_bytes(4, 4), 2);
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;

        manager.load_remote(URL).await.unwrap();
        manager.clear_all().await.unwrap();

        assert!(manager.memory().is_empty());
        assert!(manager.disk().is_empty());
        // Next load goes back to the network.
        let loaded = manager.try_load_remote(URL).await.unwrap();
        assert_eq!(loaded.source, ImageSource::Network);
    }

    #[tokio::test]
    async fn test_memory_stats_track_hits() {
        let fetcher = fetcher_returning(png_bytes(4, 4), 1);
        let (manager, _temp) =
            manager_with(fetcher, MockResourceProviderPort::new(), &test_config()).await;

        manager.load_remote(URL).await.unwrap();
        manager.load_remote(URL).await.unwrap();

        let stats = manager.memory_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.bytes, 4 * 4 * 3);
    }
}

//! Bundled image resources addressed by numeric id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, trace};

use crate::domain::ports::{CacheError, CacheResult, ResourceProviderPort};

#[derive(Debug, Clone)]
enum Resource {
    Inline(Bytes),
    File(PathBuf),
}

/// Registry of bundled images.
///
/// Entries are either held in memory or read lazily from a file.
#[derive(Debug, Clone, Default)]
pub struct BundledResources {
    entries: HashMap<u32, Resource>,
}

impl BundledResources {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers encoded bytes under `id`, replacing any previous entry.
    pub fn insert(&mut self, id: u32, bytes: impl Into<Bytes>) {
        self.entries.insert(id, Resource::Inline(bytes.into()));
    }

    /// Registers a file under `id`. The file is read on each request.
    pub fn insert_file(&mut self, id: u32, path: impl Into<PathBuf>) {
        self.entries.insert(id, Resource::File(path.into()));
    }

    /// Builds a registry from a directory whose files are named `<id>` or
    /// `<id>.<ext>`. Other files are ignored.
    ///
    /// # Errors
    /// Returns `IoError` if the directory cannot be read.
    pub async fn from_dir(dir: &Path) -> CacheResult<Self> {
        let mut resources = Self::new();
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read resource dir: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read entry: {e}")))?
        {
            let path = entry.path();
            let id = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u32>().ok());
            let is_file = fs::metadata(&path).await.is_ok_and(|m| m.is_file());
            match id {
                Some(id) if is_file => resources.insert_file(id, path),
                _ => trace!(path = %path.display(), "Skipping non-resource file"),
            }
        }

        debug!(dir = %dir.display(), count = resources.len(), "Loaded resource registry");
        Ok(resources)
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResourceProviderPort for BundledResources {
    async fn read(&self, id: u32) -> CacheResult<Bytes> {
        match self.entries.get(&id) {
            Some(Resource::Inline(bytes)) => Ok(bytes.clone()),
            Some(Resource::File(path)) => match fs::read(path).await {
                Ok(bytes) => Ok(Bytes::from(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(CacheError::NotFound(format!("resource {id}")))
                }
                Err(e) => Err(CacheError::IoError(format!(
                    "Failed to read resource {id}: {e}"
                ))),
            },
            None => Err(CacheError::NotFound(format!("resource {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_inline_resource() {
        let mut resources = BundledResources::new();
        resources.insert(7, &b"abc"[..]);

        assert_eq!(&resources.read(7).await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn test_unknown_resource_is_not_found() {
        let resources = BundledResources::new();
        assert!(matches!(
            resources.read(1).await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_from_dir_parses_ids() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("12.png"), b"twelve").unwrap();
        std::fs::write(temp.path().join("3"), b"three").unwrap();
        std::fs::write(temp.path().join("readme.txt"), b"ignored").unwrap();

        let resources = BundledResources::from_dir(temp.path()).await.unwrap();

        assert_eq!(resources.len(), 2);
        assert_eq!(&resources.read(12).await.unwrap()[..], b"twelve");
        assert_eq!(&resources.read(3).await.unwrap()[..], b"three");
    }

    #[tokio::test]
    async fn test_deleted_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("5.png");
        std::fs::write(&path, b"five").unwrap();
        let resources = BundledResources::from_dir(temp.path()).await.unwrap();

        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            resources.read(5).await,
            Err(CacheError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_dir_is_io_error() {
        let temp = TempDir::new().unwrap();
        let result = BundledResources::from_dir(&temp.path().join("nope")).await;
        assert!(matches!(result, Err(CacheError::IoError(_))));
    }
}

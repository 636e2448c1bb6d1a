//! Disk-backed tile cache.
//!
//! Rendered tiles are persisted one file per coordinate:
//!
//! ```text
//! {root}/{image_id}/{level}/{x}_{y}.jpg
//! ```
//!
//! This layout is the cache key space; a file existing at a key's path is a
//! cache hit. Tiles are content-deterministic for an immutable original, so
//! entries never expire.
//!
//! # Atomic Writes
//!
//! `put` writes to a uniquely named temporary file in the destination
//! directory and renames it into place. A concurrent reader sees either no
//! file or the complete tile, never a partial write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use crate::codec::TileFormat;
use crate::error::TileError;

// =============================================================================
// Cache Key
// =============================================================================

/// Identifies one tile of one image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub image_id: Arc<str>,
    /// Pyramid level (0 = coarsest)
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(image_id: impl Into<Arc<str>>, level: u32, x: u32, y: u32) -> Self {
        Self {
            image_id: image_id.into(),
            level,
            x,
            y,
        }
    }

    /// Path of this tile relative to the cache root.
    pub fn relative_path(&self, format: TileFormat) -> PathBuf {
        PathBuf::from(self.image_id.as_ref())
            .join(self.level.to_string())
            .join(format!("{}_{}.{}", self.x, self.y, format.extension()))
    }
}

// =============================================================================
// Tile Store Trait
// =============================================================================

/// Persistent storage for encoded tiles.
#[async_trait]
pub trait TileStore: Send + Sync + 'static {
    /// Whether a complete tile exists for `key`.
    async fn has(&self, key: &TileKey) -> Result<bool, TileError>;

    /// Encoded tile bytes, or `None` on a miss.
    async fn get(&self, key: &TileKey) -> Result<Option<Bytes>, TileError>;

    /// Store a tile atomically and return where it lives.
    async fn put(&self, key: &TileKey, data: &[u8]) -> Result<PathBuf, TileError>;

    /// Location of the tile for `key`, whether or not it exists yet.
    fn path_for(&self, key: &TileKey) -> PathBuf;
}

// =============================================================================
// Disk Tile Cache
// =============================================================================

/// [`TileStore`] on the local filesystem.
#[derive(Debug)]
pub struct DiskTileCache {
    root: PathBuf,
    format: TileFormat,
    temp_counter: AtomicU64,
}

impl DiskTileCache {
    /// Create a cache rooted at `root`. Directories are created on write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_format(root, TileFormat::default())
    }

    pub fn with_format(root: impl Into<PathBuf>, format: TileFormat) -> Self {
        Self {
            root: root.into(),
            format,
            temp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.{}-{}.tmp", name, std::process::id(), n))
    }
}

#[async_trait]
impl TileStore for DiskTileCache {
    async fn has(&self, key: &TileKey) -> Result<bool, TileError> {
        match tokio::fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &TileKey) -> Result<Option<Bytes>, TileError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &TileKey, data: &[u8]) -> Result<PathBuf, TileError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path_for(&path);
        let written = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &path).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(path)
    }

    fn path_for(&self, key: &TileKey) -> PathBuf {
        self.root.join(key.relative_path(self.format))
    }
}

// =============================================================================
// Tests
// =============================================================================

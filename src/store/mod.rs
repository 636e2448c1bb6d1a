//! Image store and registry.
//!
//! Originals live in a single directory, one file per image, named
//! `{image_id}.{ext}`. The store translates ids to paths, registers freshly
//! uploaded files, and enumerates everything it holds.
//!
//! # Resolution
//!
//! ```text
//! resolve(id)
//!   1. registered in this process?             → path
//!   2. collect candidates:
//!        {originals}/{id}.{presumed ext} that exist
//!        + scan {originals} (non-recursive) for files with stem == id
//!      one candidate  → path
//!      several        → Ambiguous (ids must be globally unique)
//!      none           → NotFound
//! ```
//!
//! `list` applies the same rule: an id backed by several files is logged
//! and left out rather than reported with one file's metadata.

mod metadata;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::codec::{Codec, ImageMetadata};
use crate::error::StoreError;

pub use metadata::MetadataCache;

/// Extensions tried by exact-name lookup before falling back to a scan.
pub const PRESUMED_EXTENSIONS: &[&str] = &["tif", "tiff", "svs", "jpg", "jpeg", "png"];

/// Maximum accepted image id length.
pub const MAX_IMAGE_ID_LEN: usize = 128;

/// A stored original and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub image_id: String,
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub page_count: u32,
    pub uploaded_at: DateTime<Utc>,
}

impl ImageRecord {
    fn new(image_id: &str, source_path: PathBuf, meta: ImageMetadata, at: DateTime<Utc>) -> Self {
        Self {
            image_id: image_id.to_string(),
            source_path,
            width: meta.width,
            height: meta.height,
            format: meta.format,
            page_count: meta.page_count,
            uploaded_at: at,
        }
    }
}

/// Registry of original images on durable storage.
pub struct ImageStore<C: Codec> {
    codec: Arc<C>,
    originals_dir: PathBuf,
    registered: RwLock<HashMap<String, PathBuf>>,
    metadata: MetadataCache,
}

impl<C: Codec> ImageStore<C> {
    /// Create a store over `originals_dir`. The directory is not created.
    pub fn new(codec: Arc<C>, originals_dir: impl Into<PathBuf>) -> Self {
        Self {
            codec,
            originals_dir: originals_dir.into(),
            registered: RwLock::new(HashMap::new()),
            metadata: MetadataCache::new(),
        }
    }

    pub fn codec(&self) -> &Arc<C> {
        &self.codec
    }

    pub fn originals_dir(&self) -> &Path {
        &self.originals_dir
    }

    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Durable location for an original with the given extension.
    pub fn original_path(&self, image_id: &str, extension: &str) -> PathBuf {
        if extension.is_empty() {
            self.originals_dir.join(image_id)
        } else {
            self.originals_dir.join(format!("{}.{}", image_id, extension))
        }
    }

    /// Translate an image id to the path of its original file.
    pub async fn resolve(&self, image_id: &str) -> Result<PathBuf, StoreError> {
        validate_image_id(image_id)?;

        if let Some(path) = self.registered.read().await.get(image_id) {
            return Ok(path.clone());
        }

        let mut candidates = Vec::new();
        for ext in PRESUMED_EXTENSIONS {
            let path = self.original_path(image_id, ext);
            if is_file(&path).await {
                candidates.push(path);
            }
        }
        for path in self.scan_for(image_id).await? {
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }

        match candidates.len() {
            0 => Err(StoreError::NotFound {
                image_id: image_id.to_string(),
            }),
            1 => Ok(candidates.remove(0)),
            n => Err(StoreError::Ambiguous {
                image_id: image_id.to_string(),
                candidates: n,
            }),
        }
    }

    /// Record a newly stored original.
    ///
    /// Each id may be registered once; uploads always mint a fresh id.
    pub async fn register(
        &self,
        image_id: &str,
        path: impl Into<PathBuf>,
    ) -> Result<(), StoreError> {
        validate_image_id(image_id)?;

        let mut registered = self.registered.write().await;
        if registered.contains_key(image_id) {
            return Err(StoreError::AlreadyRegistered {
                image_id: image_id.to_string(),
            });
        }

        let path = path.into();
        debug!(image_id, path = %path.display(), "Registered original");
        registered.insert(image_id.to_string(), path);
        Ok(())
    }

    /// Metadata for an image, probing the original on first access.
    pub async fn metadata(&self, image_id: &str) -> Result<ImageMetadata, StoreError> {
        let path = self.resolve(image_id).await?;
        self.metadata_at(image_id, &path).await
    }

    /// Metadata for an image whose path is already resolved.
    pub async fn metadata_at(
        &self,
        image_id: &str,
        path: &Path,
    ) -> Result<ImageMetadata, StoreError> {
        self.metadata
            .get_or_populate(image_id, || async move {
                debug!(image_id, path = %path.display(), "Probing original");
                Ok(self.codec.probe(path).await?)
            })
            .await
    }

    /// Full record for one image.
    pub async fn record(&self, image_id: &str) -> Result<ImageRecord, StoreError> {
        let path = self.resolve(image_id).await?;
        let meta = self.metadata_at(image_id, &path).await?;
        let fs_meta = tokio::fs::metadata(&path).await?;
        Ok(ImageRecord::new(image_id, path, meta, file_timestamp(&fs_meta)))
    }

    /// Every original in the store, newest first.
    ///
    /// Files that fail to probe are logged and skipped, as are ids that more
    /// than one file claims.
    pub async fn list(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.originals_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        let mut by_id: HashMap<String, Vec<(PathBuf, std::fs::Metadata)>> = HashMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let fs_meta = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let Some(image_id) = image_id_from_path(&path) else {
                continue;
            };
            by_id.entry(image_id).or_default().push((path, fs_meta));
        }

        for (image_id, mut files) in by_id {
            if files.len() > 1 {
                error!(
                    image_id = %image_id,
                    candidates = files.len(),
                    "Skipping id claimed by several originals"
                );
                continue;
            }
            let Some((path, fs_meta)) = files.pop() else {
                continue;
            };

            match self.metadata_at(&image_id, &path).await {
                Ok(meta) => {
                    let at = file_timestamp(&fs_meta);
                    records.push(ImageRecord::new(&image_id, path, meta, at));
                }
                Err(e) => {
                    error!(
                        image_id = %image_id,
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable original"
                    );
                }
            }
        }

        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(records)
    }

    async fn scan_for(&self, image_id: &str) -> Result<Vec<PathBuf>, StoreError> {
        let mut found = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.originals_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if image_id_from_path(&path).as_deref() == Some(image_id) && is_file(&path).await {
                found.push(path);
            }
        }

        Ok(found)
    }
}

/// Check that an id is safe to use as a file name.
///
/// Ids are 1–128 characters of `[A-Za-z0-9_-]`.
pub fn validate_image_id(image_id: &str) -> Result<(), StoreError> {
    let valid = !image_id.is_empty()
        && image_id.len() <= MAX_IMAGE_ID_LEN
        && image_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidImageId {
            image_id: image_id.to_string(),
        })
    }
}

/// Mint a fresh image id.
///
/// The id is the first 32 hex chars of SHA-256 over the hint, the wall
/// clock, the process id and a process-local counter.
pub fn mint_image_id(hint: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(hint.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());

    let mut id = hex::encode(hasher.finalize());
    id.truncate(32);
    id
}

/// Image id encoded in an original's file name, if it is a valid id.
fn image_id_from_path(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    validate_image_id(stem).ok()?;
    Some(stem.to_string())
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Upload time of a file: creation time where supported, else mtime.
fn file_timestamp(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.created()
        .or_else(|_| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

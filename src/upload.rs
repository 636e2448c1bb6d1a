//! Upload intake.
//!
//! Takes a freshly uploaded file from the staging area, probes it, moves it
//! into the originals directory under its image id, and reports the pyramid
//! it will be served as.
//!
//! # Flow
//!
//! ```text
//! ingest(id, temp)
//!   1. probe temp            (fails → temp left in place, nothing stored)
//!   2. move → {originals}/{id}.{ext}   (never overwrites)
//!   3. register id, prime metadata cache
//!   4. compute level count
//!   5. → ImageDescriptor
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::codec::{Codec, ImageMetadata, TileFormat};
use crate::error::{StoreError, UploadError};
use crate::pyramid::PyramidGeometry;
use crate::store::{validate_image_id, ImageRecord, ImageStore};
use crate::tile::TileSettings;

/// Longest file extension carried over from an upload's name.
const MAX_EXTENSION_LEN: usize = 8;

// =============================================================================
// Image Descriptor
// =============================================================================

/// What a client needs to open an image in a deep-zoom viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,

    /// Tile file extension, e.g. `"jpg"`
    pub format: String,

    /// Number of pyramid levels
    pub levels: u32,

    pub original_format: String,
    pub uploaded_at: DateTime<Utc>,

    /// Per-level breakdown, included by the image info endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level_details: Option<Vec<LevelDescriptor>>,
}

/// One pyramid level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDescriptor {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub scale: u64,
}

impl ImageDescriptor {
    pub fn new(
        image_id: impl Into<String>,
        metadata: &ImageMetadata,
        settings: &TileSettings,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        let geometry = PyramidGeometry::new(metadata.width, metadata.height, settings.tile_size);
        Self {
            image_id: image_id.into(),
            width: metadata.width,
            height: metadata.height,
            tile_size: geometry.tile_size(),
            format: settings.format.extension().to_string(),
            levels: geometry.level_count(),
            original_format: metadata.format.clone(),
            uploaded_at,
            level_details: None,
        }
    }

    /// Descriptor for an image already in the store.
    pub fn from_record(record: &ImageRecord, settings: &TileSettings) -> Self {
        let metadata = ImageMetadata {
            width: record.width,
            height: record.height,
            format: record.format.clone(),
            page_count: record.page_count,
        };
        Self::new(record.image_id.clone(), &metadata, settings, record.uploaded_at)
    }

    /// Attach the per-level breakdown.
    pub fn with_level_details(mut self) -> Self {
        let geometry = PyramidGeometry::new(self.width, self.height, self.tile_size);
        let details = geometry
            .levels()
            .filter_map(|spec| {
                let (tiles_x, tiles_y) = geometry.tile_count(spec.level)?;
                Some(LevelDescriptor {
                    level: spec.level,
                    width: spec.scaled_width,
                    height: spec.scaled_height,
                    tiles_x,
                    tiles_y,
                    scale: spec.scale,
                })
            })
            .collect();
        self.level_details = Some(details);
        self
    }
}

// =============================================================================
// Upload Intake
// =============================================================================

/// Moves uploaded files into the image store.
pub struct UploadIntake<C: Codec> {
    store: Arc<ImageStore<C>>,
    settings: TileSettings,
}

impl<C: Codec> UploadIntake<C> {
    pub fn new(store: Arc<ImageStore<C>>, settings: TileSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &TileSettings {
        &self.settings
    }

    /// Ingest the staged file at `temp_path` as `image_id`.
    ///
    /// On a probe failure the staged file is left where it is.
    pub async fn ingest(
        &self,
        image_id: &str,
        temp_path: &Path,
    ) -> Result<ImageDescriptor, UploadError> {
        validate_image_id(image_id)?;
        let start = Instant::now();

        // First sight of this file, so probe directly rather than through the cache
        let metadata = self.store.codec().probe(temp_path).await?;

        let extension = original_extension(temp_path, &metadata.format);
        let dest = self.store.original_path(image_id, &extension);
        move_file(temp_path, &dest, image_id).await?;

        if let Err(e) = self.store.register(image_id, &dest).await {
            let _ = tokio::fs::remove_file(&dest).await;
            return Err(e.into());
        }
        self.store
            .metadata_cache()
            .insert(image_id, metadata.clone())
            .await;

        let descriptor = ImageDescriptor::new(image_id, &metadata, &self.settings, Utc::now());

        info!(
            image_id,
            width = metadata.width,
            height = metadata.height,
            format = %metadata.format,
            levels = descriptor.levels,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Ingested upload"
        );

        Ok(descriptor)
    }
}

/// Extension for a stored original: the staged file's own extension if it
/// has a usable one, else one derived from the probed format.
fn original_extension(temp_path: &Path, probed_format: &str) -> String {
    temp_path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(sanitize_extension)
        .unwrap_or_else(|| match probed_format {
            "jpeg" => "jpg".to_string(),
            "tiff" => "tif".to_string(),
            other => sanitize_extension(other).unwrap_or_default(),
        })
}

/// Extension of a client-supplied file name, if it is safe to reuse.
pub fn upload_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    sanitize_extension(ext)
}

fn sanitize_extension(ext: &str) -> Option<String> {
    let valid = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.bytes().all(|b| b.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

/// Move a file without ever replacing an existing destination.
///
/// A hard link claims the destination name atomically and fails if it is
/// taken. Where linking is not possible (another filesystem, no link support)
/// the data is copied into a file opened with `create_new`.
async fn move_file(from: &Path, to: &Path, image_id: &str) -> Result<(), UploadError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let taken = || -> UploadError {
        StoreError::AlreadyRegistered {
            image_id: image_id.to_string(),
        }
        .into()
    };

    match tokio::fs::hard_link(from, to).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Err(taken()),
        Err(link_err) => {
            warn!(
                from = %from.display(),
                to = %to.display(),
                error = %link_err,
                "Hard link failed, copying instead"
            );
            if let Err(e) = copy_exclusive(from, to).await {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    return Err(taken());
                }
                return Err(e.into());
            }
        }
    }

    tokio::fs::remove_file(from).await?;
    Ok(())
}

/// Copy `from` into a new file at `to`. Fails with `AlreadyExists` rather
/// than truncating an existing file; a partial copy is removed.
async fn copy_exclusive(from: &Path, to: &Path) -> std::io::Result<()> {
    let mut dest = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)
        .await?;

    let result = copy_into(from, &mut dest).await;
    drop(dest);
    if result.is_err() {
        let _ = tokio::fs::remove_file(to).await;
    }
    result
}

async fn copy_into(from: &Path, dest: &mut tokio::fs::File) -> std::io::Result<()> {
    let mut src = tokio::fs::File::open(from).await?;
    tokio::io::copy(&mut src, dest).await?;
    dest.sync_all().await
}

/// Staging path for an upload in `uploads_dir`.
pub fn staging_path(uploads_dir: &Path, image_id: &str, extension: Option<&str>) -> PathBuf {
    match extension {
        Some(ext) => uploads_dir.join(format!("{}.{}", image_id, ext)),
        None => uploads_dir.join(image_id),
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Tile Service for on-demand tile synthesis.
//!
//! The TileService is the main entry point for tile requests. It serves a
//! tile from the disk cache when one exists and otherwise renders it from the
//! original file, persists it, and returns it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TileService                             │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                    get_tile()                           │    │
//! │  │  1. Cache path         5. Source region                 │    │
//! │  │  2. Cache hit? return  6. Acquire gate                  │    │
//! │  │  3. Resolve + metadata 7. Render (extract/resize/encode)│    │
//! │  │  4. Tile region        8. Release, 9. Persist, 10. Return│   │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │           │                    │                    │           │
//! │           ▼                    ▼                    ▼           │
//! │    ┌───────────┐      ┌──────────────┐    ┌──────────────────┐  │
//! │    │ TileStore │      │  ImageStore  │    │ DecodeGate+Codec │  │
//! │    └───────────┘      └──────────────┘    └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Request Collapsing
//!
//! Misses for the same coordinate share one generation. The first caller
//! spawns a generation task and publishes a watch channel in the in-flight
//! map; later callers subscribe to it. The task runs to completion even if
//! every caller stops waiting, so an abandoned request still fills the cache.
//! Failures are reported to every waiter and are not remembered: the next
//! request starts over from the cache check.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec::{
    clamp_quality, Codec, RenderRequest, ResizeKernel, TileFormat, DEFAULT_JPEG_QUALITY,
};
use crate::error::TileError;
use crate::gate::DecodeGate;
use crate::pyramid::{PyramidGeometry, DEFAULT_TILE_SIZE};
use crate::store::{validate_image_id, ImageStore};

use super::cache::{TileKey, TileStore};

// =============================================================================
// Tile Request
// =============================================================================

/// A request for one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    pub image_id: String,

    /// Pyramid level (0 = coarsest, max level = full resolution)
    pub level: u32,

    /// Tile column (0-indexed from left)
    pub x: u32,

    /// Tile row (0-indexed from top)
    pub y: u32,
}

impl TileRequest {
    pub fn new(image_id: impl Into<String>, level: u32, x: u32, y: u32) -> Self {
        Self {
            image_id: image_id.into(),
            level,
            x,
            y,
        }
    }
}

// =============================================================================
// Tile Response
// =============================================================================

/// A served tile.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Where the tile is persisted
    pub path: PathBuf,

    /// The encoded tile
    pub data: Bytes,

    /// Whether the tile already existed on disk
    pub cache_hit: bool,
}

// =============================================================================
// Settings
// =============================================================================

/// Rendering parameters shared by every tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSettings {
    pub tile_size: u32,
    pub quality: u8,
    pub kernel: ResizeKernel,
    pub format: TileFormat,
}

impl Default for TileSettings {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            quality: DEFAULT_JPEG_QUALITY,
            kernel: ResizeKernel::default(),
            format: TileFormat::default(),
        }
    }
}

impl TileSettings {
    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = clamp_quality(quality);
        self
    }

    pub fn with_kernel(mut self, kernel: ResizeKernel) -> Self {
        self.kernel = kernel;
        self
    }
}

// =============================================================================
// Tile Service
// =============================================================================

/// Published outcome of one generation; `None` until the task finishes.
type Outcome = Option<Result<TileResponse, TileError>>;

type InFlightMap = HashMap<TileKey, watch::Receiver<Outcome>>;

/// Service for generating and caching tiles.
///
/// Cloning is cheap; clones share the cache, gate and in-flight map.
///
/// # Example
///
/// ```ignore
/// use deepzoom_tiler::tile::{DiskTileCache, TileRequest, TileService, TileSettings};
///
/// let service = TileService::new(store, Arc::new(DiskTileCache::new("data/tiles")), gate,
///     TileSettings::default());
///
/// let response = service.get_tile(TileRequest::new("abc123", 6, 0, 0)).await?;
/// println!("{} bytes, cache hit: {}", response.data.len(), response.cache_hit);
/// ```
pub struct TileService<C: Codec> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Codec> {
    store: Arc<ImageStore<C>>,
    cache: Arc<dyn TileStore>,
    gate: Arc<DecodeGate>,
    settings: TileSettings,
    in_flight: Mutex<InFlightMap>,
}

impl<C: Codec> Clone for TileService<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Codec> TileService<C> {
    /// Create a tile service.
    ///
    /// The gate is shared, not owned: pass the same `Arc` to every component
    /// whose renders must be bounded together.
    pub fn new(
        store: Arc<ImageStore<C>>,
        cache: Arc<dyn TileStore>,
        gate: Arc<DecodeGate>,
        settings: TileSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                cache,
                gate,
                settings,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get a tile, rendering it on first request.
    ///
    /// Returns [`TileError::OutOfBounds`] when the coordinate has no tile;
    /// nothing is written in that case.
    pub async fn get_tile(&self, request: TileRequest) -> Result<TileResponse, TileError> {
        validate_image_id(&request.image_id)?;
        let key = TileKey::new(request.image_id, request.level, request.x, request.y);

        if let Some(data) = self.inner.cache.get(&key).await? {
            debug!(
                image_id = %key.image_id,
                level = key.level,
                x = key.x,
                y = key.y,
                "Tile cache hit"
            );
            return Ok(TileResponse {
                path: self.inner.cache.path_for(&key),
                data,
                cache_hit: true,
            });
        }

        let mut rx = self.join_or_start(key);
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| TileError::Aborted)?;

        match outcome.as_ref() {
            Some(result) => result.clone(),
            None => Err(TileError::Aborted),
        }
    }

    /// Subscribe to the in-flight generation for `key`, starting one if
    /// none is running.
    fn join_or_start(&self, key: TileKey) -> watch::Receiver<Outcome> {
        let mut in_flight = lock(&self.inner.in_flight);
        if let Some(rx) = in_flight.get(&key) {
            debug!(
                image_id = %key.image_id,
                level = key.level,
                x = key.x,
                y = key.y,
                "Joining in-flight tile generation"
            );
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(key.clone(), rx.clone());
        drop(in_flight);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let entry = InFlightEntry {
                map: &inner.in_flight,
                key: &key,
            };
            let result = inner.generate(&key).await;
            // Deregister before publishing so a settled waiter never sees a stale entry
            drop(entry);
            if let Err(ref e) = result {
                warn!(
                    image_id = %key.image_id,
                    level = key.level,
                    x = key.x,
                    y = key.y,
                    error = %e,
                    "Tile generation failed"
                );
            }
            tx.send_replace(Some(result));
        });

        rx
    }

    pub fn store(&self) -> &Arc<ImageStore<C>> {
        &self.inner.store
    }

    pub fn cache(&self) -> &Arc<dyn TileStore> {
        &self.inner.cache
    }

    pub fn gate(&self) -> &Arc<DecodeGate> {
        &self.inner.gate
    }

    pub fn settings(&self) -> TileSettings {
        self.inner.settings
    }

    /// Number of coordinates currently being generated.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }
}

impl<C: Codec> Inner<C> {
    async fn generate(&self, key: &TileKey) -> Result<TileResponse, TileError> {
        // A previous leader may have finished between our miss and our start
        if let Some(data) = self.cache.get(key).await? {
            return Ok(TileResponse {
                path: self.cache.path_for(key),
                data,
                cache_hit: true,
            });
        }

        let start = Instant::now();
        let source_path = self.store.resolve(&key.image_id).await?;
        let metadata = self.store.metadata_at(&key.image_id, &source_path).await?;

        let geometry = PyramidGeometry::new(metadata.width, metadata.height, self.settings.tile_size);
        let out_of_bounds = || TileError::OutOfBounds {
            level: key.level,
            x: key.x,
            y: key.y,
        };
        let region = geometry
            .tile_region(key.level, key.x, key.y)
            .ok_or_else(out_of_bounds)?;
        let source_region = geometry
            .to_source_region(region, key.level)
            .ok_or_else(out_of_bounds)?;

        let request = RenderRequest {
            region: source_region,
            output_width: region.width,
            output_height: region.height,
            kernel: self.settings.kernel,
            format: self.settings.format,
            quality: self.settings.quality,
        };

        let data = self.render(&source_path, &request).await?;
        let path = self.cache.put(key, &data).await?;

        info!(
            image_id = %key.image_id,
            level = key.level,
            x = key.x,
            y = key.y,
            bytes = data.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Generated tile"
        );

        Ok(TileResponse {
            path,
            data,
            cache_hit: false,
        })
    }

    /// Run the codec under the decode gate.
    async fn render(&self, path: &Path, request: &RenderRequest) -> Result<Bytes, TileError> {
        let wait = Instant::now();
        let _permit = self.gate.acquire().await?;
        debug!(
            waited_ms = wait.elapsed().as_millis() as u64,
            in_flight = self.gate.in_flight(),
            "Acquired decode slot"
        );

        Ok(self.store.codec().render(path, request).await?)
    }
}

/// Removes a key from the in-flight map when its generation task ends,
/// including by panic.
struct InFlightEntry<'a> {
    map: &'a Mutex<InFlightMap>,
    key: &'a TileKey,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        lock(self.map).remove(self.key);
    }
}

fn lock(map: &Mutex<InFlightMap>) -> MutexGuard<'_, InFlightMap> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Tests
// =============================================================================

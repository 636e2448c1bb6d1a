//! # deepzoom-tiler
//!
//! An on-demand deep-zoom tile server for gigapixel images.
//!
//! Uploaded originals are never pre-tiled. Each Deep Zoom tile is rendered
//! from the original the first time it is requested, written to a disk cache,
//! and served from there ever after.
//!
//! ## Features
//!
//! - **Lazy pyramid**: Levels and tiles are computed from image dimensions; nothing is generated up front
//! - **Disk tile cache**: One file per tile, published atomically
//! - **Request collapsing**: Concurrent requests for the same tile share one render
//! - **Bounded decoding**: A decode gate caps simultaneous renders (default 1)
//! - **Uploads**: Multipart upload with immediate pyramid description
//!
//! ## Architecture
//!
//! - [`pyramid`] - Deep Zoom level and tile geometry
//! - [`codec`] - Probe and render boundary, with an `image`-crate implementation
//! - [`store`] - Original image registry and metadata cache
//! - [`gate`] - Decode concurrency gate
//! - [`tile`] - Tile service and disk cache
//! - [`upload`] - Upload intake
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deepzoom_tiler::{
//!     create_router, DecodeGate, DiskTileCache, ImageCodec, ImageStore, RouterConfig,
//!     TileService, TileSettings,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(ImageStore::new(Arc::new(ImageCodec::new()), "data/originals"));
//!     let tile_service = TileService::new(
//!         store,
//!         Arc::new(DiskTileCache::new("data/tiles")),
//!         Arc::new(DecodeGate::new(1)),
//!         TileSettings::default(),
//!     );
//!
//!     let router = create_router(tile_service, "data/uploads", RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod gate;
pub mod pyramid;
pub mod server;
pub mod store;
pub mod tile;
pub mod upload;

// Re-export commonly used types
pub use codec::{
    clamp_quality, is_valid_quality, Codec, ImageCodec, ImageMetadata, RenderRequest,
    ResizeKernel, TileFormat, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use config::Config;
pub use error::{CodecError, StoreError, TileError, UploadError};
pub use gate::{DecodeGate, GatePermit, DEFAULT_DECODE_CONCURRENCY};
pub use pyramid::{
    max_level, parse_tile_filename, PyramidGeometry, PyramidLevelSpec, Region, DEFAULT_TILE_SIZE,
};
pub use server::{
    create_router, health_handler, image_info_handler, images_handler, tile_handler,
    upload_handler, AppState, ErrorResponse, HealthResponse, RouterConfig, UploadResponse,
};
pub use store::{mint_image_id, validate_image_id, ImageRecord, ImageStore, MetadataCache};
pub use tile::{
    DiskTileCache, TileKey, TileRequest, TileResponse, TileService, TileSettings, TileStore,
};
pub use upload::{ImageDescriptor, LevelDescriptor, UploadIntake};

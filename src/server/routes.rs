//! Router configuration for the deep-zoom tile server.
//!
//! # Route Structure
//!
//! ```text
//! /api/health                                   - Health check
//! /api/upload                                   - Upload an image (POST)
//! /api/images                                   - List images
//! /api/images/{image_id}                        - Image descriptor
//! /api/image/{image_id}_files/{level}/{x}_{y}.jpg - Tile endpoint
//! ```
//!
//! # Example
//!
//! ```ignore
//! use deepzoom_tiler::server::{create_router, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://viewer.example.org".to_string()])
//!     .with_max_upload_bytes(512 * 1024 * 1024);
//!
//! let app = create_router(tile_service, "data/uploads", config);
//! axum::serve(tokio::net::TcpListener::bind("127.0.0.1:3000").await?, app).await?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_handler, image_info_handler, images_handler, tile_handler, upload_handler, AppState,
};
use crate::codec::Codec;
use crate::tile::TileService;

/// Default upload size limit (4 GiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Default tile Cache-Control max-age (1 day).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 86400;

// =============================================================================
// Router Configuration
// =============================================================================

/// HTTP-level knobs: CORS, tile caching headers, tracing and body size.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Origins permitted to call the API; `None` permits every origin
    pub cors_origins: Option<Vec<String>>,

    /// `max-age` sent with every tile
    pub cache_max_age: u32,

    /// Wrap the router in a `TraceLayer`
    pub enable_tracing: bool,

    /// Largest accepted request body, in bytes
    pub max_upload_bytes: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            enable_tracing: true,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl RouterConfig {
    /// Permissive CORS, one-day tile max-age, tracing on, 4 GiB uploads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict CORS to `origins`. An empty list blocks cross-origin calls.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Build the API router.
///
/// Uploads are staged in `uploads_dir` and then handed to the image store
/// behind `tile_service`, so new images are tileable as soon as the upload
/// response is sent.
pub fn create_router<C: Codec>(
    tile_service: TileService<C>,
    uploads_dir: impl Into<PathBuf>,
    config: RouterConfig,
) -> Router {
    let app_state =
        AppState::new(tile_service, uploads_dir).with_cache_max_age(config.cache_max_age);
    let cors = cors_layer(config.cors_origins.as_deref());

    let router = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/upload", post(upload_handler::<C>))
        .route("/api/images", get(images_handler::<C>))
        .route("/api/images/{image_id}", get(image_info_handler::<C>))
        // Deep-zoom layout: {image_id}_files/{level}/{x}_{y}.jpg
        .route(
            "/api/image/{tiles_dir}/{level}/{filename}",
            get(tile_handler::<C>),
        )
        .layer(DefaultBodyLimit::max(body_limit(config.max_upload_bytes)))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Body limit in bytes for this target, saturating where `usize` is narrower
/// than the configured limit.
fn body_limit(bytes: u64) -> usize {
    usize::try_from(bytes).unwrap_or(usize::MAX)
}

/// CORS for browser viewers. Unparseable origins are dropped.
fn cors_layer(origins: Option<&[String]>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(24 * 60 * 60));

    let Some(origins) = origins else {
        return base.allow_origin(Any);
    };
    if origins.is_empty() {
        return base;
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    base.allow_origin(allowed)
}

// =============================================================================
// Tests
// =============================================================================

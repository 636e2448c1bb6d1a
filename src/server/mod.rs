//! HTTP server layer for the deep-zoom tile server.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   POST /api/upload     GET /api/image/{id}_files/{l}/{x}_{y}.jpg│
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (requests, error → HTTP) │  │ (router, CORS, body limit)  │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, image_info_handler, images_handler, tile_handler, upload_handler, AppState,
    ErrorResponse, HealthResponse, UploadResponse,
};
pub use routes::{create_router, RouterConfig, DEFAULT_CACHE_MAX_AGE, DEFAULT_MAX_UPLOAD_BYTES};

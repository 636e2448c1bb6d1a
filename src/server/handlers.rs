//! HTTP request handlers for the deep-zoom tile API.
//!
//! # Endpoints
//!
//! - `POST /api/upload` - Upload an image (multipart field `file`)
//! - `GET /api/image/{image_id}_files/{level}/{x}_{y}.jpg` - Serve a tile
//! - `GET /api/images` - List stored images
//! - `GET /api/images/{image_id}` - Describe one image
//! - `GET /api/health` - Health check endpoint

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::codec::Codec;
use crate::error::{CodecError, StoreError, TileError, UploadError};
use crate::pyramid::parse_tile_filename;
use crate::store::{mint_image_id, ImageRecord};
use crate::tile::{TileRequest, TileService};
use crate::upload::{staging_path, upload_extension, ImageDescriptor, UploadIntake};

/// Suffix of the deep-zoom tile directory segment.
const TILES_DIR_SUFFIX: &str = "_files";

/// Multipart field carrying the upload.
const UPLOAD_FIELD: &str = "file";

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<C: Codec> {
    /// The tile service for processing tile requests
    pub tile_service: TileService<C>,

    /// Upload intake sharing the tile service's image store
    pub intake: Arc<UploadIntake<C>>,

    /// Staging directory for uploads in progress
    pub uploads_dir: Arc<PathBuf>,

    /// Cache-Control max-age for tiles, in seconds
    pub cache_max_age: u32,
}

impl<C: Codec> AppState<C> {
    pub fn new(tile_service: TileService<C>, uploads_dir: impl Into<PathBuf>) -> Self {
        let intake = UploadIntake::new(
            Arc::clone(tile_service.store()),
            tile_service.settings(),
        );
        Self {
            tile_service,
            intake: Arc::new(intake),
            uploads_dir: Arc::new(uploads_dir.into()),
            cache_max_age: 86400,
        }
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }
}

impl<C: Codec> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            tile_service: self.tile_service.clone(),
            intake: Arc::clone(&self.intake),
            uploads_dir: Arc::clone(&self.uploads_dir),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response from the upload endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub image_id: String,
    pub info: ImageDescriptor,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Build a JSON error response, logging by severity:
/// 5xx at ERROR, 404 at DEBUG, other 4xx at WARN.
fn error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    if status.is_server_error() {
        error!(status = status.as_u16(), error_type, %message, "Request failed");
    } else if status == StatusCode::NOT_FOUND {
        debug!(status = status.as_u16(), error_type, %message, "Not found");
    } else {
        warn!(status = status.as_u16(), error_type, %message, "Client error");
    }

    let body = ErrorResponse::with_status(error_type, message, status);
    (status, Json(body)).into_response()
}

fn codec_status(err: &CodecError) -> (StatusCode, &'static str) {
    match err {
        CodecError::Unsupported(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format"),
        CodecError::Probe(_) | CodecError::Decode(_) | CodecError::Encode(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "codec_error")
        }
    }
}

fn store_status(err: &StoreError) -> (StatusCode, &'static str) {
    match err {
        StoreError::InvalidImageId { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        StoreError::AlreadyRegistered { .. } => (StatusCode::CONFLICT, "already_exists"),
        // Two originals sharing an id is a storage misconfiguration
        StoreError::Ambiguous { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "ambiguous_image"),
        StoreError::Codec(e) => codec_status(e),
        StoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
    }
}

impl TileError {
    /// HTTP status and error type for this error.
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            TileError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
            TileError::ImageNotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            TileError::OutOfBounds { .. } => (StatusCode::NOT_FOUND, "tile_not_found"),
            TileError::Codec(e) => codec_status(e),
            TileError::Store(e) => store_status(e),
            TileError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
            TileError::GateClosed => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            TileError::Aborted => (StatusCode::INTERNAL_SERVER_ERROR, "generation_aborted"),
        }
    }
}

impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        error_response(status, error_type, self.to_string())
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let (status, error_type) = store_status(&self);
        error_response(status, error_type, self.to_string())
    }
}

impl UploadError {
    /// HTTP status and error type for this error.
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            UploadError::MissingPayload => (StatusCode::BAD_REQUEST, "missing_file"),
            UploadError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            // Anything the codec cannot probe is not an image we can serve
            UploadError::Codec(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_format"),
            UploadError::Store(e) => store_status(e),
            UploadError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        error_response(status, error_type, self.to_string())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /api/image/{image_id}_files/{level}/{x}_{y}.jpg`
///
/// `.jpeg` is accepted as well. Levels count up from the coarsest (0) to
/// full resolution.
///
/// # Response
///
/// - `200 OK`: JPEG tile with `Content-Type: image/jpeg`
/// - `400 Bad Request`: Malformed directory, level or file name
/// - `404 Not Found`: Unknown image, or no tile at that coordinate
/// - `415 Unsupported Media Type`: Original cannot be decoded
/// - `500 Internal Server Error`: Processing error
///
/// # Headers
///
/// - `Cache-Control: public, max-age={cache_max_age}`
/// - `X-Tile-Cache-Hit: true|false`
pub async fn tile_handler<C: Codec>(
    State(state): State<AppState<C>>,
    Path((tiles_dir, level, filename)): Path<(String, String, String)>,
) -> Result<Response, TileError> {
    let image_id = tiles_dir
        .strip_suffix(TILES_DIR_SUFFIX)
        .ok_or_else(|| TileError::InvalidRequest {
            message: format!("expected {{image_id}}{}, got {:?}", TILES_DIR_SUFFIX, tiles_dir),
        })?;
    let level: u32 = level.parse().map_err(|_| TileError::InvalidRequest {
        message: format!("invalid level {:?}", level),
    })?;
    let (x, y, _) = parse_tile_filename(&filename).ok_or_else(|| TileError::InvalidRequest {
        message: format!("invalid tile name {:?}, expected {{x}}_{{y}}.jpg", filename),
    })?;

    let response = state
        .tile_service
        .get_tile(TileRequest::new(image_id, level, x, y))
        .await?;

    let format = state.tile_service.settings().format;
    let headers = [
        (header::CONTENT_TYPE, format.mime_type().to_string()),
        (
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.cache_max_age),
        ),
        (
            HeaderName::from_static("x-tile-cache-hit"),
            response.cache_hit.to_string(),
        ),
    ];

    Ok((StatusCode::OK, headers, response.data).into_response())
}

/// Handle uploads.
///
/// # Endpoint
///
/// `POST /api/upload` (multipart)
///
/// The part named `file` is used; failing that, the first part carrying a
/// file name. It is streamed to the staging directory, then ingested.
///
/// # Response
///
/// `200 OK` with `{"success": true, "imageId": "...", "info": {...}}`.
///
/// # Errors
///
/// - `400 Bad Request`: No file part, or a malformed multipart body
/// - `415 Unsupported Media Type`: The file is not a readable image
/// - `500 Internal Server Error`: Storage failure
pub async fn upload_handler<C: Codec>(
    State(state): State<AppState<C>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, UploadError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(UPLOAD_FIELD) || field.file_name().is_some() {
            return ingest_field(&state, field).await.map(Json);
        }
    }

    Err(UploadError::MissingPayload)
}

async fn ingest_field<C: Codec>(
    state: &AppState<C>,
    field: Field<'_>,
) -> Result<UploadResponse, UploadError> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let image_id = mint_image_id(&file_name);
    let extension = upload_extension(&file_name);

    tokio::fs::create_dir_all(state.uploads_dir.as_path()).await?;
    let staged = staging_path(&state.uploads_dir, &image_id, extension.as_deref());

    match stage_and_ingest(state, field, &image_id, &staged).await {
        Ok(info) => {
            info!(image_id = %image_id, file_name = %file_name, "Upload complete");
            Ok(UploadResponse {
                success: true,
                image_id,
                info,
            })
        }
        Err(e) => {
            // Ingest leaves the staged file behind on failure
            let _ = tokio::fs::remove_file(&staged).await;
            Err(e)
        }
    }
}

async fn stage_and_ingest<C: Codec>(
    state: &AppState<C>,
    field: Field<'_>,
    image_id: &str,
    staged: &FsPath,
) -> Result<ImageDescriptor, UploadError> {
    let bytes = stream_to_file(field, staged).await?;
    if bytes == 0 {
        return Err(UploadError::MissingPayload);
    }
    debug!(image_id, bytes, staged = %staged.display(), "Staged upload");
    state.intake.ingest(image_id, staged).await
}

async fn stream_to_file(mut field: Field<'_>, path: &FsPath) -> Result<u64, UploadError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> UploadError {
    UploadError::InvalidRequest(err.body_text())
}

/// Handle image list requests.
///
/// # Endpoint
///
/// `GET /api/images`
///
/// # Response
///
/// `200 OK` with a JSON array of image records, newest first. Originals
/// that cannot be probed are skipped.
pub async fn images_handler<C: Codec>(
    State(state): State<AppState<C>>,
) -> Result<Json<Vec<ImageRecord>>, StoreError> {
    let records = state.tile_service.store().list().await?;
    Ok(Json(records))
}

/// Handle image info requests.
///
/// # Endpoint
///
/// `GET /api/images/{image_id}`
///
/// # Response
///
/// `200 OK` with the image descriptor, including a per-level breakdown.
pub async fn image_info_handler<C: Codec>(
    State(state): State<AppState<C>>,
    Path(image_id): Path<String>,
) -> Result<Json<ImageDescriptor>, StoreError> {
    let record = state.tile_service.store().record(&image_id).await?;
    let settings = state.tile_service.settings();
    Ok(Json(
        ImageDescriptor::from_record(&record, &settings).with_level_details(),
    ))
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /api/health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "ok",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================

//! Codec engine boundary.
//!
//! The tiling core never decodes pixels itself. It talks to a [`Codec`],
//! which can probe a file for its dimensions and render a source region into
//! an encoded tile.
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────────┐
//! │  ImageStore          │─probe─▶│                          │
//! │  UploadIntake        │        │      dyn Codec           │
//! ├──────────────────────┤        │  (ImageCodec by default) │
//! │  TileService         │─render▶│  extract → resize →      │
//! │  (behind DecodeGate) │        │  encode                  │
//! └──────────────────────┘        └──────────────────────────┘
//! ```

mod image_codec;
mod tiff_region;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use clap::ValueEnum;
use serde::Serialize;

use crate::error::CodecError;
use crate::pyramid::Region;

pub use image_codec::ImageCodec;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Dimensions and format of an original image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// Lowercase format name, e.g. `"jpeg"` or `"tiff"`
    pub format: String,
    pub page_count: u32,
}

/// Resampling kernel used when shrinking a source region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ResizeKernel {
    /// Fastest; the default for interior levels
    #[default]
    Nearest,
    Triangle,
    Lanczos3,
}

/// Encoded output format for tiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TileFormat {
    #[default]
    Jpeg,
}

impl TileFormat {
    /// File extension used in cache paths and URLs.
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
        }
    }

    /// HTTP content type.
    pub fn mime_type(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
        }
    }
}

/// Parameters for rendering one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Region of the source image, in source pixels
    pub region: Region,
    pub output_width: u32,
    pub output_height: u32,
    pub kernel: ResizeKernel,
    pub format: TileFormat,
    pub quality: u8,
}

/// Image decode/encode capability consumed by the tiling core.
///
/// Implementations must tolerate very large sources and multi-page files;
/// the core always targets page 0.
#[async_trait]
pub trait Codec: Send + Sync + 'static {
    /// Read dimensions and format without a full decode.
    async fn probe(&self, path: &Path) -> Result<ImageMetadata, CodecError>;

    /// Extract `request.region`, resize it to the output size and encode it.
    async fn render(&self, path: &Path, request: &RenderRequest) -> Result<Bytes, CodecError>;
}

/// Validate JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

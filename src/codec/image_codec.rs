//! Codec backed by the `image` crate.
//!
//! # Design Decisions
//!
//! - **Blocking work off the runtime**: decode, resize and encode run inside
//!   `spawn_blocking` so a gigapixel decode never stalls the async workers.
//!
//! - **No allocation limits**: sources are expected to be far larger than the
//!   decoder's default 512MB guard. Memory is bounded by the decode gate
//!   instead, which admits only a few renders at a time.
//!
//! - **Region reads for TIFF**: striped and tiled TIFFs are read only where
//!   the requested region lies (see [`super::tiff_region`]). Other formats
//!   are decoded whole and cropped.
//!
//! - **Page 0 only**: multi-page files report their page count but are
//!   rendered from their first page.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader};
use tracing::trace;

use super::tiff_region;
use super::{clamp_quality, Codec, ImageMetadata, RenderRequest, ResizeKernel, TileFormat};
use crate::error::CodecError;
use crate::pyramid::Region;

/// [`Codec`] implementation using the `image` crate decoders.
#[derive(Debug, Clone, Default)]
pub struct ImageCodec {}

impl ImageCodec {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl Codec for ImageCodec {
    async fn probe(&self, path: &Path) -> Result<ImageMetadata, CodecError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || probe_blocking(&path))
            .await
            .map_err(|e| CodecError::Probe(format!("probe task failed: {}", e)))?
    }

    async fn render(&self, path: &Path, request: &RenderRequest) -> Result<Bytes, CodecError> {
        let path = path.to_path_buf();
        let request = request.clone();
        tokio::task::spawn_blocking(move || render_blocking(&path, &request))
            .await
            .map_err(|e| CodecError::Decode(format!("render task failed: {}", e)))?
    }
}

fn open_reader(path: &Path) -> Result<ImageReader<std::io::BufReader<std::fs::File>>, CodecError> {
    let reader = ImageReader::open(path)
        .map_err(|e| CodecError::Probe(format!("{}: {}", path.display(), e)))?
        .with_guessed_format()
        .map_err(|e| CodecError::Probe(format!("{}: {}", path.display(), e)))?;

    if reader.format().is_none() {
        return Err(CodecError::Unsupported(format!(
            "{}: unrecognized image data",
            path.display()
        )));
    }

    Ok(reader)
}

fn probe_blocking(path: &Path) -> Result<ImageMetadata, CodecError> {
    let reader = open_reader(path)?;
    let image_format = reader.format();
    let format = image_format.map(format_name).unwrap_or_default();

    // A header that fails to parse means the file is not a usable image
    let (width, height) = reader.into_dimensions().map_err(|e| match e {
        ImageError::Unsupported(_) | ImageError::Decoding(_) => {
            CodecError::Unsupported(e.to_string())
        }
        _ => CodecError::Probe(e.to_string()),
    })?;

    let page_count = match image_format {
        Some(ImageFormat::Tiff) => tiff_region::count_pages(path)?,
        _ => 1,
    };

    Ok(ImageMetadata {
        width,
        height,
        format,
        page_count,
    })
}

fn render_blocking(path: &Path, request: &RenderRequest) -> Result<Bytes, CodecError> {
    let region = request.region;
    if region.width == 0 || region.height == 0 {
        return Err(CodecError::Decode(format!(
            "empty source region {:?}",
            region
        )));
    }

    let mut reader = open_reader(path)?;

    let region_read = match reader.format() {
        Some(ImageFormat::Tiff) => tiff_region::read_region(path, region)?,
        _ => None,
    };

    let extracted = match region_read {
        Some(read) => {
            trace!(
                path = %path.display(),
                chunks_read = read.chunks_read,
                chunks_total = read.chunks_total,
                "Read TIFF region"
            );
            read.image
        }
        None => {
            reader.no_limits();
            decode_and_crop(reader, region)?
        }
    };

    let (out_w, out_h) = (request.output_width.max(1), request.output_height.max(1));
    let resized = if extracted.width() == out_w && extracted.height() == out_h {
        extracted
    } else {
        extracted.resize_exact(out_w, out_h, filter_type(request.kernel))
    };

    match request.format {
        TileFormat::Jpeg => encode_jpeg(&resized.to_rgb8(), request.quality),
    }
}

fn decode_and_crop(
    reader: ImageReader<std::io::BufReader<std::fs::File>>,
    region: Region,
) -> Result<DynamicImage, CodecError> {
    let source = reader.decode().map_err(|e| match e {
        ImageError::Unsupported(u) => CodecError::Unsupported(u.to_string()),
        other => CodecError::Decode(other.to_string()),
    })?;

    Ok(source.crop_imm(region.left, region.top, region.width, region.height))
}

fn encode_jpeg(img: &image::RgbImage, quality: u8) -> Result<Bytes, CodecError> {
    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));
    encoder
        .encode_image(img)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(Bytes::from(output))
}

fn filter_type(kernel: ResizeKernel) -> FilterType {
    match kernel {
        ResizeKernel::Nearest => FilterType::Nearest,
        ResizeKernel::Triangle => FilterType::Triangle,
        ResizeKernel::Lanczos3 => FilterType::Lanczos3,
    }
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        ImageFormat::Png => "png".to_string(),
        ImageFormat::Tiff => "tiff".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

//! Region reads and page counting for TIFF originals.
//!
//! Striped and tiled TIFFs are read chunk by chunk, so rendering one tile of
//! a large original only decodes the strips or tiles under its source region.
//! Layouts this reader does not handle (planar samples, bit depths other than
//! 8, palette or YCbCr data) yield `None` and the caller decodes the full
//! frame instead.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError};
use tracing::debug;

use crate::error::CodecError;
use crate::pyramid::Region;

/// Pixels of a source region plus how much of the file was read for them.
#[derive(Debug)]
pub(crate) struct RegionRead {
    pub image: DynamicImage,
    pub chunks_read: u32,
    pub chunks_total: u32,
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>, CodecError> {
    let file =
        File::open(path).map_err(|e| CodecError::Probe(format!("{}: {}", path.display(), e)))?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| tiff_error(path, e))?;
    Ok(decoder.with_limits(Limits::unlimited()))
}

fn tiff_error(path: &Path, err: TiffError) -> CodecError {
    match err {
        TiffError::UnsupportedError(e) => {
            CodecError::Unsupported(format!("{}: {}", path.display(), e))
        }
        other => CodecError::Decode(format!("{}: {}", path.display(), other)),
    }
}

/// Number of images (IFDs) chained in the file.
///
/// Counting stops at the first directory that does not parse as an image;
/// the pages before it are still reported.
pub(crate) fn count_pages(path: &Path) -> Result<u32, CodecError> {
    let mut decoder = open_decoder(path)?;
    let mut pages = 1u32;

    while decoder.more_images() {
        if let Err(e) = decoder.next_image() {
            debug!(path = %path.display(), pages, error = %e, "Stopped counting TIFF pages");
            break;
        }
        pages += 1;
    }

    Ok(pages)
}

/// Indices of the chunks of a `chunks_across`-wide grid that intersect
/// `region`, in row-major order. The region must already be clipped to the
/// image.
pub(crate) fn chunks_for_region(
    chunk_width: u32,
    chunk_height: u32,
    chunks_across: u32,
    region: Region,
) -> Vec<u32> {
    if region.width == 0 || region.height == 0 || chunk_width == 0 || chunk_height == 0 {
        return Vec::new();
    }

    let first_col = region.left / chunk_width;
    let last_col = (region.left + region.width - 1) / chunk_width;
    let first_row = region.top / chunk_height;
    let last_row = (region.top + region.height - 1) / chunk_height;

    (first_row..=last_row)
        .flat_map(|row| (first_col..=last_col).map(move |col| row * chunks_across + col))
        .collect()
}

fn samples_per_pixel(color: ColorType) -> Option<usize> {
    match color {
        ColorType::Gray(8) => Some(1),
        ColorType::GrayA(8) => Some(2),
        ColorType::RGB(8) => Some(3),
        ColorType::RGBA(8) => Some(4),
        _ => None,
    }
}

/// Read the pixels of `region` from page 0 of a TIFF file.
///
/// Returns `Ok(None)` when the sample layout is not one this reader copies
/// directly.
pub(crate) fn read_region(path: &Path, region: Region) -> Result<Option<RegionRead>, CodecError> {
    let mut decoder = open_decoder(path)?;
    let (width, height) = decoder.dimensions().map_err(|e| tiff_error(path, e))?;
    let color = decoder.colortype().map_err(|e| tiff_error(path, e))?;

    let Some(channels) = samples_per_pixel(color) else {
        debug!(path = %path.display(), ?color, "TIFF color type needs a full decode");
        return Ok(None);
    };

    let planar = decoder
        .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)
        .map_err(|e| tiff_error(path, e))?;
    let photometric = decoder
        .find_tag_unsigned::<u16>(Tag::PhotometricInterpretation)
        .map_err(|e| tiff_error(path, e))?;
    // Separate sample planes and WhiteIsZero grayscale are left to the image crate
    if planar == Some(2) || photometric == Some(0) {
        debug!(path = %path.display(), ?planar, ?photometric, "TIFF layout needs a full decode");
        return Ok(None);
    }

    let right = region.left.saturating_add(region.width).min(width);
    let bottom = region.top.saturating_add(region.height).min(height);
    if region.left >= right || region.top >= bottom {
        return Err(CodecError::Decode(format!(
            "region {:?} outside {}x{} image",
            region, width, height
        )));
    }
    let clipped = Region::new(region.left, region.top, right - region.left, bottom - region.top);

    let (chunk_w, chunk_h) = decoder.chunk_dimensions();
    let across = width.div_ceil(chunk_w);
    let down = height.div_ceil(chunk_h);
    let chunks = chunks_for_region(chunk_w, chunk_h, across, clipped);

    let out_stride = clipped.width as usize * channels;
    let mut pixels = vec![0u8; out_stride * clipped.height as usize];

    for &index in &chunks {
        let (data_w, data_h) = decoder.chunk_data_dimensions(index);
        let data = match decoder.read_chunk(index).map_err(|e| tiff_error(path, e))? {
            DecodingResult::U8(data) => data,
            _ => return Ok(None),
        };

        let chunk_left = (index % across) * chunk_w;
        let chunk_top = (index / across) * chunk_h;
        let chunk_stride = data_w as usize * channels;
        if data.len() < chunk_stride * data_h as usize {
            return Err(CodecError::Decode(format!(
                "{}: chunk {} is shorter than {}x{}",
                path.display(),
                index,
                data_w,
                data_h
            )));
        }

        let x0 = clipped.left.max(chunk_left);
        let x1 = right.min(chunk_left + data_w);
        let y0 = clipped.top.max(chunk_top);
        let y1 = bottom.min(chunk_top + data_h);
        if x0 >= x1 || y0 >= y1 {
            continue;
        }

        let span = (x1 - x0) as usize * channels;
        for y in y0..y1 {
            let src =
                (y - chunk_top) as usize * chunk_stride + (x0 - chunk_left) as usize * channels;
            let dst =
                (y - clipped.top) as usize * out_stride + (x0 - clipped.left) as usize * channels;
            pixels[dst..dst + span].copy_from_slice(&data[src..src + span]);
        }
    }

    let (w, h) = (clipped.width, clipped.height);
    let image = match channels {
        1 => GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8),
        2 => GrayAlphaImage::from_raw(w, h, pixels).map(DynamicImage::ImageLumaA8),
        3 => RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8),
        _ => RgbaImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgba8),
    }
    .ok_or_else(|| {
        CodecError::Decode(format!("region buffer for {}x{} has the wrong size", w, h))
    })?;

    Ok(Some(RegionRead {
        image,
        chunks_read: chunks.len() as u32,
        chunks_total: across * down,
    }))
}

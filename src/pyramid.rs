//! Pyramid geometry.
//!
//! Pure functions mapping a tile coordinate to a region of the source image.
//!
//! # Level Numbering
//!
//! Level 0 is the coarsest level and `max_level` is native resolution:
//!
//! ```text
//! max_level = ceil(log2(max(width, height) / tile_size))
//! scale(L)  = 2^(max_level - L)
//! dim(L)    = ceil(dim / scale(L))
//! ```
//!
//! For a 10000x8000 image with 256px tiles there are 7 levels (0..=6);
//! level 0 is 157x125 and fits in a single tile.
//!
//! Everything here is deterministic, which is what makes caching rendered
//! tiles forever sound.

use serde::Serialize;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// A rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// Dimensions and scale of a single pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PyramidLevelSpec {
    pub level: u32,
    pub scale: u64,
    pub scaled_width: u32,
    pub scaled_height: u32,
}

/// Pyramid layout for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidGeometry {
    width: u32,
    height: u32,
    tile_size: u32,
    max_level: u32,
}

impl PyramidGeometry {
    /// Build the geometry for an image. A zero tile size is treated as 1.
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        let tile_size = tile_size.max(1);
        Self {
            width,
            height,
            tile_size,
            max_level: max_level(width, height, tile_size),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Index of the full-resolution level.
    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Total number of levels (`max_level + 1`).
    pub fn level_count(&self) -> u32 {
        self.max_level + 1
    }

    /// Downsample factor of a level relative to the source.
    ///
    /// Returns `None` for levels above `max_level`.
    pub fn scale(&self, level: u32) -> Option<u64> {
        if level > self.max_level {
            return None;
        }
        Some(1u64 << (self.max_level - level))
    }

    /// `ceil(dim / scale(level))`.
    pub fn scaled_dim(&self, dim: u32, level: u32) -> Option<u32> {
        let scale = self.scale(level)?;
        // dim <= u32::MAX and scale >= 1, so the quotient fits in u32
        Some((dim as u64).div_ceil(scale) as u32)
    }

    /// Full description of a level.
    pub fn level_spec(&self, level: u32) -> Option<PyramidLevelSpec> {
        Some(PyramidLevelSpec {
            level,
            scale: self.scale(level)?,
            scaled_width: self.scaled_dim(self.width, level)?,
            scaled_height: self.scaled_dim(self.height, level)?,
        })
    }

    /// All levels from coarsest to finest.
    pub fn levels(&self) -> impl Iterator<Item = PyramidLevelSpec> + '_ {
        (0..=self.max_level).filter_map(move |level| self.level_spec(level))
    }

    /// Number of tiles in X and Y at a level.
    pub fn tile_count(&self, level: u32) -> Option<(u32, u32)> {
        let spec = self.level_spec(level)?;
        Some((
            spec.scaled_width.div_ceil(self.tile_size),
            spec.scaled_height.div_ceil(self.tile_size),
        ))
    }

    /// Region covered by tile `(x, y)` in scaled-level coordinates.
    ///
    /// Edge tiles are truncated. Returns `None` if no tile exists there.
    pub fn tile_region(&self, level: u32, x: u32, y: u32) -> Option<Region> {
        let spec = self.level_spec(level)?;
        let ts = self.tile_size as u64;
        let left = x as u64 * ts;
        let top = y as u64 * ts;
        let (sw, sh) = (spec.scaled_width as u64, spec.scaled_height as u64);

        if left >= sw || top >= sh {
            return None;
        }

        Some(Region::new(
            left as u32,
            top as u32,
            ts.min(sw - left) as u32,
            ts.min(sh - top) as u32,
        ))
    }

    /// Map a scaled-level region back to source pixels, clipped to the image.
    ///
    /// Multiplying by the scale can overshoot the source edge on the last
    /// row/column of coarse levels; the clip absorbs that.
    pub fn to_source_region(&self, region: Region, level: u32) -> Option<Region> {
        let scale = self.scale(level)?;
        let (w, h) = (self.width as u64, self.height as u64);

        let left = (region.left as u64 * scale).min(w);
        let top = (region.top as u64 * scale).min(h);
        let right = ((region.left as u64 + region.width as u64) * scale).min(w);
        let bottom = ((region.top as u64 + region.height as u64) * scale).min(h);

        Some(Region::new(
            left as u32,
            top as u32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }
}

/// Smallest `m` such that `tile_size * 2^m >= max(width, height)`.
///
/// Integer doubling gives exactly `ceil(log2(max_dim / tile_size))` without
/// float rounding at powers of two.
pub fn max_level(width: u32, height: u32, tile_size: u32) -> u32 {
    let max_dim = width.max(height) as u64;
    let mut span = tile_size.max(1) as u64;
    let mut level = 0;
    while span < max_dim {
        span <<= 1;
        level += 1;
    }
    level
}

/// Parse a tile filename like `"3_5.jpg"` into `(x, y, extension)`.
///
/// Only `jpg` and `jpeg` extensions are accepted.
pub fn parse_tile_filename(filename: &str) -> Option<(u32, u32, &str)> {
    let (name, ext) = filename.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case("jpg") && !ext.eq_ignore_ascii_case("jpeg") {
        return None;
    }

    let (x, y) = name.split_once('_')?;
    if x.is_empty() || y.is_empty() || !x.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !y.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some((x.parse().ok()?, y.parse().ok()?, ext))
}

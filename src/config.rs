//! Configuration management for the deep-zoom tile server.
//!
//! Settings come from command-line arguments and `DZT_` environment
//! variables, with defaults for everything.
//!
//! # Example
//!
//! ```ignore
//! use deepzoom_tiler::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//! println!("Listening on {}", config.bind_address());
//! ```
//!
//! # Environment Variables
//!
//! - `DZT_HOST` - Server bind address (default: 0.0.0.0)
//! - `DZT_PORT` - Server port (default: 3000)
//! - `DZT_DATA_DIR` - Root for originals, tiles and uploads (default: ./data)
//! - `DZT_ORIGINALS_DIR` / `DZT_TILES_DIR` / `DZT_UPLOADS_DIR` - Per-area overrides
//! - `DZT_TILE_SIZE` - Tile edge in pixels (default: 256)
//! - `DZT_JPEG_QUALITY` - Tile JPEG quality (default: 80)
//! - `DZT_RESIZE_KERNEL` - nearest, triangle or lanczos3 (default: nearest)
//! - `DZT_DECODE_CONCURRENCY` - Simultaneous renders (default: 1)
//! - `DZT_MAX_UPLOAD_MB` - Upload size limit in MiB (default: 4096)
//! - `DZT_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 86400)
//! - `DZT_CORS_ORIGINS` - Comma-separated allowed origins (default: any)

use std::path::PathBuf;

use clap::Parser;

use crate::codec::{ResizeKernel, DEFAULT_JPEG_QUALITY};
use crate::gate::DEFAULT_DECODE_CONCURRENCY;
use crate::pyramid::DEFAULT_TILE_SIZE;
use crate::server::{RouterConfig, DEFAULT_CACHE_MAX_AGE};
use crate::tile::TileSettings;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default upload limit in MiB.
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 4096;

/// Largest tile edge accepted.
pub const MAX_TILE_SIZE: u32 = 4096;

// =============================================================================
// CLI Arguments
// =============================================================================

/// deepzoom-tiler - An on-demand deep-zoom tile server.
///
/// Accepts image uploads and serves Deep Zoom tiles rendered from the
/// original file on first request, caching each tile on disk.
#[derive(Parser, Debug, Clone)]
#[command(name = "deepzoom-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "DZT_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "DZT_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Root directory holding `originals/`, `tiles/` and `uploads/`.
    #[arg(long, default_value = DEFAULT_DATA_DIR, env = "DZT_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Directory for original images (default: <data-dir>/originals).
    #[arg(long, env = "DZT_ORIGINALS_DIR")]
    pub originals_dir: Option<PathBuf>,

    /// Directory for rendered tiles (default: <data-dir>/tiles).
    #[arg(long, env = "DZT_TILES_DIR")]
    pub tiles_dir: Option<PathBuf>,

    /// Staging directory for uploads (default: <data-dir>/uploads).
    #[arg(long, env = "DZT_UPLOADS_DIR")]
    pub uploads_dir: Option<PathBuf>,

    // =========================================================================
    // Tile Configuration
    // =========================================================================
    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "DZT_TILE_SIZE")]
    pub tile_size: u32,

    /// JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "DZT_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Resampling kernel used when shrinking source regions.
    #[arg(long, value_enum, default_value_t = ResizeKernel::Nearest, env = "DZT_RESIZE_KERNEL")]
    pub resize_kernel: ResizeKernel,

    /// Maximum number of simultaneous tile renders.
    ///
    /// A single gigapixel decode can use gigabytes of memory.
    #[arg(long, default_value_t = DEFAULT_DECODE_CONCURRENCY, env = "DZT_DECODE_CONCURRENCY")]
    pub decode_concurrency: usize,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// Maximum upload size in MiB.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB, env = "DZT_MAX_UPLOAD_MB")]
    pub max_upload_mb: u64,

    /// HTTP Cache-Control max-age for tiles, in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "DZT_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "DZT_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.decode_concurrency == 0 {
            return Err("decode_concurrency must be greater than 0".to_string());
        }

        if self.max_upload_mb == 0 {
            return Err("max_upload_mb must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn originals_dir(&self) -> PathBuf {
        self.originals_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("originals"))
    }

    pub fn tiles_dir(&self) -> PathBuf {
        self.tiles_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tiles"))
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.uploads_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("uploads"))
    }

    /// Upload limit in bytes, saturating at `u64::MAX`.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn tile_settings(&self) -> TileSettings {
        TileSettings::default()
            .with_tile_size(self.tile_size)
            .with_quality(self.jpeg_quality)
            .with_kernel(self.resize_kernel)
    }

    pub fn router_config(&self) -> RouterConfig {
        let mut router_config = RouterConfig::new()
            .with_cache_max_age(self.cache_max_age)
            .with_max_upload_bytes(self.max_upload_bytes())
            .with_tracing(!self.no_tracing);

        if let Some(ref origins) = self.cors_origins {
            router_config = router_config.with_cors_origins(origins.clone());
        }

        router_config
    }
}

// =============================================================================
// Tests
// =============================================================================

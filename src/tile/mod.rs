//! Tile service layer.
//!
//! This module turns tile coordinates into encoded tiles, rendering them on
//! first request and serving them from disk afterwards.
//!
//! # Request Path
//!
//! ```text
//! handler ─▶ TileService::get_tile
//!              ├─ DiskTileCache hit ──────────────▶ bytes (cache_hit = true)
//!              └─ miss ─▶ in-flight generation for (id, level, x, y)
//!                           ├─ ImageStore: resolve + metadata
//!                           ├─ DecodeGate permit ─▶ Codec::render
//!                           └─ DiskTileCache::put ─▶ bytes (cache_hit = false)
//! ```
//!
//! # Components
//!
//! - [`TileService`]: Cache lookup, request collapsing and rendering
//! - [`TileStore`]: Persistent tile storage (`has`/`get`/`put`)
//! - [`DiskTileCache`]: `TileStore` on the filesystem with atomic publication
//! - [`TileKey`]: Image id plus `(level, x, y)`
//! - [`TileRequest`] / [`TileResponse`]: Service input and output

mod cache;
mod service;

pub use cache::{DiskTileCache, TileKey, TileStore};
pub use service::{TileRequest, TileResponse, TileService, TileSettings};

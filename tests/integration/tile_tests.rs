//! Tile engine integration tests.
//!
//! Tests verify:
//! - Pyramid geometry for a gigapixel-sized source
//! - Idempotence: a tile is rendered once and then served from disk
//! - Decode gate bound under concurrent load
//! - Collapsing of concurrent requests for one coordinate
//! - Atomic cache publication (no temporary files left behind)

use std::sync::Arc;
use std::time::Duration;

use deepzoom_tiler::{
    max_level, DecodeGate, DiskTileCache, ImageStore, PyramidGeometry, Region, TileError,
    TileRequest, TileService, TileSettings,
};

use super::test_utils::{FakeCodec, TestEnv};

// =============================================================================
// Geometry
// =============================================================================

#[test]
fn test_reference_geometry() {
    let geometry = PyramidGeometry::new(10000, 8000, 256);

    assert_eq!(geometry.max_level(), 6);
    assert_eq!(geometry.level_count(), 7);

    let level0 = geometry.level_spec(0).unwrap();
    assert_eq!((level0.scaled_width, level0.scaled_height), (157, 125));
    assert_eq!(level0.scale, 64);

    assert_eq!(geometry.tile_region(0, 0, 0), Some(Region::new(0, 0, 157, 125)));
    assert_eq!(geometry.tile_region(0, 1, 0), None);
    assert_eq!(
        geometry.to_source_region(Region::new(0, 0, 157, 125), 0),
        Some(Region::new(0, 0, 10000, 8000))
    );
}

#[test]
fn test_full_resolution_level_matches_source() {
    let sizes = [
        (1, 1),
        (255, 255),
        (256, 256),
        (257, 10),
        (300, 200),
        (10000, 8000),
        (65536, 3),
        (123_457, 98_765),
    ];

    for (w, h) in sizes {
        let geometry = PyramidGeometry::new(w, h, 256);
        let max = geometry.max_level();
        assert_eq!(max, max_level(w, h, 256));
        assert_eq!(geometry.scaled_dim(w, max), Some(w), "{}x{}", w, h);
        assert_eq!(geometry.scaled_dim(h, max), Some(h), "{}x{}", w, h);
        assert_eq!(geometry.scaled_dim(w, 0).map(|d| d <= 256), Some(true));
    }
}

#[test]
fn test_tiles_cover_level_exactly() {
    let geometry = PyramidGeometry::new(10000, 8000, 256);

    for level in 0..=geometry.max_level() {
        let spec = geometry.level_spec(level).unwrap();
        let (tx, ty) = geometry.tile_count(level).unwrap();

        let row_width: u32 = (0..tx)
            .map(|x| geometry.tile_region(level, x, 0).unwrap().width)
            .sum();
        let col_height: u32 = (0..ty)
            .map(|y| geometry.tile_region(level, 0, y).unwrap().height)
            .sum();

        assert_eq!(row_width, spec.scaled_width, "level {}", level);
        assert_eq!(col_height, spec.scaled_height, "level {}", level);
        assert!(geometry.tile_region(level, tx, 0).is_none());
        assert!(geometry.tile_region(level, 0, ty).is_none());
    }
}

// =============================================================================
// Synthesis
// =============================================================================

#[tokio::test]
async fn test_second_request_performs_no_render() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let codec = Arc::new(FakeCodec::default());
    let service = env.service(Arc::clone(&codec), 1);

    let first = service.get_tile(TileRequest::new("big", 6, 0, 0)).await.unwrap();
    let second = service.get_tile(TileRequest::new("big", 6, 0, 0)).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.data, second.data);
    assert_eq!(codec.stats.renders(), 1);
}

#[tokio::test]
async fn test_cache_survives_service_restart() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);

    let codec = Arc::new(FakeCodec::default());
    let service = env.service(Arc::clone(&codec), 1);
    service.get_tile(TileRequest::new("big", 3, 2, 1)).await.unwrap();
    drop(service);

    let fresh_codec = Arc::new(FakeCodec::default());
    let restarted = env.service(Arc::clone(&fresh_codec), 1);
    let response = restarted.get_tile(TileRequest::new("big", 3, 2, 1)).await.unwrap();

    assert!(response.cache_hit);
    assert_eq!(fresh_codec.stats.renders(), 0);
    assert_eq!(fresh_codec.stats.probes(), 0);
}

#[tokio::test]
async fn test_metadata_probed_once_per_image() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let codec = Arc::new(FakeCodec::default());
    let service = env.service(Arc::clone(&codec), 1);

    for x in 0..4 {
        service.get_tile(TileRequest::new("big", 6, x, 0)).await.unwrap();
    }

    assert_eq!(codec.stats.renders(), 4);
    assert_eq!(codec.stats.probes(), 1);
}

#[tokio::test]
async fn test_render_parameters() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let codec = Arc::new(FakeCodec::default());
    let service = env.service(Arc::clone(&codec), 1);

    // Bottom-right tile at full resolution: 10000 = 39*256 + 16, 8000 = 31*256 + 64
    service.get_tile(TileRequest::new("big", 6, 39, 31)).await.unwrap();
    // Bottom-right tile at level 5: 5000 = 19*256 + 136, 4000 = 15*256 + 160
    service.get_tile(TileRequest::new("big", 5, 19, 15)).await.unwrap();

    let requests = codec.stats.requests();
    assert_eq!(requests[0].region, Region::new(9984, 7936, 16, 64));
    assert_eq!((requests[0].output_width, requests[0].output_height), (16, 64));
    assert_eq!(requests[1].region, Region::new(9728, 7680, 272, 320));
    assert_eq!((requests[1].output_width, requests[1].output_height), (136, 160));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_gate_capacity_one_never_overlaps_renders() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let codec = Arc::new(FakeCodec::new(Duration::from_millis(10)));
    let service = env.service(Arc::clone(&codec), 1);

    let mut handles = Vec::new();
    for i in 0..12u32 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .get_tile(TileRequest::new("big", 6, i % 6, i / 6))
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(codec.stats.renders(), 12);
    assert_eq!(codec.stats.max_active(), 1);
    assert_eq!(service.gate().peak_in_flight(), 1);
    assert_eq!(service.gate().available(), 1);
}

#[tokio::test]
async fn test_gate_capacity_bounds_parallelism() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let codec = Arc::new(FakeCodec::new(Duration::from_millis(20)));
    let service = env.service(Arc::clone(&codec), 3);

    let mut handles = Vec::new();
    for x in 0..10u32 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.get_tile(TileRequest::new("big", 6, x, 5)).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert!(codec.stats.max_active() <= 3);
    assert_eq!(service.gate().capacity(), 3);
}

#[tokio::test]
async fn test_concurrent_duplicates_render_once() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let codec = Arc::new(FakeCodec::new(Duration::from_millis(30)));
    let service = env.service(Arc::clone(&codec), 4);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.get_tile(TileRequest::new("big", 4, 1, 1)).await
        }));
    }

    let mut bodies = Vec::new();
    for handle in handles {
        bodies.push(handle.await.unwrap().unwrap().data);
    }

    assert_eq!(codec.stats.renders(), 1);
    assert!(bodies.iter().all(|b| *b == bodies[0]));
    assert_eq!(service.in_flight(), 0);
}

#[tokio::test]
async fn test_shared_gate_across_services() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let codec = Arc::new(FakeCodec::new(Duration::from_millis(10)));
    let gate = Arc::new(DecodeGate::new(1));

    let make = || {
        let store = Arc::new(ImageStore::new(Arc::clone(&codec), env.originals()));
        TileService::new(
            store,
            Arc::new(DiskTileCache::new(env.tiles())),
            Arc::clone(&gate),
            TileSettings::default(),
        )
    };
    let a = make();
    let b = make();

    let (ra, rb) = tokio::join!(
        a.get_tile(TileRequest::new("big", 6, 0, 0)),
        b.get_tile(TileRequest::new("big", 6, 1, 0)),
    );
    assert!(ra.is_ok() && rb.is_ok());
    assert_eq!(codec.stats.max_active(), 1);
}

// =============================================================================
// Cache Publication
// =============================================================================

#[tokio::test]
async fn test_no_temporary_files_remain() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let service = env.service(Arc::new(FakeCodec::new(Duration::from_millis(1))), 2);

    let mut handles = Vec::new();
    for level in 0..=3u32 {
        for x in 0..2u32 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.get_tile(TileRequest::new("big", level, x, 0)).await
            }));
        }
    }
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(TileError::OutOfBounds { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    let files = env.tile_files();
    assert_eq!(files.len(), ok);
    for file in files {
        let name = file.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(".jpg"), "unexpected file {:?}", file);
        assert!(!name.starts_with('.'), "temporary file left: {:?}", file);
    }
}

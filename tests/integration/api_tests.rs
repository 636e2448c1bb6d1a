//! API integration tests for tile retrieval, listing and error handling.
//!
//! Tests verify:
//! - Tile retrieval from real PNG originals
//! - Cache headers and cache-hit reporting
//! - Image listing and descriptors
//! - HTTP response codes for malformed and unknown requests

use std::sync::Arc;

use axum::http::StatusCode;
use tower::ServiceExt;

use deepzoom_tiler::ImageCodec;

use super::test_utils::{
    body_bytes, body_json, get, is_valid_jpeg, jpeg_bytes, jpeg_dimensions, png_bytes,
    CountingCodec, FakeCodec, TestEnv,
};

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// Tile Retrieval
// =============================================================================

#[tokio::test]
async fn test_tile_retrieval_success() {
    let env = TestEnv::new();
    env.png_original("photo", 300, 200);
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router
        .oneshot(get("/api/image/photo_files/1/0_0.jpg"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "image/jpeg"
    );
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=86400"
    );
    assert_eq!(response.headers().get("x-tile-cache-hit").unwrap(), "false");

    let body = body_bytes(response).await;
    assert!(is_valid_jpeg(&body), "Response should be a valid JPEG");
    assert_eq!(jpeg_dimensions(&body), (256, 200));
}

#[tokio::test]
async fn test_edge_and_coarse_tiles_have_clipped_sizes() {
    let env = TestEnv::new();
    env.png_original("photo", 300, 200);
    let router = env.router(Arc::new(ImageCodec::new()));

    // Right-hand column at full resolution
    let response = router
        .clone()
        .oneshot(get("/api/image/photo_files/1/1_0.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(jpeg_dimensions(&body_bytes(response).await), (44, 200));

    // Whole image at half size
    let response = router
        .oneshot(get("/api/image/photo_files/0/0_0.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(jpeg_dimensions(&body_bytes(response).await), (150, 100));
}

#[tokio::test]
async fn test_cache_hit_header() {
    let env = TestEnv::new();
    env.png_original("photo", 64, 64);
    let codec = Arc::new(CountingCodec::default());
    let router = env.router(Arc::clone(&codec));

    let first = router
        .clone()
        .oneshot(get("/api/image/photo_files/0/0_0.jpg"))
        .await
        .unwrap();
    assert_eq!(first.headers().get("x-tile-cache-hit").unwrap(), "false");
    let first_body = body_bytes(first).await;

    let second = router
        .oneshot(get("/api/image/photo_files/0/0_0.jpg"))
        .await
        .unwrap();
    assert_eq!(second.headers().get("x-tile-cache-hit").unwrap(), "true");
    let second_body = body_bytes(second).await;

    assert_eq!(first_body, second_body);
    assert_eq!(codec.stats.renders(), 1);
}

#[tokio::test]
async fn test_jpeg_extension_accepted() {
    let env = TestEnv::new();
    env.png_original("photo", 32, 32);
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router
        .oneshot(get("/api/image/photo_files/0/0_0.jpeg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_tile_persisted_at_layout_path() {
    let env = TestEnv::new();
    env.png_original("photo", 300, 200);
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router
        .oneshot(get("/api/image/photo_files/1/1_0.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = env.tiles().join("photo").join("1").join("1_0.jpg");
    assert!(stored.is_file());
    assert!(is_valid_jpeg(&std::fs::read(stored).unwrap()));
}

// =============================================================================
// Tile Errors
// =============================================================================

#[tokio::test]
async fn test_out_of_bounds_is_not_found() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let codec = Arc::new(FakeCodec::default());
    let router = env.router(Arc::clone(&codec));

    let response = router
        .oneshot(get("/api/image/big_files/0/1_0.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"], "tile_not_found");
    assert_eq!(json["status"], 404);

    assert_eq!(codec.stats.renders(), 0);
    assert!(env.tile_files().is_empty());
}

#[tokio::test]
async fn test_level_beyond_pyramid_is_not_found() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let router = env.router(Arc::new(FakeCodec::default()));

    let response = router
        .oneshot(get("/api/image/big_files/7/0_0.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_image_is_not_found() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router
        .oneshot(get("/api/image/nope_files/0/0_0.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn test_malformed_tile_paths_are_bad_requests() {
    let env = TestEnv::new();
    env.png_original("photo", 32, 32);
    let router = env.router(Arc::new(ImageCodec::new()));

    let cases = [
        "/api/image/photo/0/0_0.jpg",
        "/api/image/photo_files/x/0_0.jpg",
        "/api/image/photo_files/-1/0_0.jpg",
        "/api/image/photo_files/0/0-0.jpg",
        "/api/image/photo_files/0/0_0.png",
        "/api/image/photo_files/0/a_0.jpg",
        "/api/image/photo_files/0/0_0",
    ];

    for uri in cases {
        let response = router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);

        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request", "{}", uri);
    }
}

#[tokio::test]
async fn test_corrupt_original_is_unsupported() {
    let env = TestEnv::new();
    std::fs::write(env.originals().join("junk.png"), b"not really a png").unwrap();
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router
        .oneshot(get("/api/image/junk_files/0/0_0.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(env.tile_files().is_empty());
}

// =============================================================================
// Listing and Descriptors
// =============================================================================

#[tokio::test]
async fn test_list_empty() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router.oneshot(get("/api/images")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn test_list_skips_unreadable_originals() {
    let env = TestEnv::new();
    env.png_original("good", 120, 80);
    std::fs::write(env.originals().join("bad.png"), b"garbage").unwrap();
    std::fs::create_dir_all(env.originals().join("subdir")).unwrap();
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router.oneshot(get("/api/images")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let records = json.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["imageId"], "good");
    assert_eq!(records[0]["width"], 120);
    assert_eq!(records[0]["height"], 80);
    assert_eq!(records[0]["format"], "png");
    assert_eq!(records[0]["pageCount"], 1);
    assert!(records[0]["uploadedAt"].is_string());
}

#[tokio::test]
async fn test_image_descriptor() {
    let env = TestEnv::new();
    env.fake_original("big", 10000, 8000);
    let router = env.router(Arc::new(FakeCodec::default()));

    let response = router.oneshot(get("/api/images/big")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["imageId"], "big");
    assert_eq!(json["tileSize"], 256);
    assert_eq!(json["format"], "jpg");
    assert_eq!(json["levels"], 7);
    assert_eq!(json["originalFormat"], "tiff");

    let details = json["levelDetails"].as_array().unwrap();
    assert_eq!(details.len(), 7);
    assert_eq!(details[0]["width"], 157);
    assert_eq!(details[0]["height"], 125);
    assert_eq!(details[0]["scale"], 64);
    assert_eq!(details[6]["tilesX"], 40);
    assert_eq!(details[6]["tilesY"], 32);
}

#[tokio::test]
async fn test_image_descriptor_unknown() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router.oneshot(get("/api/images/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ambiguous_original_is_reported() {
    let env = TestEnv::new();
    std::fs::write(env.originals().join("twin.bmp"), "10x10").unwrap();
    std::fs::write(env.originals().join("twin.gif"), "10x10").unwrap();
    let router = env.router(Arc::new(FakeCodec::default()));

    let response = router
        .oneshot(get("/api/image/twin_files/0/0_0.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["error"], "ambiguous_image");
}

#[tokio::test]
async fn test_same_stem_png_and_jpeg_is_ambiguous() {
    let env = TestEnv::new();
    std::fs::write(env.originals().join("twin.png"), png_bytes(300, 200)).unwrap();
    std::fs::write(env.originals().join("twin.jpg"), jpeg_bytes(64, 48)).unwrap();
    env.png_original("single", 100, 100);
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router
        .clone()
        .oneshot(get("/api/image/twin_files/0/0_0.jpg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "ambiguous_image");

    let response = router.clone().oneshot(get("/api/images/twin")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = router.oneshot(get("/api/images")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["imageId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["single"]);
    assert!(env.tile_files().is_empty());
}

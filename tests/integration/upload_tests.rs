//! Upload integration tests.
//!
//! Tests verify:
//! - Multipart upload of a real image returns its pyramid description
//! - The original lands in the originals directory and staging is emptied
//! - Uploaded images are immediately listable and tileable
//! - Rejection of missing and undecodable payloads

use std::sync::Arc;

use axum::http::StatusCode;
use tower::ServiceExt;

use deepzoom_tiler::ImageCodec;

use super::test_utils::{
    body_bytes, body_json, get, is_valid_jpeg, jpeg_bytes, jpeg_dimensions, multipart_body,
    multipart_text_body, png_bytes, upload_request, TestEnv,
};

fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Successful Uploads
// =============================================================================

#[tokio::test]
async fn test_upload_png() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let body = multipart_body("file", "photo.png", "image/png", &png_bytes(300, 200));
    let response = router.oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["success"], true);

    let image_id = json["imageId"].as_str().unwrap().to_string();
    assert_eq!(image_id.len(), 32);
    assert!(image_id.bytes().all(|b| b.is_ascii_hexdigit()));

    let info = &json["info"];
    assert_eq!(info["imageId"], image_id.as_str());
    assert_eq!(info["width"], 300);
    assert_eq!(info["height"], 200);
    assert_eq!(info["tileSize"], 256);
    assert_eq!(info["format"], "jpg");
    assert_eq!(info["levels"], 2);
    assert_eq!(info["originalFormat"], "png");
    assert!(info["uploadedAt"].is_string());

    assert_eq!(
        dir_entries(&env.originals()),
        vec![format!("{}.png", image_id)]
    );
    assert!(dir_entries(&env.uploads()).is_empty());
}

#[tokio::test]
async fn test_uploaded_image_is_listed_and_tileable() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let body = multipart_body("file", "photo.png", "image/png", &png_bytes(300, 200));
    let response = router.clone().oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let image_id = body_json(response).await["imageId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = router.clone().oneshot(get("/api/images")).await.unwrap();
    let listed = body_json(response).await;
    let records = listed.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["imageId"], image_id.as_str());

    let uri = format!("/api/image/{}_files/1/1_0.jpg", image_id);
    let response = router.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let tile = body_bytes(response).await;
    assert!(is_valid_jpeg(&tile));
    assert_eq!(jpeg_dimensions(&tile), (44, 200));
}

#[tokio::test]
async fn test_extension_taken_from_probe_when_name_has_none() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let body = multipart_body("file", "blob", "application/octet-stream", &jpeg_bytes(64, 48));
    let response = router.oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let image_id = json["imageId"].as_str().unwrap();
    assert_eq!(json["info"]["originalFormat"], "jpeg");
    assert_eq!(json["info"]["levels"], 1);
    assert_eq!(
        dir_entries(&env.originals()),
        vec![format!("{}.jpg", image_id)]
    );
}

#[tokio::test]
async fn test_first_file_part_used_when_not_named_file() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let body = multipart_body("image", "small.png", "image/png", &png_bytes(16, 16));
    let response = router.oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(dir_entries(&env.originals()).len(), 1);
}

#[tokio::test]
async fn test_uploads_get_distinct_ids() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let body = multipart_body("file", "same.png", "image/png", &png_bytes(8, 8));
        let response = router.clone().oneshot(upload_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        ids.push(body_json(response).await["imageId"].as_str().unwrap().to_string());
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(dir_entries(&env.originals()).len(), 3);
}

// =============================================================================
// Rejected Uploads
// =============================================================================

#[tokio::test]
async fn test_missing_file_part() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let response = router
        .oneshot(upload_request(multipart_text_body("comment", "hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "missing_file");
    assert!(dir_entries(&env.originals()).is_empty());
}

#[tokio::test]
async fn test_empty_file_part() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let body = multipart_body("file", "empty.png", "image/png", b"");
    let response = router.oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "missing_file");
    assert!(dir_entries(&env.uploads()).is_empty());
}

#[tokio::test]
async fn test_undecodable_upload_is_rejected() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let body = multipart_body("file", "notes.txt", "text/plain", b"definitely not pixels");
    let response = router.clone().oneshot(upload_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let json = body_json(response).await;
    assert_eq!(json["error"], "unsupported_format");

    assert!(dir_entries(&env.originals()).is_empty());
    assert!(dir_entries(&env.uploads()).is_empty());

    let response = router.oneshot(get("/api/images")).await.unwrap();
    assert_eq!(body_json(response).await, serde_json::json!([]));
}

#[tokio::test]
async fn test_upload_requires_multipart() {
    let env = TestEnv::new();
    let router = env.router(Arc::new(ImageCodec::new()));

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{}"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert!(response.status().is_client_error());
    assert!(dir_entries(&env.originals()).is_empty());
}

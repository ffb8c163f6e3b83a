//! Router-level tests for `GET /api/image/:name`.

mod support;

use axum::http::StatusCode;
use support::harness;
use vigil_test_utils::{fixtures, MemoryArtifactStore};

#[tokio::test]
async fn test_image_is_encoded_and_cached() {
    let h = harness()
        .store(MemoryArtifactStore::new().with_file(fixtures::EXAMPLE_IMAGE, fixtures::jpeg_bytes()))
        .build();
    let uri = format!("/api/image/{}", fixtures::EXAMPLE_IMAGE);

    let (status, first) = h.get_json(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    assert_eq!(first["image"], "data:image/jpeg;base64,/9j/2Q==");
    assert_eq!(first["cached"], false);

    let (_, second) = h.get_json(&uri).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["image"], first["image"]);
    assert_eq!(h.store.reads(), 1);
}

#[tokio::test]
async fn test_png_mime_type() {
    let h = harness()
        .store(MemoryArtifactStore::new().with_file("Overview.PNG", vec![0x89, b'P', b'N', b'G']))
        .build();

    let (status, body) = h.get_json("/api/image/Overview.PNG").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["image"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_missing_image_is_not_cached() {
    let h = harness().build();

    let (status, body) = h.get_json("/api/image/missing.jpg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "ArtifactNotFound");
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (status, _) = h.get_json("/api/image/missing.jpg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Written after the miss: the next request picks it up.
    h.store.insert("missing.jpg", fixtures::jpeg_bytes());
    let (status, body) = h.get_json("/api/image/missing.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], false);
}

#[tokio::test]
async fn test_cached_image_survives_removal() {
    let h = harness()
        .store(MemoryArtifactStore::new().with_file("frame.jpg", fixtures::jpeg_bytes()))
        .build();

    h.get_json("/api/image/frame.jpg").await;
    h.store.remove("frame.jpg");

    let (status, body) = h.get_json("/api/image/frame.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], true);
}

#[tokio::test]
async fn test_path_traversal_rejected() {
    let h = harness().build();

    for uri in ["/api/image/%2E%2E", "/api/image/a%2Fb.jpg", "/api/image/..%5Csecret.jpg"] {
        let (status, body) = h.get_json(uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["code"], "InvalidInput");
    }
    assert_eq!(h.store.reads(), 0);
}

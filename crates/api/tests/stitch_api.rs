//! End-to-end stitching through the HTTP API with a scripted engine.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{
    body_bytes, body_json, entries, get, multipart_body, post_empty, post_json, post_multipart,
    TestApp, JPEG_BYTES, STITCH_HANG, STITCH_NO_OVERLAP, STITCH_OK,
};
use pivot_core::failure::FailureKind;
use pivot_core::job::JobState;
use pivot_core::store::JobStore;
use serde_json::{json, Value};

/// Poll a job record until `done` accepts it.
async fn wait_for_job(app: &TestApp, job_id: &str, done: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..200 {
        let response = get(app.router.clone(), &format!("/api/v1/jobs/{job_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let record = body_json(response).await["data"].clone();
        if done(&record) {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {job_id} never reached the expected state");
}

// ---------------------------------------------------------------------------
// Synchronous stitching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stitch_returns_result_ref_that_can_be_downloaded() {
    let app = TestApp::new(STITCH_OK);
    app.add_images(&["left.jpg", "right.jpg"]);

    let response = post_json(
        app.router.clone(),
        "/api/v1/stitch",
        json!({ "panoramaName": "Harbour", "sourceRefs": ["left.jpg", "right.jpg"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["message"], "Panorama stitched successfully");
    assert!(json["jobId"].is_string());
    assert!(!json["trace"].as_array().unwrap().is_empty());

    let result_ref = json["resultRef"].as_str().unwrap().to_string();
    assert!(result_ref.starts_with("/api/v1/panoramas/"));
    assert!(result_ref.ends_with(".jpg"));

    let download = get(app.router.clone(), &result_ref).await;
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()["content-type"], "image/jpeg");
    // The scripted engine copies its first input.
    assert_eq!(body_bytes(download).await, app.catalog_file("left.jpg"));

    let thumbnail_ref = json["thumbnailRef"].as_str().unwrap().to_string();
    assert_eq!(thumbnail_ref, result_ref.replace(".jpg", "_thumb.jpg"));
    let thumbnail = get(app.router.clone(), &thumbnail_ref).await;
    assert_eq!(thumbnail.status(), StatusCode::OK);
    let preview = image::load_from_memory(&body_bytes(thumbnail).await).expect("decode");
    assert_eq!((preview.width(), preview.height()), (800, 200));

    // Workspaces are gone, the published result is not.
    assert_eq!(entries(&app.staging_root()), 0);
    assert_eq!(entries(&app.remote_root()), 0);
}

#[tokio::test]
async fn request_timeout_cancels_and_cleans_up_the_job() {
    let app = TestApp::with_config(STITCH_HANG, |config| config.request_timeout_secs = 2);
    app.add_images(&["a.jpg", "b.jpg"]);

    let response = post_json(
        app.router.clone(),
        "/api/v1/stitch",
        json!({ "panoramaName": "Slow", "sourceRefs": ["a.jpg", "b.jpg"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    // The dropped request cancelled the job; wait for its cleanup.
    assert!(app.state.jobs.shutdown(Duration::from_secs(10)).await);

    let records = app.store.list_recent(10).await.expect("list");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.failure_kind, Some(FailureKind::Cancelled));
    assert!(record.result_ref.is_none());

    assert_eq!(entries(&app.staging_root()), 0);
    assert_eq!(entries(&app.remote_root()), 0);
}

#[tokio::test]
async fn empty_source_refs_fail_with_trace() {
    let app = TestApp::new(STITCH_OK);

    let response = post_json(app.router.clone(), "/api/v1/stitch", json!({ "sourceRefs": [] })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_INPUT");
    assert!(json["jobId"].is_string());
    assert!(!json["trace"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn insufficient_overlap_is_unprocessable() {
    let app = TestApp::new(STITCH_NO_OVERLAP);
    app.add_images(&["sky.jpg", "floor.jpg"]);

    let response = post_json(
        app.router.clone(),
        "/api/v1/stitch",
        json!({ "sourceRefs": ["sky.jpg", "floor.jpg"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = body_json(response).await;
    assert_eq!(json["code"], "INSUFFICIENT_OVERLAP");
    assert!(json["detail"].is_string());
    assert_eq!(entries(&app.remote_root()), 0);
}

#[tokio::test]
async fn missing_sources_are_skipped() {
    let app = TestApp::new(STITCH_OK);
    app.add_images(&["a.jpg", "b.jpg"]);

    let response = post_json(
        app.router.clone(),
        "/api/v1/stitch",
        json!({ "sourceRefs": ["a.jpg", "missing.jpg", "b.jpg"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let trace = json["trace"].as_array().unwrap();
    assert!(trace
        .iter()
        .any(|e| e["message"].as_str().unwrap().contains("missing.jpg")));
}

// ---------------------------------------------------------------------------
// Multipart uploads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_stitches_without_catalog() {
    let app = TestApp::upload_only(STITCH_OK);
    let (content_type, body) = multipart_body(&[
        ("panoramaName", None, "text/plain", b"Ridge"),
        ("files", Some("one.jpg"), "image/jpeg", JPEG_BYTES),
        ("files", Some("two.jpg"), "image/jpeg", JPEG_BYTES),
    ]);

    let response =
        post_multipart(app.router.clone(), "/api/v1/stitch/upload", content_type, body).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["resultRef"].as_str().unwrap().ends_with(".jpg"));
}

#[tokio::test]
async fn upload_rejects_non_image_parts() {
    let app = TestApp::upload_only(STITCH_OK);
    let (content_type, body) = multipart_body(&[
        ("files", Some("one.jpg"), "image/jpeg", JPEG_BYTES),
        ("files", Some("notes.txt"), "text/plain", b"hello"),
    ]);

    let response =
        post_multipart(app.router.clone(), "/api/v1/stitch/upload", content_type, body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("notes.txt"));
    // Nothing was started.
    assert_eq!(entries(&app.staging_root()), 0);
}

// ---------------------------------------------------------------------------
// Background jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn background_job_completes_and_is_listed() {
    let app = TestApp::new(STITCH_OK);
    app.add_images(&["a.jpg", "b.jpg"]);

    let response = post_json(
        app.router.clone(),
        "/api/v1/jobs",
        json!({ "panoramaName": "Valley", "sourceRefs": ["a.jpg", "b.jpg"] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let ack = body_json(response).await;
    let job_id = ack["data"]["jobId"].as_str().unwrap().to_string();
    assert_eq!(ack["data"]["state"], "CREATED");

    let record = wait_for_job(&app, &job_id, |r| r["state"] == "COMPLETE").await;
    assert!(record["resultRef"].as_str().unwrap().contains(&job_id));
    assert!(record["failureKind"].is_null());

    let list = body_json(get(app.router.clone(), "/api/v1/jobs?limit=5").await).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    // Finished jobs cannot be cancelled.
    let cancel = post_empty(app.router.clone(), &format!("/api/v1/jobs/{job_id}/cancel")).await;
    assert_eq!(cancel.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn background_job_can_be_cancelled() {
    let app = TestApp::new(STITCH_HANG);
    app.add_images(&["a.jpg", "b.jpg"]);

    let response = post_json(
        app.router.clone(),
        "/api/v1/jobs",
        json!({ "sourceRefs": ["a.jpg", "b.jpg"] }),
    )
    .await;
    let job_id = body_json(response).await["data"]["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    wait_for_job(&app, &job_id, |r| r["state"] == "PROJECT_CREATED").await;

    let cancel = post_empty(app.router.clone(), &format!("/api/v1/jobs/{job_id}/cancel")).await;
    assert_eq!(cancel.status(), StatusCode::ACCEPTED);

    let record = wait_for_job(&app, &job_id, |r| r["state"] == "FAILED").await;
    assert_eq!(record["failureKind"], "CANCELLED");

    assert!(app.state.jobs.shutdown(Duration::from_secs(5)).await);
    assert_eq!(entries(&app.staging_root()), 0);
    assert_eq!(entries(&app.remote_root()), 0);
}

//! In-process tests of the HTTP surface.
//!
//! The router is driven with `tower::ServiceExt::oneshot`; media decoding,
//! detection and the encoder are replaced by fakes from `helpers`.

mod fixtures;
mod helpers;

use axum::body::Bytes;
use axum::http::{header, StatusCode};
use futures::StreamExt;
use std::time::Duration;

use fixtures::*;
use helpers::*;

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_upload_poll_deliver_and_expire() {
    let gate = Gate::closed();
    let app = spawn_app(&[], FakeBackend::new(4), FakeDetector::gated(gate.clone()));

    let video = ten_megabyte_video();
    let response = send(
        &app.router,
        upload_request(&[("file", Some("clip.mp4"), &video)]),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(is_job_id(&job_id), "unexpected id {job_id}");
    assert_eq!(body["status"], "pending");

    // Detection is held at the gate, so the job is still in flight.
    let uri = format!("/status/{}", job_id);
    let pending = send(&app.router, get(&uri)).await;
    assert_eq!(pending.status, StatusCode::ACCEPTED);
    assert_eq!(pending.json()["status"], "processing");

    gate.open();
    let delivered = poll_while(&app.router, &uri, StatusCode::ACCEPTED, WAIT).await;
    assert_eq!(delivered.status, StatusCode::OK);
    assert_eq!(delivered.headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(delivered.body.as_ref(), &[255u8; 4]);

    // Same bytes on every poll until expiry.
    let again = send(&app.router, get(&uri)).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.body, delivered.body);

    let expired = poll_while(&app.router, &uri, StatusCode::OK, WAIT).await;
    assert_eq!(expired.status, StatusCode::NOT_FOUND);
    assert!(app.state.registry.is_empty());
    let processed = app.state.storage.processed_dir();
    assert!(eventually(|| dir_entries(&processed) == 0, WAIT).await);
    assert_eq!(dir_entries(&app.state.storage.uploads_dir()), 0);
}

#[tokio::test]
async fn test_upload_without_file_part_is_rejected() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());

    let response = send(
        &app.router,
        upload_request(&[("comment", None, b"no file here")]),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.json()["error"].is_string());
    assert_eq!(app.state.registry.len(), 0);
}

#[tokio::test]
async fn test_upload_with_disallowed_extension_is_rejected() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());

    let response = send(
        &app.router,
        upload_request(&[("file", Some("notes.txt"), TEXT_PAYLOAD)]),
    )
    .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(dir_entries(&app.state.storage.uploads_dir()), 0);
    assert!(app.state.registry.is_empty());
}

#[tokio::test]
async fn test_upload_with_empty_filename_or_file_is_rejected() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());

    let no_name = send(&app.router, upload_request(&[("file", Some(""), b"data")])).await;
    assert_eq!(no_name.status, StatusCode::BAD_REQUEST);

    let empty = send(&app.router, upload_request(&[("file", Some("clip.mp4"), b"")])).await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    assert!(app.state.registry.is_empty());
}

#[tokio::test]
async fn test_oversize_upload_is_rejected() {
    let app = spawn_app(
        &[("MAX_UPLOAD_BYTES", "1024")],
        FakeBackend::new(1),
        FakeDetector::new(),
    );

    let video = video_payload(4096);
    let response = send(
        &app.router,
        upload_request(&[("file", Some("clip.mp4"), &video)]),
    )
    .await;

    assert!(response.status.is_client_error(), "got {}", response.status);
    assert!(app.state.registry.is_empty());
    assert_eq!(dir_entries(&app.state.storage.uploads_dir()), 0);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());

    let unknown = format!("/status/{}", "ab".repeat(32));
    assert_eq!(send(&app.router, get(&unknown)).await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        send(&app.router, get("/status/not-a-job")).await.status,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_failed_job_reports_cause_then_expires() {
    let app = spawn_app(&[], FakeBackend::new(2), FakeDetector::failing());

    let response = send(
        &app.router,
        upload_request(&[("file", Some("clip.mp4"), &video_payload(64))]),
    )
    .await;
    let job_id = response.json()["job_id"].as_str().unwrap().to_string();
    let uri = format!("/status/{}", job_id);

    let failed = poll_while(&app.router, &uri, StatusCode::ACCEPTED, WAIT).await;
    assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = failed.json();
    assert_eq!(body["status"], "failed");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("inference backend crashed"));

    let expired = poll_while(&app.router, &uri, StatusCode::INTERNAL_SERVER_ERROR, WAIT).await;
    assert_eq!(expired.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_saving_flag_endpoints() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());

    assert_eq!(send(&app.router, get("/is-saving")).await.json()["saving"], false);

    let started = send(&app.router, post("/start-saving")).await;
    assert_eq!(started.status, StatusCode::OK);
    assert_eq!(started.json()["message"], "Saving started");
    assert_eq!(send(&app.router, get("/is-saving")).await.json()["saving"], true);

    let toggled = send(&app.router, post("/toggle-saving")).await.json();
    assert_eq!(toggled["saving"], false);
    assert_eq!(toggled["message"], "Saving stopped");

    let stopped = send(&app.router, post("/stop-saving")).await;
    assert_eq!(stopped.json()["message"], "Saving stopped");
    assert!(!app.state.toggle.is_saving());
}

#[tokio::test]
async fn test_footage_listing_and_fetch() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());
    let footage_dir = app.state.storage.footage_dir();
    for name in FOOTAGE.names {
        std::fs::write(footage_dir.join(name), name.as_bytes()).unwrap();
    }
    std::fs::write(app.state.storage.raw_segment_dir().join("20250101_000000_000.avi"), b"raw").unwrap();

    let listing = send(&app.router, get("/footages")).await;
    assert_eq!(listing.status, StatusCode::OK);
    let names: Vec<String> = serde_json::from_slice(&listing.body).unwrap();
    assert_eq!(names, FOOTAGE.expected_order);

    let name = FOOTAGE.names[0];
    let fetched = send(&app.router, get(&format!("/footages/{}", name))).await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body.as_ref(), name.as_bytes());

    let missing = send(&app.router, get("/footages/20990101_000000_000.mp4")).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    let traversal = send(&app.router, get("/footages/..%2Fsecret.mp4")).await;
    assert_eq!(traversal.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_live_segment_becomes_footage() {
    let app = spawn_app(
        &[
            ("STREAM_URL", "fake://camera"),
            ("SAVING_ENABLED", "true"),
            ("ABSENCE_THRESHOLD", "3"),
            ("FRAME_STRIDE", "1"),
        ],
        FakeBackend::with_live(1, LIVE_PRESENCE),
        FakeDetector::new(),
    );

    // The raw segment is removed only after the encoder has exited.
    let footage_dir = app.state.storage.footage_dir();
    let raw_dir = app.state.storage.raw_segment_dir();
    assert!(
        eventually(
            || dir_entries(&raw_dir) == 0 && dir_entries(&footage_dir) > 1,
            WAIT
        )
        .await
    );

    let listing = send(&app.router, get("/footages")).await;
    let names: Vec<String> = serde_json::from_slice(&listing.body).unwrap();
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with(".mp4"));

    // Three present frames plus two absent ones before the threshold.
    let fetched = send(&app.router, get(&format!("/footages/{}", names[0]))).await;
    assert_eq!(fetched.body.as_ref(), &[255, 255, 255, 0, 0]);
    assert!(!app.state.toggle.is_live_available());
}

#[tokio::test]
async fn test_video_feed_unavailable_without_stream() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());

    let response = send(&app.router, get("/video")).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    let raw = send(&app.router, get("/live")).await;
    assert_eq!(raw.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_video_feed_streams_published_frames() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());
    app.state.toggle.set_live_available(true);

    for (uri, channel) in [("/video", &app.state.preview), ("/live", &app.state.raw_preview)] {
        let (status, headers, mut body) = open_stream(&app.router, get(uri)).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        channel.send(Bytes::from_static(JPEG_FRAME)).unwrap();
        let part = tokio::time::timeout(WAIT, body.next())
            .await
            .expect("no frame arrived")
            .expect("stream ended")
            .unwrap();
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(part.windows(JPEG_FRAME.len()).any(|w| w == JPEG_FRAME));
    }
}

#[tokio::test]
async fn test_video_feed_ends_when_capture_stops() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());
    app.state.toggle.set_live_available(true);

    let (status, _headers, mut body) = open_stream(&app.router, get("/video")).await;
    assert_eq!(status, StatusCode::OK);

    app.state.toggle.set_live_available(false);
    let next = tokio::time::timeout(WAIT, body.next())
        .await
        .expect("viewer still waiting after capture stopped");
    assert!(next.is_none());
}

#[tokio::test]
async fn test_unreachable_stream_leaves_uploads_working() {
    // No live frames scripted: opening the camera fails.
    let app = spawn_app(
        &[("STREAM_URL", "fake://camera")],
        FakeBackend::new(1),
        FakeDetector::new(),
    );
    if let Some(live) = app.tasks.live {
        assert!(live.await.unwrap().is_none());
    }
    assert!(!app.state.toggle.is_live_available());

    let response = send(
        &app.router,
        upload_request(&[("file", Some("clip.mp4"), &video_payload(16))]),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let app = spawn_app(&[], FakeBackend::new(1), FakeDetector::new());

    let health = send(&app.router, get("/health")).await;
    assert_eq!(health.status, StatusCode::OK);
    let body = health.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["storage"]["status"], "ok");
    assert_eq!(body["checks"]["live"]["status"], "unavailable");

    let metrics = send(&app.router, get("/metrics")).await;
    assert_eq!(metrics.status, StatusCode::OK);
}

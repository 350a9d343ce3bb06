//! Integration tests for the extract endpoint.

mod common;

use std::time::Duration;

use axum::http::{header, StatusCode};
use common::{
    body_bytes, body_json, eventually, mkv_bytes, png_bytes, zip_entries, FakeTranscoder, TestApp,
};
use http_body_util::BodyExt;

fn extract_body(file: &str, mimetype: &str, fps: f64) -> serde_json::Value {
    serde_json::json!({"file": file, "mimetype": mimetype, "fps": fps})
}

#[tokio::test]
async fn frames_are_numbered_in_order() {
    let app = TestApp::new(FakeTranscoder {
        frames: 10,
        ..Default::default()
    });
    let token = app.login().await;
    let file = app.put_file("clips/movie.mkv", &mkv_bytes());

    let response = app
        .post_json(&token, "/api/extract", extract_body(&file, "image/jpeg", 2.0))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );

    let entries = zip_entries(&body_bytes(response).await);
    let names: Vec<String> = entries.iter().map(|(n, _)| n.clone()).collect();
    let expected: Vec<String> = (1..=10).map(|i| format!("img{i}.jpeg")).collect();
    assert_eq!(names, expected);

    for (name, data) in &entries {
        assert_eq!(
            image::guess_format(data).unwrap(),
            image::ImageFormat::Jpeg,
            "{name}"
        );
    }

    assert_eq!(app.fake.calls(), 1);
    assert!(!app.exists(&file));
}

#[tokio::test]
async fn no_frames_gives_empty_archive() {
    let app = TestApp::new(FakeTranscoder::default());
    let token = app.login().await;
    let file = app.put_file("empty.mkv", &mkv_bytes());

    let response = app
        .post_json(&token, "/api/extract", extract_body(&file, "image/png", 1.0))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(zip_entries(&body_bytes(response).await).is_empty());
    assert!(!app.exists(&file));
}

#[tokio::test]
async fn invalid_parameters_are_rejected() {
    let app = TestApp::new(FakeTranscoder::default());
    let token = app.login().await;
    let video = app.put_file("movie.mkv", &mkv_bytes());
    let still = app.put_file("still.png", &png_bytes(1));

    for body in [
        extract_body(&video, "image/png", 0.0),
        extract_body(&video, "image/png", -1.0),
        extract_body(&video, "image/bmp", 1.0),
        extract_body(&still, "image/png", 1.0),
        extract_body("../movie.mkv", "image/png", 1.0),
    ] {
        let response = app.post_json(&token, "/api/extract", body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
    }

    assert!(app.exists(&video));
    assert!(app.exists(&still));
    assert_eq!(app.fake.calls(), 0);
}

#[tokio::test]
async fn missing_video_is_not_found() {
    let app = TestApp::new(FakeTranscoder::default());
    let token = app.login().await;

    let response = app
        .post_json(&token, "/api/extract", extract_body("nope.mkv", "image/png", 1.0))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn immediate_decode_failure_is_server_error() {
    let app = TestApp::new(FakeTranscoder {
        fail_on: Some("corrupt".to_string()),
        frames: 5,
        ..Default::default()
    });
    let token = app.login().await;
    let file = app.put_file("corrupt.mkv", &mkv_bytes());

    let response = app
        .post_json(&token, "/api/extract", extract_body(&file, "image/png", 1.0))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["code"], "decode_error");
    assert!(!app.exists(&file));
}

#[tokio::test]
async fn late_failure_truncates_stream() {
    let app = TestApp::new(FakeTranscoder {
        frames: 10,
        fail_after: Some(3),
        ..Default::default()
    });
    let token = app.login().await;
    let file = app.put_file("flaky.mkv", &mkv_bytes());

    let response = app
        .post_json(&token, "/api/extract", extract_body(&file, "image/png", 1.0))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(response.into_body().collect().await.is_err());
    assert!(eventually(|| !app.exists(&file)).await);
}

#[tokio::test]
async fn client_disconnect_stops_decoder_and_cleans_up() {
    let app = TestApp::new(FakeTranscoder {
        endless: true,
        delay: Duration::from_millis(5),
        ..Default::default()
    });
    let token = app.login().await;
    let file = app.put_file("live.mkv", &mkv_bytes());

    let response = app
        .post_json(&token, "/api/extract", extract_body(&file, "image/png", 30.0))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Read a little, then walk away.
    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap();
    assert!(first.is_data());
    drop(body);

    assert!(eventually(|| app.fake.was_dropped()).await);
    assert!(eventually(|| !app.exists(&file)).await);
}

#[tokio::test]
async fn unread_body_stalls_decoder() {
    let app = TestApp::new(FakeTranscoder {
        endless: true,
        ..Default::default()
    });
    let token = app.login().await;
    let file = app.put_file("stream.mkv", &mkv_bytes());

    let response = app
        .post_json(&token, "/api/extract", extract_body(&file, "image/png", 30.0))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Nobody reads the body, so the pipe fills and the writer stops pulling.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let stalled = app.fake.pulled();
    assert!(stalled > 0);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(app.fake.pulled(), stalled);
    assert!(app.exists(&file));

    drop(response);
    assert!(eventually(|| app.fake.was_dropped()).await);
    assert!(eventually(|| !app.exists(&file)).await);
}

//! Shared test harness for integration tests.
//!
//! Provides [`TestApp`], a full [`AppContext`] over a temporary upload
//! directory with a scripted [`FakeTranscoder`] in place of ffmpeg, plus
//! image fixtures and request helpers for driving the router with
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use bytes::Bytes;
use http_body_util::BodyExt;
use mediabatch::config::{Config, UserConfig};
use mediabatch::server::{create_router, AppContext};
use mediabatch_av::{FrameSource, TranscodeMode, Transcoder};
use mediabatch_common::{Error, ImageFormat, Result};
use tempfile::TempDir;
use tower::ServiceExt;

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "correct-horse";

/// Encode a small solid image in `format`. `shade` varies the pixels so
/// fixtures differ byte-wise.
pub fn encoded_image(format: image::ImageFormat, shade: u8) -> Vec<u8> {
    let img = image::RgbImage::from_fn(8, 8, |x, y| {
        image::Rgb([shade, (x * 16) as u8, (y * 16) as u8])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

pub fn png_bytes(shade: u8) -> Vec<u8> {
    encoded_image(image::ImageFormat::Png, shade)
}

pub fn jpeg_bytes(shade: u8) -> Vec<u8> {
    encoded_image(image::ImageFormat::Jpeg, shade)
}

/// Leading bytes of a Matroska file; enough to sniff as video.
pub fn mkv_bytes() -> Vec<u8> {
    let mut data = vec![0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01];
    data.extend_from_slice(b"matroska");
    data.resize(512, 0);
    data
}

fn target_image_format(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Webp => image::ImageFormat::WebP,
    }
}

/// Scripted stand-in for ffmpeg.
///
/// Re-encodes produce a real image in the target format. Video sources
/// yield `frames` images (or never end when `endless` is set).
#[derive(Default)]
pub struct FakeTranscoder {
    /// Sources whose path contains this substring fail to decode.
    pub fail_on: Option<String>,
    /// Time spent per re-encode or per frame.
    pub delay: Duration,
    /// Frames produced per video.
    pub frames: usize,
    /// Fail a video after this many frames.
    pub fail_after: Option<usize>,
    pub endless: bool,

    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    /// Set once a video frame source is dropped.
    pub dropped: Arc<AtomicBool>,
    /// Video frames handed out so far.
    pub pulled: Arc<AtomicUsize>,
    pub sources: Mutex<Vec<PathBuf>>,
}

impl FakeTranscoder {
    fn should_fail(&self, source: &Path) -> bool {
        self.fail_on
            .as_deref()
            .is_some_and(|needle| source.to_string_lossy().contains(needle))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        format: ImageFormat,
        mode: TranscodeMode,
    ) -> Result<Box<dyn FrameSource>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(source.to_path_buf());

        let (remaining, fail_after) = match mode {
            TranscodeMode::Image => (Some(1), None),
            TranscodeMode::Video { .. } if self.should_fail(source) => (Some(1), Some(0)),
            TranscodeMode::Video { .. } if self.endless => (None, None),
            TranscodeMode::Video { .. } => (Some(self.frames), self.fail_after),
        };

        Ok(Box::new(FakeFrames {
            source: source.to_path_buf(),
            format,
            remaining,
            fail_after,
            produced: 0,
            delay: self.delay,
            dropped: Arc::clone(&self.dropped),
            pulled: Arc::clone(&self.pulled),
        }))
    }

    async fn transcode_image(&self, source: &Path, format: ImageFormat) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(source.to_path_buf());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail(source) {
            return Err(Error::decode(source, "invalid data found when processing input"));
        }
        Ok(Bytes::from(encoded_image(target_image_format(format), 200)))
    }
}

struct FakeFrames {
    source: PathBuf,
    format: ImageFormat,
    remaining: Option<usize>,
    fail_after: Option<usize>,
    produced: usize,
    delay: Duration,
    dropped: Arc<AtomicBool>,
    pulled: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSource for FakeFrames {
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_after == Some(self.produced) {
            self.remaining = Some(0);
            self.fail_after = None;
            return Err(Error::decode(&self.source, "moov atom not found"));
        }
        match self.remaining {
            Some(0) => return Ok(None),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        self.produced += 1;
        self.pulled.fetch_add(1, Ordering::SeqCst);
        let shade = (self.produced % 251) as u8;
        Ok(Some(Bytes::from(encoded_image(
            target_image_format(self.format),
            shade,
        ))))
    }
}

impl Drop for FakeFrames {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// A router context over a temporary upload directory.
pub struct TestApp {
    pub ctx: AppContext,
    pub fake: Arc<FakeTranscoder>,
    pub dir: TempDir,
}

impl TestApp {
    pub fn new(fake: FakeTranscoder) -> Self {
        Self::with_concurrency(fake, 10)
    }

    pub fn with_concurrency(fake: FakeTranscoder, max_concurrency: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let mut config = Config::default();
        config.storage.upload_dir = dir.path().to_path_buf();
        config.jobs.max_concurrency = max_concurrency;
        config.jobs.archive_buffer_bytes = 4096;
        config.auth.users.push(UserConfig {
            username: USERNAME.to_string(),
            password_hash: bcrypt::hash(PASSWORD, 4).unwrap(),
        });

        let fake = Arc::new(fake);
        let transcoder: Arc<dyn Transcoder> = fake.clone();
        let ctx = AppContext::new(config, transcoder);

        Self { ctx, fake, dir }
    }

    /// The owner's namespace directory.
    pub fn owner_dir(&self) -> PathBuf {
        self.dir.path().join(USERNAME)
    }

    /// Place a file in the owner's namespace and return its reference.
    pub fn put_file(&self, reference: &str, data: &[u8]) -> String {
        let path = self.owner_dir().join(reference);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, data).unwrap();
        reference.to_string()
    }

    pub fn exists(&self, reference: &str) -> bool {
        self.owner_dir().join(reference).exists()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        create_router(self.ctx.clone()).oneshot(request).await.unwrap()
    }

    /// Log in as the configured user and return the token.
    pub async fn login(&self) -> String {
        let response = self
            .send(json_request(
                "/api/login",
                None,
                serde_json::json!({"username": USERNAME, "password": PASSWORD}),
            ))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        json["token"].as_str().unwrap().to_string()
    }

    /// POST JSON to an authenticated endpoint.
    pub async fn post_json(&self, token: &str, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.send(json_request(uri, Some(token), body)).await
    }
}

pub fn json_request(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Entries of a zip archive, in archive order.
pub fn zip_entries(data: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut zip = zip::ZipArchive::new(Cursor::new(data)).unwrap();
    (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).unwrap();
            let mut content = Vec::new();
            file.read_to_end(&mut content).unwrap();
            (file.name().to_string(), content)
        })
        .collect()
}

/// Poll `condition` for up to five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

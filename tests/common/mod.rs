#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use exif::{Field, In, Rational, Tag, Value as ExifValue};
use http_body_util::BodyExt;
use serde_json::Value;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use mediahost::config::rate_limits::UploadRateLimit;
use mediahost::config::{AppConfig, VideoToolConfig};
use mediahost::infra::disk::{DiskGuard, SpaceProbe};
use mediahost::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const TEST_API_KEY: &str = "test-api-key-12345";
pub const PUBLIC_BASE_URL: &str = "http://media.test";
const BOUNDARY: &str = "mediahost-test-boundary";

/// Plenty of room unless a test says otherwise.
pub const ROOMY_DISK: FixedSpace = FixedSpace {
    total: 100 * 1024 * 1024 * 1024,
    free: 50 * 1024 * 1024 * 1024,
};

// ---------------------------------------------------------------------------
// Disk probes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct FixedSpace {
    pub total: u64,
    pub free: u64,
}

impl SpaceProbe for FixedSpace {
    fn available(&self) -> io::Result<u64> {
        Ok(self.free)
    }

    fn total(&self) -> io::Result<u64> {
        Ok(self.total)
    }
}

pub struct BrokenProbe;

impl SpaceProbe for BrokenProbe {
    fn available(&self) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Other, "statvfs failed"))
    }

    fn total(&self) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Other, "statvfs failed"))
    }
}

// ---------------------------------------------------------------------------
// TestApp: one isolated storage root per test
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub root: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body_bytes
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }

    pub fn error_code(&self) -> String {
        self.json()["code"].as_str().unwrap_or("").to_string()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

pub fn test_config(root: &Path) -> AppConfig {
    AppConfig {
        http_addr: "127.0.0.1:0".to_string(),
        storage_root: root.to_path_buf(),
        public_base_url: PUBLIC_BASE_URL.to_string(),
        api_key: None,
        upload_max_bytes: 10 * 1024 * 1024,
        min_free_space_bytes: 1024 * 1024 * 1024,
        video_space_multiplier: 3.0,
        upload_rate_limit: UploadRateLimit::default(),
        cors_allowed_origins: Vec::new(),
        video: VideoToolConfig {
            probe_timeout: Duration::from_secs(15),
            transcode_timeout: Duration::from_secs(120),
            preset: "ultrafast".to_string(),
            ..VideoToolConfig::default()
        },
    }
}

pub async fn app() -> TestApp {
    TestApp::build(|_| {}, ROOMY_DISK).await
}

pub async fn app_with_key() -> TestApp {
    TestApp::build(|config| config.api_key = Some(TEST_API_KEY.to_string()), ROOMY_DISK).await
}

impl TestApp {
    /// Builds state through `AppState::from_config` like `main`, then swaps in
    /// a deterministic disk probe.
    pub async fn build(configure: impl FnOnce(&mut AppConfig), probe: impl SpaceProbe + 'static) -> Self {
        let root = TempDir::new().expect("failed to create temp dir");
        let mut config = test_config(root.path());
        configure(&mut config);

        let mut state = AppState::from_config(&config)
            .await
            .expect("failed to build AppState");
        state.disk = DiskGuard::new(Arc::new(probe), config.min_free_space_bytes);

        let router = mediahost::http::router(state.clone());
        TestApp {
            router,
            state,
            root,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse {
            status,
            headers,
            body_bytes,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, path, None, token).await
    }

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> TestResponse {
        self.request(Method::POST, path, Some(body), token).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::DELETE, path, None, token).await
    }

    /// POST /upload with a single `file` part.
    pub async fn upload(&self, filename: &str, bytes: &[u8], token: Option<&str>) -> TestResponse {
        self.upload_field("file", filename, bytes, token).await
    }

    pub async fn upload_field(
        &self,
        field: &str,
        filename: &str,
        bytes: &[u8],
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = builder
            .body(Body::from(multipart_body(field, filename, bytes)))
            .unwrap();
        self.send(request).await
    }
}

pub fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A gradient so that distinct seeds give distinct content hashes.
pub fn jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let image = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x % 256) as u8 ^ seed,
            (y % 256) as u8,
            seed.wrapping_mul(31),
        ])
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .expect("jpeg encode failed");
    out.into_inner()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 200, 30, 255]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("png encode failed");
    out.into_inner()
}

fn rational(num: u32, denom: u32) -> Rational {
    Rational { num, denom }
}

fn ascii(value: &str) -> ExifValue {
    ExifValue::Ascii(vec![value.as_bytes().to_vec()])
}

/// Oslo: 59°55'27"N 10°45'30"E, 23 m, shot on a fictional camera.
pub fn oslo_exif_fields() -> Vec<Field> {
    let field = |tag, value| Field {
        tag,
        ifd_num: In::PRIMARY,
        value,
    };
    vec![
        field(Tag::Make, ascii("Acme")),
        field(Tag::Model, ascii("Shooter 3000")),
        field(Tag::DateTimeOriginal, ascii("2023:06:21 14:30:05")),
        field(Tag::FNumber, ExifValue::Rational(vec![rational(28, 10)])),
        field(Tag::FocalLength, ExifValue::Rational(vec![rational(35, 1)])),
        field(Tag::ExposureTime, ExifValue::Rational(vec![rational(1, 250)])),
        field(Tag::PhotographicSensitivity, ExifValue::Short(vec![400])),
        field(Tag::GPSLatitudeRef, ascii("N")),
        field(
            Tag::GPSLatitude,
            ExifValue::Rational(vec![rational(59, 1), rational(55, 1), rational(27, 1)]),
        ),
        field(Tag::GPSLongitudeRef, ascii("E")),
        field(
            Tag::GPSLongitude,
            ExifValue::Rational(vec![rational(10, 1), rational(45, 1), rational(30, 1)]),
        ),
        field(Tag::GPSAltitudeRef, ExifValue::Byte(vec![0])),
        field(Tag::GPSAltitude, ExifValue::Rational(vec![rational(23, 1)])),
    ]
}

/// Serializes the fields into a TIFF block and splices it into the JPEG as an
/// APP1 segment right after SOI.
pub fn with_exif(jpeg: &[u8], fields: &[Field]) -> Vec<u8> {
    let mut writer = exif::experimental::Writer::new();
    for field in fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).expect("exif write failed");
    let tiff = tiff.into_inner();

    splice_app1(jpeg, &tiff)
}

/// APP1 "Exif" segment carrying an arbitrary payload.
pub fn splice_app1(jpeg: &[u8], payload: &[u8]) -> Vec<u8> {
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "not a JPEG");
    let segment_len = (2 + 6 + payload.len()) as u16;

    let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 10);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(payload);
    out.extend_from_slice(&jpeg[2..]);
    out
}

pub fn oslo_jpeg(width: u32, height: u32) -> Vec<u8> {
    with_exif(&jpeg(width, height, 7), &oslo_exif_fields())
}

// ---------------------------------------------------------------------------
// External tools
// ---------------------------------------------------------------------------

pub fn tool_available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("-version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// ffmpeg with the encoders the transcoder relies on, plus ffprobe.
pub fn ffmpeg_ready() -> bool {
    if !tool_available("ffprobe") || !tool_available("ffmpeg") {
        return false;
    }
    std::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .map(|output| String::from_utf8_lossy(&output.stdout).contains("libx264"))
        .unwrap_or(false)
}

/// Renders a short synthetic clip with ffmpeg's lavfi test source.
pub fn render_clip(dir: &Path, name: &str, width: u32, height: u32, codec_args: &[&str]) -> PathBuf {
    let output = dir.join(name);
    let size = format!("testsrc=duration=1:size={}x{}:rate=25", width, height);
    let status = std::process::Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "lavfi", "-i", &size])
        .args(codec_args)
        .arg(&output)
        .status()
        .expect("failed to run ffmpeg");
    assert!(status.success(), "ffmpeg failed to render {}", name);
    output
}

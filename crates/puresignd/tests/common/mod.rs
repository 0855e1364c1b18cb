#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::{Rgb, RgbImage};
use puresign_core::codec;
use puresignd::api::{self, AppState};
use puresignd::config::DEFAULT_MAX_UPLOAD;
use puresignd::records::{Profile, SqliteRecordStore};
use puresignd::storage::{LocalObjectStore, ObjectStore, StorageError};
use puresignd::{spawn_engine, InferencePipeline, Models};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "puresign-test-boundary";

/// Local object store that counts uploads and can be told to fail on a path prefix.
pub struct RecordingStore {
    inner: LocalObjectStore,
    uploads: AtomicUsize,
    fail_prefix: Option<String>,
}

impl RecordingStore {
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn upload(&self, bytes: &[u8], path: &str) -> Result<String, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if let Some(prefix) = &self.fail_prefix {
            if path.starts_with(prefix.as_str()) {
                return Err(StorageError::Upload {
                    path: path.to_string(),
                    reason: "bucket unavailable".to_string(),
                });
            }
        }
        self.inner.upload(bytes, path).await
    }

    async fn download(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.download(location).await
    }
}

pub struct TestApp {
    pub router: Router,
    pub records: Arc<SqliteRecordStore>,
    pub store: Arc<RecordingStore>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None, DEFAULT_MAX_UPLOAD).await
    }

    pub async fn with_failing_prefix(fail_prefix: Option<&str>) -> Self {
        Self::build(fail_prefix, DEFAULT_MAX_UPLOAD).await
    }

    pub async fn with_max_upload(max_upload: usize) -> Self {
        Self::build(None, max_upload).await
    }

    /// Build the app over SQLite and a temp dir; uploads under `fail_prefix` error out.
    pub async fn build(fail_prefix: Option<&str>, max_upload: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordingStore {
            inner: LocalObjectStore::new(dir.path(), Some("http://files.test".into())),
            uploads: AtomicUsize::new(0),
            fail_prefix: fail_prefix.map(String::from),
        });
        let records = Arc::new(SqliteRecordStore::open_in_memory().await.unwrap());
        let engine = spawn_engine(Models::fallback(), 4).unwrap();

        let state = AppState {
            records: records.clone(),
            store: store.clone(),
            pipeline: InferencePipeline::new(engine, store.clone()),
            max_upload,
        };

        Self {
            router: api::router(state),
            records,
            store,
            _dir: dir,
        }
    }

    /// Provision a profile whose reference signature is already in the store.
    pub async fn add_profile(&self, user_id: &str) {
        let path = format!("references/{user_id}.jpg");
        let reference = codec::encode_jpeg(&signature_page(160, 60)).unwrap();
        self.store.inner.upload(&reference, &path).await.unwrap();
        self.records
            .put_profile(Profile {
                id: user_id.to_string(),
                user_name: Some("Test User".to_string()),
                reference_sig_url: path,
                created_at: None,
                updated_at: None,
            })
            .await
            .unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }
}

/// White page with a dark stroke across the middle.
pub fn signature_page(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        let stroke = h / 2 + (x / 8) % 5;
        if y.abs_diff(stroke) < 2 {
            Rgb([25, 25, 40])
        } else {
            Rgb([248, 248, 245])
        }
    })
}

pub fn document_jpeg() -> Vec<u8> {
    codec::encode_jpeg(&signature_page(240, 120)).unwrap()
}

/// A PNG of hashed noise, which barely compresses: about `3 * side * side` bytes.
pub fn noisy_png(side: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(side, side, |x, y| {
        let h = (x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263)).wrapping_mul(1_274_126_177);
        let h = h ^ (h >> 15);
        Rgb([h as u8, (h >> 8) as u8, (h >> 16) as u8])
    });
    let mut bytes = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// A multipart/form-data body with optional `user_id` and `file` parts.
pub fn multipart_body(user_id: Option<&str>, file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(user_id) = user_id {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"user_id\"\r\n\r\n{user_id}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn verify_request(body: Vec<u8>) -> Request<Body> {
    Request::post("/verify")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

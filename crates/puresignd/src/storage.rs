//! Object store clients: upload blobs under a bucket path, download by path or URL.

use crate::supabase::{check_status, SupabaseClient};
use async_trait::async_trait;
use reqwest::Method;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Content type declared for every upload, whatever the payload encoding.
const UPLOAD_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to upload file {path}: {reason}")]
    Upload { path: String, reason: String },
    #[error("failed to download file {location}: {reason}")]
    Download { location: String, reason: String },
    #[error("invalid object path: {0}")]
    InvalidPath(String),
}

/// Where a blob lives: a direct URL or a path relative to the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobLocation<'a> {
    Url(&'a str),
    Path(&'a str),
}

impl<'a> BlobLocation<'a> {
    pub fn parse(location: &'a str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::Url(location)
        } else {
            Self::Path(location)
        }
    }
}

/// Blob storage used for documents, crops, and reference signatures.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `path`, replacing any existing object. Returns the public URL.
    async fn upload(&self, bytes: &[u8], path: &str) -> Result<String, StorageError>;

    /// Fetch an object by absolute URL or bucket-relative path.
    async fn download(&self, location: &str) -> Result<Vec<u8>, StorageError>;
}

async fn fetch_url(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, StorageError> {
    let download_err = |reason: String| StorageError::Download {
        location: url.to_string(),
        reason,
    };
    let response = http.get(url).send().await.map_err(|e| download_err(e.to_string()))?;
    let response = response
        .error_for_status()
        .map_err(|e| download_err(e.to_string()))?;
    let bytes = response.bytes().await.map_err(|e| download_err(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Supabase Storage bucket.
pub struct SupabaseStorage {
    client: SupabaseClient,
}

impl SupabaseStorage {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    fn object_path(&self, path: &str) -> String {
        format!("/storage/v1/object/{}/{}", self.client.bucket(), path)
    }

    pub fn public_url(&self, path: &str) -> String {
        self.client
            .endpoint(&format!("/storage/v1/object/public/{}/{}", self.client.bucket(), path))
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn upload(&self, bytes: &[u8], path: &str) -> Result<String, StorageError> {
        let upload_err = |reason: String| StorageError::Upload {
            path: path.to_string(),
            reason,
        };

        let response = self
            .client
            .request(Method::POST, &self.object_path(path))
            .header(reqwest::header::CONTENT_TYPE, UPLOAD_CONTENT_TYPE)
            .header("x-upsert", "true")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| upload_err(e.to_string()))?;
        check_status(response)
            .await
            .map_err(|(status, body)| upload_err(format!("HTTP {status}: {body}")))?;

        tracing::debug!(path, size = bytes.len(), "uploaded object");
        Ok(self.public_url(path))
    }

    async fn download(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        let path = match BlobLocation::parse(location) {
            BlobLocation::Url(url) => {
                let response = self.client.get_url(url).send().await.map_err(|e| StorageError::Download {
                    location: url.to_string(),
                    reason: e.to_string(),
                })?;
                return read_body(location, response).await;
            }
            BlobLocation::Path(path) => path,
        };

        let response = self
            .client
            .request(Method::GET, &self.object_path(path))
            .send()
            .await
            .map_err(|e| StorageError::Download {
                location: location.to_string(),
                reason: e.to_string(),
            })?;
        read_body(location, response).await
    }
}

async fn read_body(location: &str, response: reqwest::Response) -> Result<Vec<u8>, StorageError> {
    let download_err = |reason: String| StorageError::Download {
        location: location.to_string(),
        reason,
    };
    let response = check_status(response)
        .await
        .map_err(|(status, body)| download_err(format!("HTTP {status}: {body}")))?;
    let bytes = response.bytes().await.map_err(|e| download_err(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Filesystem-backed store rooted at a directory.
///
/// Public URLs are `{public_base_url}/{path}`; downloads of such URLs are
/// served from disk, other absolute URLs are fetched over HTTP.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
    http: reqwest::Client,
}

impl LocalObjectStore {
    /// Create the store, defaulting public URLs to `file://{root}`.
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        let root = root.into();
        let public_base_url = public_base_url
            .unwrap_or_else(|| format!("file://{}", root.display()))
            .trim_end_matches('/')
            .to_string();
        Self {
            root,
            public_base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path)
    }

    /// Resolve a bucket path to a file under the root, rejecting traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        let valid = !path.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, bytes: &[u8], path: &str) -> Result<String, StorageError> {
        let file = self.resolve(path)?;
        let upload_err = |e: std::io::Error| StorageError::Upload {
            path: path.to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(upload_err)?;
        }
        tokio::fs::write(&file, bytes).await.map_err(upload_err)?;

        tracing::debug!(path, size = bytes.len(), "stored object");
        Ok(self.public_url(path))
    }

    async fn download(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        let own_prefix = format!("{}/", self.public_base_url);
        let path = match location.strip_prefix(&own_prefix) {
            Some(path) => path,
            None => match BlobLocation::parse(location) {
                BlobLocation::Url(url) => return fetch_url(&self.http, url).await,
                BlobLocation::Path(path) => path,
            },
        };

        let file = self.resolve(path)?;
        tokio::fs::read(&file).await.map_err(|e| StorageError::Download {
            location: location.to_string(),
            reason: e.to_string(),
        })
    }
}

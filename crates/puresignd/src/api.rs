//! HTTP surface: liveness, verification, history, and profile lookup.

use crate::pipeline::{InferencePipeline, PipelineOutput};
use crate::records::{RecordError, RecordStore, VerificationRecord, VerificationUpdate};
use crate::storage::{ObjectStore, StorageError};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use puresign_core::VerificationStatus;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use uuid::Uuid;

/// Errors returned to HTTP callers as `{"detail": ...}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(e.body_text())
        } else {
            Self::BadRequest(e.body_text())
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(e: RecordError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Shared handler state. All services are constructed by the caller and injected.
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<dyn RecordStore>,
    pub store: Arc<dyn ObjectStore>,
    pub pipeline: InferencePipeline,
    /// Largest accepted request body in bytes.
    pub max_upload: usize,
}

pub fn router(state: AppState) -> Router {
    let max_upload = state.max_upload;
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/verify", post(verify))
        .route("/verifications/:user_id", get(verifications))
        .route("/profile/:user_id", get(profile))
        .layer(DefaultBodyLimit::max(max_upload))
        .with_state(state)
}

/// CORS for the browser frontend. Credentials are allowed, so methods and
/// headers mirror the request instead of using wildcards.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "PureSign API is running" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

#[derive(Debug, Default, Deserialize)]
struct VerifyParams {
    user_id: Option<String>,
    local_processing: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub verification_id: String,
    pub detected_sig_url: Option<String>,
    pub cleaned_sig_url: Option<String>,
    pub confidence_score: f32,
    pub status: VerificationStatus,
    pub timestamp: String,
}

/// An uploaded document from the `file` multipart field.
struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Keep only the final path component so uploads cannot escape their prefix.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." {
        "upload.jpg".to_string()
    } else {
        base.to_string()
    }
}

async fn verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
    mut multipart: Multipart,
) -> Result<Json<VerificationResponse>, ApiError> {
    let mut user_id = params.user_id;
    let mut local_processing = params.local_processing.as_deref().map(parse_flag).unwrap_or(false);
    let mut upload = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = sanitize_filename(field.file_name().unwrap_or_default());
                let bytes = field.bytes().await?;
                upload = Some(Upload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            Some("user_id") => {
                user_id = Some(field.text().await?);
            }
            Some("local_processing") => {
                let text = field.text().await?;
                local_processing = parse_flag(&text);
            }
            _ => {}
        }
    }

    let user_id = user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("user_id is required".into()))?;
    let upload = upload.ok_or_else(|| ApiError::BadRequest("file is required".into()))?;
    tracing::info!(user_id = %user_id, local_processing, filename = %upload.filename, "verify requested");

    let profile = state
        .records
        .profile(&user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User profile not found".into()))?;

    let verification_id = Uuid::new_v4().to_string();
    let original_doc_url = state
        .store
        .upload(&upload.bytes, &format!("original_docs/{verification_id}_{}", upload.filename))
        .await?;

    let record = VerificationRecord {
        id: verification_id.clone(),
        user_id: user_id.clone(),
        status: VerificationStatus::Processing,
        original_doc_url,
        cleaned_sig_url: None,
        confidence_score: None,
        timestamp: Utc::now(),
    };
    state.records.insert_verification(&record).await?;
    tracing::debug!(verification_id = %verification_id, "record created");

    match complete(&state, &verification_id, &upload.bytes, &profile.reference_sig_url).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            tracing::error!(verification_id = %verification_id, error = %e, "verification failed");
            if let Err(mark_err) = state
                .records
                .update_verification(&verification_id, &VerificationUpdate::failed())
                .await
            {
                tracing::warn!(verification_id = %verification_id, error = %mark_err, "could not mark verification failed");
            }
            Err(e)
        }
    }
}

/// Everything after the record exists: run the pipeline, store outputs, finalize the record.
async fn complete(
    state: &AppState,
    verification_id: &str,
    document: &[u8],
    reference_path: &str,
) -> Result<VerificationResponse, ApiError> {
    let PipelineOutput {
        detected_jpeg,
        cleaned_jpeg,
        confidence_score,
        ..
    } = state
        .pipeline
        .process(document, reference_path, verification_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let detected_url = state
        .store
        .upload(&detected_jpeg, &format!("detected/{verification_id}_detected.jpg"))
        .await?;
    let cleaned_url = state
        .store
        .upload(&cleaned_jpeg, &format!("cleaned/{verification_id}_cleaned.jpg"))
        .await?;

    let status = VerificationStatus::from_score(confidence_score);
    state
        .records
        .update_verification(
            verification_id,
            &VerificationUpdate {
                status,
                cleaned_sig_url: Some(cleaned_url.clone()),
                confidence_score: Some(confidence_score),
            },
        )
        .await?;
    tracing::info!(verification_id, confidence_score, %status, "verification complete");

    Ok(VerificationResponse {
        verification_id: verification_id.to_string(),
        detected_sig_url: Some(detected_url),
        cleaned_sig_url: Some(cleaned_url),
        confidence_score,
        status,
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn verifications(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let records = state.records.verifications_for(&user_id).await?;
    Ok(Json(json!({ "verifications": records })))
}

async fn profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = state
        .records
        .profile(&user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Profile not found".into()))?;
    Ok(Json(json!({ "profile": profile })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("scan.jpg"), "scan.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\docs\\contract.png"), "contract.png");
        assert_eq!(sanitize_filename(""), "upload.jpg");
        assert_eq!(sanitize_filename("dir/.."), "upload.jpg");
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::PayloadTooLarge("x".into()).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ApiError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_cors_layer_rejects_bad_origin() {
        assert!(cors_layer(&["http://localhost:5173".to_string()]).is_ok());
        assert!(cors_layer(&["bad\norigin".to_string()]).is_err());
    }
}

//! Table store for user profiles and verification records.

use crate::supabase::{check_status, SupabaseClient};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use puresign_core::VerificationStatus;
use reqwest::Method;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("table request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("table request returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("database error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("verification not found: {0}")]
    NotFound(String),
}

/// A user's profile: identity plus the stored reference signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    /// Bucket-relative path or absolute URL of the reference signature.
    pub reference_sig_url: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// One verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationRecord {
    pub id: String,
    pub user_id: String,
    pub status: VerificationStatus,
    pub original_doc_url: String,
    #[serde(default)]
    pub cleaned_sig_url: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f32>,
    /// Rows written without an offset are read as UTC.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Parse an RFC 3339 timestamp, or a naive ISO 8601 one taken as UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid timestamp: {text:?}"))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text).map_err(serde::de::Error::custom)
}

/// Fields changed when a verification finishes. `None` leaves a column as is.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerificationUpdate {
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned_sig_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f32>,
}

impl VerificationUpdate {
    pub fn failed() -> Self {
        Self {
            status: VerificationStatus::Failed,
            cleaned_sig_url: None,
            confidence_score: None,
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, RecordError>;

    async fn insert_verification(&self, record: &VerificationRecord) -> Result<(), RecordError>;

    async fn update_verification(&self, id: &str, update: &VerificationUpdate) -> Result<(), RecordError>;

    /// All verifications for a user, newest first.
    async fn verifications_for(&self, user_id: &str) -> Result<Vec<VerificationRecord>, RecordError>;
}

/// Supabase (PostgREST) tables `profiles` and `verifications`.
pub struct SupabaseRecords {
    client: SupabaseClient,
}

impl SupabaseRecords {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RecordError> {
        let response = request.send().await?;
        check_status(response)
            .await
            .map_err(|(status, body)| RecordError::Status { status, body })
    }
}

#[async_trait]
impl RecordStore for SupabaseRecords {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, RecordError> {
        let request = self
            .client
            .request(Method::GET, "/rest/v1/profiles")
            .query(&[("id", format!("eq.{user_id}")), ("select", "*".to_string())]);
        let rows: Vec<Profile> = self.send(request).await?.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_verification(&self, record: &VerificationRecord) -> Result<(), RecordError> {
        let request = self
            .client
            .request(Method::POST, "/rest/v1/verifications")
            .header("Prefer", "return=minimal")
            .json(record);
        self.send(request).await?;
        Ok(())
    }

    async fn update_verification(&self, id: &str, update: &VerificationUpdate) -> Result<(), RecordError> {
        let request = self
            .client
            .request(Method::PATCH, "/rest/v1/verifications")
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(update);
        self.send(request).await?;
        Ok(())
    }

    async fn verifications_for(&self, user_id: &str) -> Result<Vec<VerificationRecord>, RecordError> {
        let request = self
            .client
            .request(Method::GET, "/rest/v1/verifications")
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                ("select", "*".to_string()),
                ("order", "timestamp.desc".to_string()),
            ]);
        Ok(self.send(request).await?.json().await?)
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    user_name TEXT,
    reference_sig_url TEXT NOT NULL,
    created_at TEXT,
    updated_at TEXT
);
CREATE TABLE IF NOT EXISTS verifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL,
    original_doc_url TEXT NOT NULL,
    cleaned_sig_url TEXT,
    confidence_score REAL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_verifications_user ON verifications(user_id, timestamp);
";

/// Local SQLite tables with the same shape as the managed backend.
pub struct SqliteRecordStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteRecordStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let conn = tokio_rusqlite::Connection::open(path.as_ref()).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, RecordError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, RecordError> {
        conn.call(|c| {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Insert or replace a profile. Profiles are provisioned out of band.
    pub async fn put_profile(&self, profile: Profile) -> Result<(), RecordError> {
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT OR REPLACE INTO profiles (id, user_name, reference_sig_url, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        profile.id,
                        profile.user_name,
                        profile.reference_sig_url,
                        profile.created_at,
                        profile.updated_at
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed-width UTC text sorts chronologically.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<VerificationRecord> {
    let status: String = row.get(2)?;
    let status = status
        .parse::<VerificationStatus>()
        .map_err(|e| conversion_error(2, e))?;
    let timestamp: String = row.get(6)?;
    let timestamp = parse_timestamp(&timestamp).map_err(|e| conversion_error(6, e))?;
    let score: Option<f64> = row.get(5)?;

    Ok(VerificationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        status,
        original_doc_url: row.get(3)?,
        cleaned_sig_url: row.get(4)?,
        confidence_score: score.map(|s| s as f32),
        timestamp,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn profile(&self, user_id: &str) -> Result<Option<Profile>, RecordError> {
        let user_id = user_id.to_string();
        let profile = self
            .conn
            .call(move |c| {
                let profile = c
                    .query_row(
                        "SELECT id, user_name, reference_sig_url, created_at, updated_at
                         FROM profiles WHERE id = ?1",
                        params![user_id],
                        |row| {
                            Ok(Profile {
                                id: row.get(0)?,
                                user_name: row.get(1)?,
                                reference_sig_url: row.get(2)?,
                                created_at: row.get(3)?,
                                updated_at: row.get(4)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(profile)
            })
            .await?;
        Ok(profile)
    }

    async fn insert_verification(&self, record: &VerificationRecord) -> Result<(), RecordError> {
        let record = record.clone();
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO verifications
                     (id, user_id, status, original_doc_url, cleaned_sig_url, confidence_score, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record.id,
                        record.user_id,
                        record.status.as_str(),
                        record.original_doc_url,
                        record.cleaned_sig_url,
                        record.confidence_score.map(f64::from),
                        format_timestamp(&record.timestamp)
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn update_verification(&self, id: &str, update: &VerificationUpdate) -> Result<(), RecordError> {
        let key = id.to_string();
        let update = update.clone();
        let changed = self
            .conn
            .call(move |c| {
                let n = c.execute(
                    "UPDATE verifications
                     SET status = ?1,
                         cleaned_sig_url = COALESCE(?2, cleaned_sig_url),
                         confidence_score = COALESCE(?3, confidence_score)
                     WHERE id = ?4",
                    params![
                        update.status.as_str(),
                        update.cleaned_sig_url,
                        update.confidence_score.map(f64::from),
                        key
                    ],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(RecordError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn verifications_for(&self, user_id: &str) -> Result<Vec<VerificationRecord>, RecordError> {
        let user_id = user_id.to_string();
        let records = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare(
                    "SELECT id, user_id, status, original_doc_url, cleaned_sig_url, confidence_score, timestamp
                     FROM verifications WHERE user_id = ?1 ORDER BY timestamp DESC",
                )?;
                let rows = stmt
                    .query_map(params![user_id], row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, user: &str, ts: DateTime<Utc>) -> VerificationRecord {
        VerificationRecord {
            id: id.into(),
            user_id: user.into(),
            status: VerificationStatus::Processing,
            original_doc_url: format!("original_docs/{id}_doc.jpg"),
            cleaned_sig_url: None,
            confidence_score: None,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_profile_lookup() {
        let store = SqliteRecordStore::open_in_memory().await.unwrap();
        assert_eq!(store.profile("alice").await.unwrap(), None);

        let profile = Profile {
            id: "alice".into(),
            user_name: Some("Alice".into()),
            reference_sig_url: "references/alice.jpg".into(),
            created_at: None,
            updated_at: None,
        };
        store.put_profile(profile.clone()).await.unwrap();
        assert_eq!(store.profile("alice").await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn test_insert_update_and_list_newest_first() {
        let store = SqliteRecordStore::open_in_memory().await.unwrap();
        let now = Utc::now();
        store.insert_verification(&record("old", "u1", now - Duration::seconds(60))).await.unwrap();
        store.insert_verification(&record("new", "u1", now)).await.unwrap();
        store.insert_verification(&record("other", "u2", now)).await.unwrap();

        store
            .update_verification(
                "new",
                &VerificationUpdate {
                    status: VerificationStatus::Success,
                    cleaned_sig_url: Some("cleaned/new_cleaned.jpg".into()),
                    confidence_score: Some(0.75),
                },
            )
            .await
            .unwrap();

        let list = store.verifications_for("u1").await.unwrap();
        let ids: Vec<&str> = list.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(list[0].status, VerificationStatus::Success);
        assert_eq!(list[0].confidence_score, Some(0.75));
        assert_eq!(list[0].cleaned_sig_url.as_deref(), Some("cleaned/new_cleaned.jpg"));
        assert_eq!(list[1].status, VerificationStatus::Processing);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_other_columns() {
        let store = SqliteRecordStore::open_in_memory().await.unwrap();
        let mut r = record("v", "u", Utc::now());
        r.cleaned_sig_url = Some("cleaned/v.jpg".into());
        store.insert_verification(&r).await.unwrap();

        store.update_verification("v", &VerificationUpdate::failed()).await.unwrap();
        let list = store.verifications_for("u").await.unwrap();
        assert_eq!(list[0].status, VerificationStatus::Failed);
        assert_eq!(list[0].cleaned_sig_url.as_deref(), Some("cleaned/v.jpg"));
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let store = SqliteRecordStore::open_in_memory().await.unwrap();
        let err = store
            .update_verification("missing", &VerificationUpdate::failed())
            .await
            .unwrap_err();
        assert!(matches!(err, RecordError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn test_update_serializes_only_set_fields() {
        let json = serde_json::to_value(VerificationUpdate::failed()).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "failed" }));
    }

    #[test]
    fn test_record_json_shape() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let json = serde_json::to_value(record("id1", "u", ts)).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["user_id"], "u");
        assert_eq!(json["cleaned_sig_url"], serde_json::Value::Null);
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_parse_timestamp_accepts_naive_and_offset_forms() {
        let expected = DateTime::parse_from_rfc3339("2024-05-01T12:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_timestamp("2024-05-01T12:00:00.123456").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-01 12:00:00.123456").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-05-01T14:00:00.123456+02:00").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_row_with_naive_timestamp_deserializes() {
        // PostgREST row for a record written without a UTC offset.
        let row = serde_json::json!({
            "id": "v1",
            "user_id": "alice",
            "status": "success",
            "original_doc_url": "https://x/original_docs/v1_scan.jpg",
            "cleaned_sig_url": "https://x/cleaned/v1_cleaned.jpg",
            "confidence_score": 0.82,
            "timestamp": "2024-05-01T12:00:00.5"
        });
        let record: VerificationRecord = serde_json::from_value(row).unwrap();
        assert_eq!(record.status, VerificationStatus::Success);
        assert_eq!(record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true), "2024-05-01T12:00:00.500Z");
    }
}

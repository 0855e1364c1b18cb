use crate::supabase::SupabaseConfig;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("SUPABASE_URL and SUPABASE_ANON_KEY must be set for the supabase backend")]
    MissingSupabaseCredentials,
    #[error("unknown backend {0:?}; expected \"supabase\" or \"local\"")]
    UnknownBackend(String),
}

/// Where profiles, records, and blobs are persisted.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Managed Supabase project (storage bucket + PostgREST tables).
    Supabase(SupabaseConfig),
    /// Filesystem blobs and a SQLite database under `data_dir`.
    Local {
        data_dir: PathBuf,
        public_base_url: Option<String>,
    },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address to listen on (default: 0.0.0.0:8000).
    pub bind: String,
    pub backend: Backend,
    /// Detector ONNX weights; absent selects the center-crop fallback.
    pub detector_model: Option<String>,
    /// Cleaner ONNX weights; absent selects Otsu thresholding.
    pub cleaner_model: Option<String>,
    /// Verifier ONNX weights; absent selects pixel comparison.
    pub verifier_model: Option<String>,
    /// Browser origins allowed by CORS.
    pub cors_origins: Vec<String>,
    /// Capacity of the inference engine's request queue.
    pub engine_queue: usize,
    /// Largest accepted request body in bytes.
    pub max_upload: usize,
}

/// Default request body cap: 64 MiB, enough for full-resolution scans.
pub const DEFAULT_MAX_UPLOAD: usize = 64 * 1024 * 1024;

impl Config {
    /// Load configuration from `PURESIGN_*` and `SUPABASE_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match var("PURESIGN_BACKEND").as_deref().unwrap_or("supabase") {
            "supabase" => {
                let (Some(url), Some(key)) = (var("SUPABASE_URL"), var("SUPABASE_ANON_KEY")) else {
                    return Err(ConfigError::MissingSupabaseCredentials);
                };
                Backend::Supabase(SupabaseConfig {
                    url,
                    key,
                    bucket: var("SUPABASE_STORAGE_BUCKET").unwrap_or_else(|| "puresign-storage".to_string()),
                })
            }
            "local" => {
                let data_dir = var("PURESIGN_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
                    var("XDG_DATA_HOME")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| {
                            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                            PathBuf::from(home).join(".local/share")
                        })
                        .join("puresign")
                });
                Backend::Local {
                    data_dir,
                    public_base_url: var("PURESIGN_PUBLIC_BASE_URL"),
                }
            }
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        let cors_origins = var("PURESIGN_CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173,http://localhost:3000".to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            bind: var("PURESIGN_BIND").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            backend,
            detector_model: non_empty(var("PURESIGN_DETECTOR_MODEL")),
            cleaner_model: non_empty(var("PURESIGN_CLEANER_MODEL")),
            verifier_model: non_empty(var("PURESIGN_VERIFIER_MODEL")),
            cors_origins,
            engine_queue: var("PURESIGN_ENGINE_QUEUE")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(4),
            max_upload: var("PURESIGN_MAX_UPLOAD")
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(DEFAULT_MAX_UPLOAD),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
